//! Record declaration: shapes, accessor traits, and declaration macros.
//!
//! A record type describes itself through [`Record::shape`]; the registry
//! derives an immutable table schema from that shape once per process. The
//! [`record!`], [`index_record!`] and [`document!`] macros generate the
//! shape and the field accessors so application code only writes a struct
//! definition.

use crate::value::{Value, ValueError, ValueKind};

/// A type that can be stored as items of one table.
///
/// `get`/`set` address fields by their resolved attribute name (the alias
/// when one is declared, the field name otherwise). `set` ignores unknown
/// names so populated records tolerate unknown wire attributes.
pub trait Record: Clone + Default + Send + Sync + 'static {
    /// The declared shape this type registers with.
    fn shape() -> RecordShape;

    /// Reads the named field; [`Value::Null`] for unknown names.
    fn get(&self, field: &str) -> Value;

    /// Writes the named field from a value.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when the value cannot convert to the field's
    /// type.
    fn set(&mut self, field: &str, value: Value) -> Result<(), ValueError>;
}

/// A record type that is a secondary-index projection of another record.
pub trait IndexRecord: Record {
    /// The table record this index projects.
    type Table: Record;

    /// `true` for a global index (own hash key), `false` for a local one
    /// (table's hash key, alternate range key).
    const GLOBAL: bool;

    /// When `true` the index projects every table attribute instead of the
    /// fields declared on the index type.
    const PROJECT_ALL: bool = false;

    /// The index name on the wire.
    #[must_use]
    fn index_name() -> String {
        Self::shape().type_name.to_owned()
    }
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// The declared shape of a record type, before schema derivation.
#[derive(Debug, Clone)]
pub struct RecordShape {
    /// The Rust type name.
    pub type_name: &'static str,
    /// Explicit table name; the type name is used when absent.
    pub table_name: Option<&'static str>,
    /// Fields in declaration order.
    pub fields: Vec<FieldShape>,
    /// Type-level composite-key annotation naming the hash (and optionally
    /// range) field explicitly.
    pub composite_key: Option<CompositeKey>,
    /// Secondary indexes declared on the type.
    pub indexes: Vec<IndexShape>,
    /// Provisioned read capacity override.
    pub read_capacity: Option<i64>,
    /// Provisioned write capacity override.
    pub write_capacity: Option<i64>,
}

/// Type-level composite key annotation. Fields are named explicitly; there
/// is no positional form.
#[derive(Debug, Clone)]
pub struct CompositeKey {
    /// The hash key field (resolved name).
    pub hash: &'static str,
    /// The range key field (resolved name), when the key is composite.
    pub range: Option<&'static str>,
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldShape {
    /// The declared field name.
    pub name: &'static str,
    /// Attribute-name alias; overrides `name` on the wire.
    pub alias: Option<&'static str>,
    /// The field's value kind.
    pub kind: ValueKind,
    /// Field-level hash key annotation.
    pub hash_key: bool,
    /// Field-level range key annotation.
    pub range_key: bool,
    /// Auto-increment annotation; treated as a hash key marker and served
    /// by the sequence source.
    pub auto_increment: bool,
    /// Excluded from serialization entirely.
    pub excluded: bool,
}

impl FieldShape {
    /// The attribute name this field uses: the alias when declared,
    /// otherwise the field name.
    #[must_use]
    pub fn resolved_name(&self) -> &'static str {
        self.alias.unwrap_or(self.name)
    }
}

/// How a secondary index projects table attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexProjection {
    /// Every table attribute.
    All,
    /// Key attributes only.
    KeysOnly,
    /// Keys plus the named attributes.
    Include(Vec<String>),
}

/// A declared secondary index.
#[derive(Debug, Clone)]
pub struct IndexShape {
    /// The index name.
    pub name: String,
    /// The index hash key (resolved field name). For local indexes this is
    /// the table's hash key.
    pub hash_field: String,
    /// The index range key (resolved field name).
    pub range_field: Option<String>,
    /// Projected attributes.
    pub projection: IndexProjection,
    /// `true` for global indexes.
    pub global: bool,
    /// Provisioned read capacity (global indexes only).
    pub read_capacity: Option<i64>,
    /// Provisioned write capacity (global indexes only).
    pub write_capacity: Option<i64>,
}

impl IndexShape {
    /// Builds the index shape declared by an [`IndexRecord`] type: its hash
    /// and range annotations become the index keys, its remaining fields
    /// the projected attributes.
    #[must_use]
    pub fn of<I: IndexRecord>() -> Self {
        let shape = I::shape();
        let mut hash_field = String::new();
        let mut range_field = None;
        let mut projected = Vec::new();
        for field in &shape.fields {
            let name = field.resolved_name().to_owned();
            if field.hash_key {
                hash_field = name;
            } else if field.range_key {
                range_field = Some(name);
            } else {
                projected.push(name);
            }
        }
        let projection = if I::PROJECT_ALL {
            IndexProjection::All
        } else if projected.is_empty() {
            IndexProjection::KeysOnly
        } else {
            IndexProjection::Include(projected)
        };
        Self {
            name: I::index_name(),
            hash_field,
            range_field,
            projection,
            global: I::GLOBAL,
            read_capacity: shape.read_capacity,
            write_capacity: shape.write_capacity,
        }
    }
}

// ---------------------------------------------------------------------------
// Declaration macros
// ---------------------------------------------------------------------------

/// Resolves a field's attribute name at expansion time.
#[doc(hidden)]
#[macro_export]
macro_rules! __field_name {
    ($field:ident) => {
        stringify!($field)
    };
    ($field:ident, $alias:literal) => {
        $alias
    };
}

/// Builds one [`FieldShape`](crate::record::FieldShape) from a marker.
#[doc(hidden)]
#[macro_export]
macro_rules! __field_shape {
    (hash, $field:ident, $ty:ty $(, $alias:literal)?) => {
        $crate::__field_shape!(@build $field, $ty, true, false, false $(, $alias)?)
    };
    (range, $field:ident, $ty:ty $(, $alias:literal)?) => {
        $crate::__field_shape!(@build $field, $ty, false, true, false $(, $alias)?)
    };
    (auto, $field:ident, $ty:ty $(, $alias:literal)?) => {
        $crate::__field_shape!(@build $field, $ty, false, false, true $(, $alias)?)
    };
    (attr, $field:ident, $ty:ty $(, $alias:literal)?) => {
        $crate::__field_shape!(@build $field, $ty, false, false, false $(, $alias)?)
    };
    (@build $field:ident, $ty:ty, $hash:expr, $range:expr, $auto:expr $(, $alias:literal)?) => {{
        #[allow(unused_mut, unused_assignments)]
        let mut alias: Option<&'static str> = None;
        $( alias = Some($alias); )?
        $crate::record::FieldShape {
            name: stringify!($field),
            alias,
            kind: <$ty as $crate::RecordValue>::KIND,
            hash_key: $hash,
            range_key: $range,
            auto_increment: $auto,
            excluded: false,
        }
    }};
}

/// Declares a table record: the struct, its [`Record`] implementation, and
/// its shape.
///
/// Field markers: `hash` / `range` / `auto` / `attr`. An optional
/// `=> "Alias"` renames the attribute on the wire; optional `in "Table"`
/// names the table; optional `capacity(r, w)` overrides provisioned
/// throughput; an optional trailing `indexes [TypeA, TypeB]` attaches
/// secondary indexes declared with [`index_record!`].
///
/// ```
/// use dynamap_core::record;
///
/// record! {
///     /// A customer order.
///     pub struct Order in "Orders" {
///         hash customer_id: i64 => "CustomerId",
///         range order_id: i64 => "OrderId",
///         attr total: f64 => "Total",
///     }
/// }
/// ```
#[macro_export]
macro_rules! record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident
            $(in $table:literal)?
            $(key($key_hash:literal $(, $key_range:literal)?))?
            $(capacity($read_cap:expr, $write_cap:expr))?
        {
            $( $marker:ident $field:ident : $ty:ty $(=> $alias:literal)? ),+ $(,)?
        }
        $(indexes [ $($ix:ty),+ $(,)? ])?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $name {
            $( pub $field: $ty, )+
        }

        impl $crate::Record for $name {
            fn shape() -> $crate::record::RecordShape {
                #[allow(unused_mut, unused_assignments)]
                let mut table_name: Option<&'static str> = None;
                $( table_name = Some($table); )?

                #[allow(unused_mut, unused_assignments)]
                let mut composite_key: Option<$crate::record::CompositeKey> = None;
                $(
                    #[allow(unused_mut, unused_assignments)]
                    let mut key_range: Option<&'static str> = None;
                    $( key_range = Some($key_range); )?
                    composite_key = Some($crate::record::CompositeKey {
                        hash: $key_hash,
                        range: key_range,
                    });
                )?

                #[allow(unused_mut, unused_assignments)]
                let mut read_capacity: Option<i64> = None;
                #[allow(unused_mut, unused_assignments)]
                let mut write_capacity: Option<i64> = None;
                $(
                    read_capacity = Some($read_cap);
                    write_capacity = Some($write_cap);
                )?

                #[allow(unused_mut)]
                let mut indexes: Vec<$crate::record::IndexShape> = Vec::new();
                $( $( indexes.push($crate::record::IndexShape::of::<$ix>()); )+ )?

                $crate::record::RecordShape {
                    type_name: stringify!($name),
                    table_name,
                    fields: vec![
                        $( $crate::__field_shape!($marker, $field, $ty $(, $alias)?) ),+
                    ],
                    composite_key,
                    indexes,
                    read_capacity,
                    write_capacity,
                }
            }

            fn get(&self, field: &str) -> $crate::Value {
                $(
                    if field == $crate::__field_name!($field $(, $alias)?) {
                        return $crate::RecordValue::into_value(self.$field.clone());
                    }
                )+
                $crate::Value::Null
            }

            fn set(
                &mut self,
                field: &str,
                value: $crate::Value,
            ) -> std::result::Result<(), $crate::ValueError> {
                $(
                    if field == $crate::__field_name!($field $(, $alias)?) {
                        self.$field = $crate::RecordValue::from_value(value)?;
                        return Ok(());
                    }
                )+
                let _ = value;
                Ok(())
            }
        }
    };
}

/// Maps the `global` / `local` keyword to the `GLOBAL` const.
#[doc(hidden)]
#[macro_export]
macro_rules! __index_global {
    (global) => {
        true
    };
    (local) => {
        false
    };
}

/// Declares a secondary-index projection of a table record.
///
/// The index type's `hash`/`range` markers define the index keys; its
/// remaining fields are the projected attributes. The keyword after the
/// parent type selects `global` or `local`.
///
/// ```
/// use dynamap_core::{index_record, record};
///
/// record! {
///     pub struct Order in "Orders" {
///         hash customer_id: i64 => "CustomerId",
///         range order_id: i64 => "OrderId",
///         attr date: String => "Date",
///     }
/// }
///
/// index_record! {
///     pub struct OrderByDate of Order as "OrderByDateIndex" global {
///         hash date: String => "Date",
///         range order_id: i64 => "OrderId",
///     }
/// }
/// ```
#[macro_export]
macro_rules! index_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident of $table:ident as $index_name:literal $kind:ident {
            $( $marker:ident $field:ident : $ty:ty $(=> $alias:literal)? ),+ $(,)?
        }
    ) => {
        $crate::__index_record_impl! {
            $(#[$meta])*
            $vis struct $name of $table [Some($index_name)] $kind {
                $( $marker $field : $ty $(=> $alias)? ),+
            }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident of $table:ident $kind:ident {
            $( $marker:ident $field:ident : $ty:ty $(=> $alias:literal)? ),+ $(,)?
        }
    ) => {
        $crate::__index_record_impl! {
            $(#[$meta])*
            $vis struct $name of $table [None::<&'static str>] $kind {
                $( $marker $field : $ty $(=> $alias)? ),+
            }
        }
    };
}

/// Implementation detail of [`index_record!`]; not part of the public API.
#[doc(hidden)]
#[macro_export]
macro_rules! __index_record_impl {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident of $table:ident [$index_name:expr] $kind:ident {
            $( $marker:ident $field:ident : $ty:ty $(=> $alias:literal)? ),+ $(,)?
        }
    ) => {
        $crate::record! {
            $(#[$meta])*
            $vis struct $name {
                $( $marker $field : $ty $(=> $alias)? ),+
            }
        }

        impl $crate::IndexRecord for $name {
            type Table = $table;

            const GLOBAL: bool = $crate::__index_global!($kind);

            fn index_name() -> String {
                #[allow(unused_mut, unused_assignments)]
                let mut name = stringify!($name).to_owned();
                if let Some(explicit) = $index_name {
                    name = explicit.to_owned();
                }
                name
            }
        }
    };
}

/// Declares a nested document type stored as a value-serialized string
/// attribute. Generates the struct and its [`RecordValue`](crate::RecordValue)
/// implementation with [`ValueKind::Document`](crate::ValueKind).
///
/// ```
/// use dynamap_core::document;
///
/// document! {
///     pub struct Address {
///         street: String => "Street",
///         city: String => "City",
///     }
/// }
/// ```
#[macro_export]
macro_rules! document {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $field:ident : $ty:ty $(=> $alias:literal)? ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $name {
            $( pub $field: $ty, )+
        }

        impl $crate::RecordValue for $name {
            const KIND: $crate::ValueKind = $crate::ValueKind::Document;

            fn into_value(self) -> $crate::Value {
                let mut entries = ::std::collections::BTreeMap::new();
                $(
                    let value = $crate::RecordValue::into_value(self.$field);
                    if !value.is_null() {
                        entries.insert(
                            $crate::__field_name!($field $(, $alias)?).to_owned(),
                            value,
                        );
                    }
                )+
                $crate::Value::Map(entries)
            }

            fn from_value(value: $crate::Value) -> Result<Self, $crate::ValueError> {
                match value {
                    $crate::Value::Map(mut entries) => {
                        let mut out = Self::default();
                        $(
                            if let Some(v) =
                                entries.remove($crate::__field_name!($field $(, $alias)?))
                            {
                                if !v.is_null() {
                                    out.$field = $crate::RecordValue::from_value(v)?;
                                }
                            }
                        )+
                        Ok(out)
                    }
                    other => Err($crate::ValueError {
                        expected: "document map",
                        actual: other.type_name().to_owned(),
                    }),
                }
            }
        }
    };
}
