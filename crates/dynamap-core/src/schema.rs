//! Table schema derivation and the process-wide registry.
//!
//! Registration inspects a record type's declared shape and derives an
//! immutable [`TableSchema`]: resolved field names, hash/range key
//! selection, secondary indexes, and capacity overrides. Schemas are built
//! once per process and shared behind `Arc`s; duplicate registration hands
//! back the existing descriptor unchanged.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use dynamap_model::input::CreateTableInput;
use dynamap_model::types::{
    AttributeDefinition, GlobalSecondaryIndex, KeySchemaElement, KeyType, LocalSecondaryIndex,
    Projection, ProjectionType, ProvisionedThroughput, ScalarAttributeType,
};

use crate::record::{FieldShape, IndexProjection, IndexShape, Record, RecordShape};
use crate::value::{DbType, ValueKind};

/// Errors raised while deriving or looking up table metadata.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The type declares no serializable fields.
    #[error("type {type_name} has no serializable fields")]
    NoFields {
        /// The record type name.
        type_name: &'static str,
    },

    /// Two fields resolve to the same attribute name.
    #[error("duplicate attribute name '{name}' on {type_name}")]
    DuplicateField {
        /// The record type name.
        type_name: &'static str,
        /// The colliding attribute name.
        name: String,
    },

    /// A key annotation names a field that does not exist.
    #[error("{type_name} names unknown key field '{name}'")]
    UnknownKeyField {
        /// The record type name.
        type_name: &'static str,
        /// The missing field name.
        name: String,
    },

    /// A key field's kind cannot serve as a key attribute.
    #[error("key field '{name}' on {type_name} is not a scalar key type")]
    InvalidKeyField {
        /// The record type name.
        type_name: &'static str,
        /// The offending field name.
        name: String,
    },

    /// An index references a field the table does not have.
    #[error("index '{index}' on {type_name} references unknown field '{field}'")]
    UnknownIndexField {
        /// The record type name.
        type_name: &'static str,
        /// The index name.
        index: String,
        /// The missing field name.
        field: String,
    },

    /// The type has not been registered.
    #[error("type {type_name} is not registered")]
    NotRegistered {
        /// The record type name.
        type_name: &'static str,
    },

    /// Anything else: inconsistent annotations, missing range keys,
    /// unresolvable index selection.
    #[error("{message}")]
    Invalid {
        /// What went wrong.
        message: String,
    },
}

impl SchemaError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Derived schema types
// ---------------------------------------------------------------------------

/// One serialized field of a registered table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    /// The resolved attribute name.
    pub name: String,
    /// The application value kind.
    pub kind: ValueKind,
    /// The wire type the field serializes as.
    pub db_type: DbType,
}

impl FieldSchema {
    fn from_shape(shape: &FieldShape) -> Self {
        Self {
            name: shape.resolved_name().to_owned(),
            kind: shape.kind,
            db_type: shape.kind.db_type(),
        }
    }

    /// The scalar attribute type for key participation, when eligible.
    #[must_use]
    pub fn scalar_type(&self) -> Option<ScalarAttributeType> {
        match self.db_type {
            DbType::String => Some(ScalarAttributeType::S),
            DbType::Number => Some(ScalarAttributeType::N),
            DbType::Binary => Some(ScalarAttributeType::B),
            _ => None,
        }
    }
}

/// A derived secondary index.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    /// The index name.
    pub name: String,
    /// The index hash key.
    pub hash_key: FieldSchema,
    /// The index range key.
    pub range_key: Option<FieldSchema>,
    /// Projected attributes.
    pub projection: IndexProjection,
    /// `true` for global indexes.
    pub global: bool,
    /// Provisioned read capacity (global only).
    pub read_capacity: Option<i64>,
    /// Provisioned write capacity (global only).
    pub write_capacity: Option<i64>,
}

/// The immutable descriptor of one registered table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// The table name, unique process-wide.
    pub name: String,
    /// The record type name the table stores.
    pub type_name: &'static str,
    /// The hash key field.
    pub hash_key: FieldSchema,
    /// The range key field, when the key is composite.
    pub range_key: Option<FieldSchema>,
    /// Every serialized field, in declaration order.
    pub fields: Vec<FieldSchema>,
    /// Local secondary indexes.
    pub local_indexes: Vec<IndexSchema>,
    /// Global secondary indexes.
    pub global_indexes: Vec<IndexSchema>,
    /// Provisioned read capacity override.
    pub read_capacity: Option<i64>,
    /// Provisioned write capacity override.
    pub write_capacity: Option<i64>,
}

impl TableSchema {
    /// Looks up a field by resolved attribute name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a secondary index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.local_indexes
            .iter()
            .chain(&self.global_indexes)
            .find(|ix| ix.name == name)
    }

    /// Finds the index keyed (hash or range) by the given field, local
    /// indexes first.
    #[must_use]
    pub fn index_for_field(&self, field: &str) -> Option<&IndexSchema> {
        self.local_indexes
            .iter()
            .chain(&self.global_indexes)
            .find(|ix| {
                ix.hash_key.name == field
                    || ix.range_key.as_ref().is_some_and(|rk| rk.name == field)
            })
    }

    /// The resolved attribute names of every field, in declaration order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Builds the `CreateTable` request for this schema, falling back to the
    /// supplied capacity defaults where the type declared none.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidKeyField`] if a key or index key field
    /// is not a scalar key type.
    pub fn to_create_table_input(
        &self,
        default_read: i64,
        default_write: i64,
    ) -> Result<CreateTableInput, SchemaError> {
        let mut key_schema = vec![KeySchemaElement {
            attribute_name: self.hash_key.name.clone(),
            key_type: KeyType::Hash,
        }];
        if let Some(range) = &self.range_key {
            key_schema.push(KeySchemaElement {
                attribute_name: range.name.clone(),
                key_type: KeyType::Range,
            });
        }

        let mut definitions: Vec<AttributeDefinition> = Vec::new();
        let mut defined: HashSet<String> = HashSet::new();
        let mut define = |field: &FieldSchema| -> Result<(), SchemaError> {
            if !defined.insert(field.name.clone()) {
                return Ok(());
            }
            let attribute_type =
                field
                    .scalar_type()
                    .ok_or_else(|| SchemaError::InvalidKeyField {
                        type_name: self.type_name,
                        name: field.name.clone(),
                    })?;
            definitions.push(AttributeDefinition {
                attribute_name: field.name.clone(),
                attribute_type,
            });
            Ok(())
        };

        define(&self.hash_key)?;
        if let Some(range) = &self.range_key {
            define(range)?;
        }
        for ix in self.local_indexes.iter().chain(&self.global_indexes) {
            define(&ix.hash_key)?;
            if let Some(range) = &ix.range_key {
                define(range)?;
            }
        }

        let global_secondary_indexes = self
            .global_indexes
            .iter()
            .map(|ix| GlobalSecondaryIndex {
                index_name: ix.name.clone(),
                key_schema: index_key_schema(ix),
                projection: index_projection(&ix.projection),
                provisioned_throughput: Some(ProvisionedThroughput {
                    read_capacity_units: ix.read_capacity.unwrap_or(default_read),
                    write_capacity_units: ix.write_capacity.unwrap_or(default_write),
                }),
            })
            .collect();

        let local_secondary_indexes = self
            .local_indexes
            .iter()
            .map(|ix| LocalSecondaryIndex {
                index_name: ix.name.clone(),
                key_schema: index_key_schema(ix),
                projection: index_projection(&ix.projection),
            })
            .collect();

        Ok(CreateTableInput {
            table_name: self.name.clone(),
            key_schema,
            attribute_definitions: definitions,
            provisioned_throughput: Some(ProvisionedThroughput {
                read_capacity_units: self.read_capacity.unwrap_or(default_read),
                write_capacity_units: self.write_capacity.unwrap_or(default_write),
            }),
            global_secondary_indexes,
            local_secondary_indexes,
        })
    }
}

fn index_key_schema(ix: &IndexSchema) -> Vec<KeySchemaElement> {
    let mut schema = vec![KeySchemaElement {
        attribute_name: ix.hash_key.name.clone(),
        key_type: KeyType::Hash,
    }];
    if let Some(range) = &ix.range_key {
        schema.push(KeySchemaElement {
            attribute_name: range.name.clone(),
            key_type: KeyType::Range,
        });
    }
    schema
}

fn index_projection(projection: &IndexProjection) -> Projection {
    match projection {
        IndexProjection::All => Projection {
            projection_type: Some(ProjectionType::All),
            non_key_attributes: Vec::new(),
        },
        IndexProjection::KeysOnly => Projection {
            projection_type: Some(ProjectionType::KeysOnly),
            non_key_attributes: Vec::new(),
        },
        IndexProjection::Include(fields) => Projection {
            projection_type: Some(ProjectionType::Include),
            non_key_attributes: fields.clone(),
        },
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Lowercases and strips underscores, so `customer_id`, `CustomerId` and
/// `customerid` all compare equal for the name-convention key rules.
fn normalized(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn derive_schema(shape: &RecordShape) -> Result<TableSchema, SchemaError> {
    let type_name = shape.type_name;
    let fields: Vec<&FieldShape> = shape.fields.iter().filter(|f| !f.excluded).collect();
    if fields.is_empty() {
        return Err(SchemaError::NoFields { type_name });
    }

    let mut seen = HashSet::new();
    for field in &fields {
        if !seen.insert(field.resolved_name()) {
            return Err(SchemaError::DuplicateField {
                type_name,
                name: field.resolved_name().to_owned(),
            });
        }
    }

    let find = |name: &str| fields.iter().find(|f| f.resolved_name() == name).copied();

    // Hash key selection: type-level composite annotation, field-level
    // hash/auto annotation, `Id` / `<TypeName>Id` convention, first field.
    let hash_shape = if let Some(key) = &shape.composite_key {
        find(key.hash).ok_or_else(|| SchemaError::UnknownKeyField {
            type_name,
            name: key.hash.to_owned(),
        })?
    } else if let Some(field) = fields
        .iter()
        .find(|f| f.hash_key || f.auto_increment)
        .copied()
    {
        field
    } else if let Some(field) = fields
        .iter()
        .find(|f| {
            let n = normalized(f.resolved_name());
            n == "id" || n == format!("{}id", normalized(type_name))
        })
        .copied()
    {
        field
    } else {
        fields[0]
    };

    // Range key selection: composite annotation, field-level annotation,
    // `RangeKey` name convention.
    let range_shape = if let Some(name) = shape.composite_key.as_ref().and_then(|k| k.range) {
        Some(find(name).ok_or_else(|| SchemaError::UnknownKeyField {
            type_name,
            name: name.to_owned(),
        })?)
    } else {
        fields
            .iter()
            .find(|f| f.range_key || normalized(f.resolved_name()) == "rangekey")
            .copied()
    };
    let range_shape = range_shape.filter(|f| f.resolved_name() != hash_shape.resolved_name());

    let hash_key = FieldSchema::from_shape(hash_shape);
    if hash_key.scalar_type().is_none() {
        return Err(SchemaError::InvalidKeyField {
            type_name,
            name: hash_key.name,
        });
    }
    let range_key = range_shape.map(FieldSchema::from_shape);
    if let Some(range) = &range_key {
        if range.scalar_type().is_none() {
            return Err(SchemaError::InvalidKeyField {
                type_name,
                name: range.name.clone(),
            });
        }
    }

    let field_schemas: Vec<FieldSchema> = fields.iter().map(|f| FieldSchema::from_shape(f)).collect();

    let mut local_indexes = Vec::new();
    let mut global_indexes = Vec::new();
    for ix in &shape.indexes {
        let schema = derive_index(type_name, ix, &field_schemas)?;
        if !schema.global && schema.hash_key.name != hash_key.name {
            return Err(SchemaError::invalid(format!(
                "local index '{}' on {type_name} must share the table hash key '{}'",
                schema.name, hash_key.name,
            )));
        }
        if schema.global {
            global_indexes.push(schema);
        } else {
            local_indexes.push(schema);
        }
    }

    Ok(TableSchema {
        name: shape
            .table_name
            .map_or_else(|| type_name.to_owned(), ToOwned::to_owned),
        type_name,
        hash_key,
        range_key,
        fields: field_schemas,
        local_indexes,
        global_indexes,
        read_capacity: shape.read_capacity,
        write_capacity: shape.write_capacity,
    })
}

fn derive_index(
    type_name: &'static str,
    shape: &IndexShape,
    fields: &[FieldSchema],
) -> Result<IndexSchema, SchemaError> {
    let lookup = |name: &str| -> Result<FieldSchema, SchemaError> {
        fields
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownIndexField {
                type_name,
                index: shape.name.clone(),
                field: name.to_owned(),
            })
    };

    if shape.hash_field.is_empty() {
        return Err(SchemaError::invalid(format!(
            "index '{}' on {type_name} declares no hash key",
            shape.name,
        )));
    }

    let hash_key = lookup(&shape.hash_field)?;
    let range_key = shape
        .range_field
        .as_deref()
        .map(lookup)
        .transpose()?;

    Ok(IndexSchema {
        name: shape.name.clone(),
        hash_key,
        range_key,
        projection: shape.projection.clone(),
        global: shape.global,
        read_capacity: shape.read_capacity,
        write_capacity: shape.write_capacity,
    })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide map from record type to its table schema.
///
/// Registration is idempotent and expected to happen during application
/// startup; reads afterwards are lock-free clones of shared descriptors.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: DashMap<TypeId, Arc<TableSchema>>,
}

static SHARED: OnceLock<Arc<SchemaRegistry>> = OnceLock::new();

impl SchemaRegistry {
    /// Creates an empty registry (tests use isolated instances).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
    }

    /// Registers a record type, deriving its schema on first call. Returns
    /// the existing descriptor unchanged on duplicate registration.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the shape is empty or inconsistent.
    pub fn register<T: Record>(&self) -> Result<Arc<TableSchema>, SchemaError> {
        if let Some(existing) = self.tables.get(&TypeId::of::<T>()) {
            return Ok(Arc::clone(existing.value()));
        }
        let schema = Arc::new(derive_schema(&T::shape())?);
        let entry = self
            .tables
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::clone(&schema));
        Ok(Arc::clone(entry.value()))
    }

    /// Looks up a registered type's schema.
    #[must_use]
    pub fn get<T: Record>(&self) -> Option<Arc<TableSchema>> {
        self.tables
            .get(&TypeId::of::<T>())
            .map(|s| Arc::clone(s.value()))
    }

    /// Looks up a registered type's schema, failing when absent.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NotRegistered`] for unregistered types.
    pub fn require<T: Record>(&self) -> Result<Arc<TableSchema>, SchemaError> {
        self.get::<T>().ok_or_else(|| SchemaError::NotRegistered {
            type_name: T::shape().type_name,
        })
    }

    /// Every registered schema.
    #[must_use]
    pub fn tables(&self) -> Vec<Arc<TableSchema>> {
        self.tables.iter().map(|e| Arc::clone(e.value())).collect()
    }
}
