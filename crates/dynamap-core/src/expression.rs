//! Typed predicates and their compilation to wire expressions.
//!
//! A [`Condition`] is a predicate tree over one record type's fields.
//! Compilation walks the tree and emits the store's expression text with
//! `#`-prefixed name placeholders (reserved words never reach the wire) and
//! `:`-prefixed value placeholders, encoding captured values through the
//! codec against the field's declared kind.
//!
//! A compiler instance is stateful: repeated `compile` calls share one
//! placeholder namespace so fragments can be joined into a single request
//! expression. Distinct expression slots (key condition vs. filter) use
//! distinct placeholder prefixes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dynamap_model::AttributeValue;

use crate::codec::{Codec, EncodingError};
use crate::schema::{FieldSchema, TableSchema};
use crate::value::Value;

/// Errors produced while compiling a predicate.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    /// The predicate references something that is not a field of the
    /// subject record. Only field accesses and captured values compile.
    #[error("predicate references unknown field '{field}' on table {table}")]
    UnknownField {
        /// The unknown name.
        field: String,
        /// The table the predicate compiles against.
        table: String,
    },

    /// An `IN` predicate with no candidate values.
    #[error("IN predicate requires at least one candidate value")]
    EmptyIn,

    /// The predicate compiled to no placeholders where at least one is
    /// required.
    #[error("predicate produced no placeholders: {context}")]
    NoPlaceholders {
        /// What required a placeholder.
        context: String,
    },

    /// A captured value could not be encoded.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "<>"),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
        }
    }
}

/// A typed predicate over one record type.
#[derive(Debug, Clone)]
pub enum Condition {
    /// `field op value`.
    Compare {
        /// The field (resolved attribute name).
        field: String,
        /// The comparison operator.
        op: CompareOp,
        /// The captured value.
        value: Value,
    },
    /// `field BETWEEN low AND high` (inclusive).
    Between {
        /// The field.
        field: String,
        /// Lower bound.
        low: Value,
        /// Upper bound.
        high: Value,
    },
    /// `field IN (v1, v2, ...)`.
    In {
        /// The field.
        field: String,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// `begins_with(field, prefix)`.
    BeginsWith {
        /// The field.
        field: String,
        /// The prefix.
        prefix: String,
    },
    /// `contains(field, value)`.
    Contains {
        /// The field.
        field: String,
        /// The value to search for.
        value: Value,
    },
    /// `attribute_exists(field)`.
    Exists {
        /// The field.
        field: String,
    },
    /// `attribute_not_exists(field)`.
    NotExists {
        /// The field.
        field: String,
    },
    /// Both operands hold.
    And(Box<Condition>, Box<Condition>),
    /// Either operand holds.
    Or(Box<Condition>, Box<Condition>),
    /// The operand does not hold.
    Not(Box<Condition>),
}

impl Condition {
    /// `field = value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    /// `field <> value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    /// `field < value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    /// `field <= value`.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    /// `field > value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    /// `field >= value`.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field BETWEEN low AND high`.
    pub fn between(
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self::Between {
            field: field.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    /// `field IN (values...)`.
    pub fn is_in<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `begins_with(field, prefix)`.
    pub fn begins_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::BeginsWith {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    /// `contains(field, value)`.
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `attribute_exists(field)`.
    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists {
            field: field.into(),
        }
    }

    /// `attribute_not_exists(field)`.
    pub fn not_exists(field: impl Into<String>) -> Self {
        Self::NotExists {
            field: field.into(),
        }
    }

    /// Joins with `AND`.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Joins with `OR`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Negates.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// The fields this predicate references, in first-use order, unique.
    #[must_use]
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        let mut push = |field: &str| {
            if !out.iter().any(|f| f == field) {
                out.push(field.to_owned());
            }
        };
        match self {
            Self::Compare { field, .. }
            | Self::Between { field, .. }
            | Self::In { field, .. }
            | Self::BeginsWith { field, .. }
            | Self::Contains { field, .. }
            | Self::Exists { field }
            | Self::NotExists { field } => push(field),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Self::Not(inner) => inner.collect_fields(out),
        }
    }
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Compiles predicates into wire expression fragments against one table.
///
/// Pure relative to its inputs: compiling the same predicate against the
/// same schema yields identical text modulo placeholder numbering.
#[derive(Debug, Clone)]
pub struct ExpressionCompiler {
    schema: Arc<TableSchema>,
    codec: Arc<Codec>,
    prefix: String,
    names: HashMap<String, String>,
    name_for_field: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
    referenced: Vec<String>,
}

impl ExpressionCompiler {
    /// A compiler for one expression slot, with its placeholder prefix
    /// (e.g. `"k"` for key conditions, `"p"` for filters).
    #[must_use]
    pub fn new(schema: Arc<TableSchema>, codec: Arc<Codec>, prefix: impl Into<String>) -> Self {
        Self {
            schema,
            codec,
            prefix: prefix.into(),
            names: HashMap::new(),
            name_for_field: HashMap::new(),
            values: HashMap::new(),
            referenced: Vec::new(),
        }
    }

    /// Compiles a predicate, returning the expression fragment. Placeholder
    /// maps accumulate across calls.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError`] for unknown fields, empty `IN` lists, or
    /// unencodable captures.
    pub fn compile(&mut self, condition: &Condition) -> Result<String, ExpressionError> {
        match condition {
            Condition::Compare { field, op, value } => {
                let (alias, placeholder) = self.field_and_value(field, value)?;
                Ok(format!("{alias} {op} {placeholder}"))
            }
            Condition::Between { field, low, high } => {
                let alias = self.alias(field)?;
                let schema_field = self.lookup(field)?;
                let low = self.bind(&schema_field, low)?;
                let high = self.bind(&schema_field, high)?;
                Ok(format!("{alias} BETWEEN {low} AND {high}"))
            }
            Condition::In { field, values } => {
                if values.is_empty() {
                    return Err(ExpressionError::EmptyIn);
                }
                let alias = self.alias(field)?;
                let schema_field = self.lookup(field)?;
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| self.bind(&schema_field, v))
                    .collect::<Result<_, _>>()?;
                Ok(format!("{alias} IN ({})", placeholders.join(", ")))
            }
            Condition::BeginsWith { field, prefix } => {
                let value = Value::Str(prefix.clone());
                let (alias, placeholder) = self.field_and_value(field, &value)?;
                Ok(format!("begins_with({alias}, {placeholder})"))
            }
            Condition::Contains { field, value } => {
                let (alias, placeholder) = self.field_and_value(field, value)?;
                Ok(format!("contains({alias}, {placeholder})"))
            }
            Condition::Exists { field } => {
                let alias = self.alias(field)?;
                Ok(format!("attribute_exists({alias})"))
            }
            Condition::NotExists { field } => {
                let alias = self.alias(field)?;
                Ok(format!("attribute_not_exists({alias})"))
            }
            Condition::And(left, right) => {
                let left = self.compile(left)?;
                let right = self.compile(right)?;
                Ok(format!("({left} AND {right})"))
            }
            Condition::Or(left, right) => {
                let left = self.compile(left)?;
                let right = self.compile(right)?;
                Ok(format!("({left} OR {right})"))
            }
            Condition::Not(inner) => {
                let inner = self.compile(inner)?;
                Ok(format!("NOT ({inner})"))
            }
        }
    }

    /// The accumulated name-placeholder map (`#k0` to attribute name).
    #[must_use]
    pub fn names(&self) -> &HashMap<String, String> {
        &self.names
    }

    /// The accumulated value-placeholder map (`:k0` to attribute value).
    #[must_use]
    pub fn values(&self) -> &HashMap<String, AttributeValue> {
        &self.values
    }

    /// The fields referenced so far, in first-use order, unique.
    #[must_use]
    pub fn referenced_fields(&self) -> &[String] {
        &self.referenced
    }

    /// `true` when no value placeholder has been produced yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.names.is_empty()
    }

    /// Drains the accumulated maps for the request, leaving the compiler
    /// empty.
    #[must_use]
    pub fn take_maps(&mut self) -> (HashMap<String, String>, HashMap<String, AttributeValue>) {
        (
            std::mem::take(&mut self.names),
            std::mem::take(&mut self.values),
        )
    }

    fn lookup(&self, field: &str) -> Result<FieldSchema, ExpressionError> {
        self.schema
            .field(field)
            .cloned()
            .ok_or_else(|| ExpressionError::UnknownField {
                field: field.to_owned(),
                table: self.schema.name.clone(),
            })
    }

    fn alias(&mut self, field: &str) -> Result<String, ExpressionError> {
        // Validate the reference even when the alias already exists.
        let schema_field = self.lookup(field)?;
        if !self.referenced.iter().any(|f| f == field) {
            self.referenced.push(field.to_owned());
        }
        if let Some(existing) = self.name_for_field.get(&schema_field.name) {
            return Ok(existing.clone());
        }
        let placeholder = format!("#{}{}", self.prefix, self.names.len());
        self.names
            .insert(placeholder.clone(), schema_field.name.clone());
        self.name_for_field
            .insert(schema_field.name, placeholder.clone());
        Ok(placeholder)
    }

    fn bind(&mut self, field: &FieldSchema, value: &Value) -> Result<String, ExpressionError> {
        let attr = self.codec.encode(field, value)?;
        let placeholder = format!(":{}{}", self.prefix, self.values.len());
        self.values.insert(placeholder.clone(), attr);
        Ok(placeholder)
    }

    fn field_and_value(
        &mut self,
        field: &str,
        value: &Value,
    ) -> Result<(String, String), ExpressionError> {
        let alias = self.alias(field)?;
        let schema_field = self.lookup(field)?;
        let placeholder = self.bind(&schema_field, value)?;
        Ok((alias, placeholder))
    }
}
