//! B-Tree indexed item storage for one in-memory table.
//!
//! Each partition key maps to a `BTreeMap` of sort keys to items, so range
//! traversal within a partition is ordered and cheap:
//!
//! ```text
//! DashMap<AttributeValue, BTreeMap<SortKey, Item>>
//! ```
//!
//! Tables without a range key use a sentinel as the single sort key per
//! partition. [`SortKey`] orders the key-eligible attribute variants the
//! way the store does: strings and binary by bytes, numbers numerically.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use dashmap::DashMap;

use dynamap_model::AttributeValue;
use dynamap_model::store_error;
use dynamap_model::types::{
    AttributeDefinition, Item, Key, KeySchemaElement, KeyType, ScalarAttributeType,
};
use dynamap_model::StoreError;

/// Parsed key schema: the hash attribute and an optional range attribute.
#[derive(Debug, Clone)]
pub struct KeySchema {
    /// Hash key name and scalar type.
    pub hash: KeyAttribute,
    /// Range key name and scalar type, when composite.
    pub range: Option<KeyAttribute>,
}

/// One key attribute.
#[derive(Debug, Clone)]
pub struct KeyAttribute {
    /// The attribute name.
    pub name: String,
    /// The scalar type.
    pub attr_type: ScalarAttributeType,
}

impl KeySchema {
    /// Derives the parsed schema from wire key schema elements and the
    /// accompanying attribute definitions.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` when the hash key is missing or an
    /// attribute definition is absent.
    pub fn from_elements(
        elements: &[KeySchemaElement],
        definitions: &[AttributeDefinition],
    ) -> Result<Self, StoreError> {
        let attr_type = |name: &str| {
            definitions
                .iter()
                .find(|d| d.attribute_name == name)
                .map(|d| d.attribute_type)
                .ok_or_else(|| {
                    store_error!(
                        ValidationException,
                        format!("missing attribute definition for key '{name}'")
                    )
                })
        };

        let hash_element = elements
            .iter()
            .find(|e| e.key_type == KeyType::Hash)
            .ok_or_else(|| store_error!(ValidationException, "key schema has no HASH element"))?;
        let hash = KeyAttribute {
            name: hash_element.attribute_name.clone(),
            attr_type: attr_type(&hash_element.attribute_name)?,
        };

        let range = elements
            .iter()
            .find(|e| e.key_type == KeyType::Range)
            .map(|e| {
                Ok::<_, StoreError>(KeyAttribute {
                    name: e.attribute_name.clone(),
                    attr_type: attr_type(&e.attribute_name)?,
                })
            })
            .transpose()?;

        Ok(Self { hash, range })
    }
}

// ---------------------------------------------------------------------------
// SortKey
// ---------------------------------------------------------------------------

/// A key-eligible attribute value with total ordering, usable as a
/// `BTreeMap` key.
#[derive(Debug, Clone)]
pub enum SortKey {
    /// String key, byte-ordered.
    S(String),
    /// Number key, numerically ordered (held as its wire string).
    N(String),
    /// Binary key, byte-ordered.
    B(bytes::Bytes),
    /// Placeholder when the table has no range key.
    Sentinel,
}

impl SortKey {
    /// Builds a sort key from a key attribute value.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` for non-key-eligible variants.
    pub fn from_attribute(name: &str, value: &AttributeValue) -> Result<Self, StoreError> {
        match value {
            AttributeValue::S(s) => Ok(Self::S(s.clone())),
            AttributeValue::N(n) => Ok(Self::N(n.clone())),
            AttributeValue::B(b) => Ok(Self::B(b.clone())),
            other => Err(store_error!(
                ValidationException,
                format!(
                    "key attribute '{name}' must be S, N or B, got {}",
                    other.type_descriptor()
                )
            )),
        }
    }

    /// Converts back to an attribute value; `None` for the sentinel.
    #[must_use]
    pub fn to_attribute(&self) -> Option<AttributeValue> {
        match self {
            Self::S(s) => Some(AttributeValue::S(s.clone())),
            Self::N(n) => Some(AttributeValue::N(n.clone())),
            Self::B(b) => Some(AttributeValue::B(b.clone())),
            Self::Sentinel => None,
        }
    }
}

fn parse_number(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(f64::NAN)
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::S(a), Self::S(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::N(a), Self::N(b)) => parse_number(a)
                .partial_cmp(&parse_number(b))
                .unwrap_or(Ordering::Equal),
            (Self::B(a), Self::B(b)) => a.as_ref().cmp(b.as_ref()),
            (Self::Sentinel, Self::Sentinel) => Ordering::Equal,
            // Mixed variants should not share a map; order deterministically
            // anyway.
            (Self::S(_), _) => Ordering::Less,
            (_, Self::S(_)) => Ordering::Greater,
            (Self::N(_), _) => Ordering::Less,
            (_, Self::N(_)) => Ordering::Greater,
            (Self::B(_), _) => Ordering::Less,
            (_, Self::B(_)) => Ordering::Greater,
        }
    }
}

// ---------------------------------------------------------------------------
// MemTable
// ---------------------------------------------------------------------------

/// One in-memory table: metadata plus partitioned, sort-ordered items.
#[derive(Debug)]
pub struct MemTable {
    /// The table name.
    pub name: String,
    /// Parsed key schema.
    pub key_schema: KeySchema,
    /// Wire key schema, kept for `DescribeTable`.
    pub key_schema_elements: Vec<KeySchemaElement>,
    /// Wire attribute definitions, kept for `DescribeTable`.
    pub attribute_definitions: Vec<AttributeDefinition>,
    /// Global secondary index definitions.
    pub global_indexes: Vec<dynamap_model::types::GlobalSecondaryIndex>,
    /// Local secondary index definitions.
    pub local_indexes: Vec<dynamap_model::types::LocalSecondaryIndex>,
    /// Provisioned throughput, kept for `DescribeTable`.
    pub provisioned_throughput: Option<dynamap_model::types::ProvisionedThroughput>,
    partitions: DashMap<AttributeValue, BTreeMap<SortKey, Item>>,
}

impl MemTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(
        name: String,
        key_schema: KeySchema,
        key_schema_elements: Vec<KeySchemaElement>,
        attribute_definitions: Vec<AttributeDefinition>,
        global_indexes: Vec<dynamap_model::types::GlobalSecondaryIndex>,
        local_indexes: Vec<dynamap_model::types::LocalSecondaryIndex>,
        provisioned_throughput: Option<dynamap_model::types::ProvisionedThroughput>,
    ) -> Self {
        Self {
            name,
            key_schema,
            key_schema_elements,
            attribute_definitions,
            global_indexes,
            local_indexes,
            provisioned_throughput,
            partitions: DashMap::new(),
        }
    }

    /// The number of items in the table.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    /// Extracts `(hash value, sort key)` from a full item.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` when a key attribute is missing or
    /// has the wrong type.
    pub fn extract_key_from_item(
        &self,
        item: &Item,
    ) -> Result<(AttributeValue, SortKey), StoreError> {
        self.extract_key_parts(item)
    }

    /// Extracts `(hash value, sort key)` from a key map.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` when a key attribute is missing or
    /// has the wrong type.
    pub fn extract_key(&self, key: &Key) -> Result<(AttributeValue, SortKey), StoreError> {
        self.extract_key_parts(key)
    }

    fn extract_key_parts(&self, attrs: &Item) -> Result<(AttributeValue, SortKey), StoreError> {
        let hash_def = &self.key_schema.hash;
        let hash = attrs.get(&hash_def.name).ok_or_else(|| {
            store_error!(
                ValidationException,
                format!("missing key attribute '{}'", hash_def.name)
            )
        })?;
        validate_key_type(&hash_def.name, hash_def.attr_type, hash)?;

        let sort = match &self.key_schema.range {
            Some(range_def) => {
                let value = attrs.get(&range_def.name).ok_or_else(|| {
                    store_error!(
                        ValidationException,
                        format!("missing key attribute '{}'", range_def.name)
                    )
                })?;
                validate_key_type(&range_def.name, range_def.attr_type, value)?;
                SortKey::from_attribute(&range_def.name, value)?
            }
            None => SortKey::Sentinel,
        };

        Ok((hash.clone(), sort))
    }

    /// Inserts or replaces an item, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` when key attributes are missing or
    /// mistyped.
    pub fn put(&self, item: Item) -> Result<Option<Item>, StoreError> {
        let (hash, sort) = self.extract_key_from_item(&item)?;
        let mut partition = self.partitions.entry(hash).or_default();
        Ok(partition.insert(sort, item))
    }

    /// Fetches an item by key map.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` when key attributes are missing or
    /// mistyped.
    pub fn get(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        let (hash, sort) = self.extract_key(key)?;
        Ok(self
            .partitions
            .get(&hash)
            .and_then(|p| p.get(&sort).cloned()))
    }

    /// Deletes an item by key map, returning it when it existed.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` when key attributes are missing or
    /// mistyped.
    pub fn delete(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        let (hash, sort) = self.extract_key(key)?;
        let removed = self
            .partitions
            .get_mut(&hash)
            .and_then(|mut p| p.remove(&sort));
        Ok(removed)
    }

    /// Every item ordered by `(hash, sort)` with a deterministic hash
    /// ordering, for scans and query evaluation.
    #[must_use]
    pub fn all_items(&self) -> Vec<Item> {
        let mut partitions: Vec<_> = self
            .partitions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        partitions.sort_by(|(a, _), (b, _)| {
            SortKey::from_attribute("", a)
                .ok()
                .cmp(&SortKey::from_attribute("", b).ok())
        });
        partitions
            .into_iter()
            .flat_map(|(_, items)| items.into_values())
            .collect()
    }

    /// The primary-key map of an item.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` when key attributes are missing.
    pub fn key_of(&self, item: &Item) -> Result<Key, StoreError> {
        let mut key = Key::new();
        let (hash, sort) = self.extract_key_from_item(item)?;
        key.insert(self.key_schema.hash.name.clone(), hash);
        if let (Some(range_def), Some(attr)) = (&self.key_schema.range, sort.to_attribute()) {
            key.insert(range_def.name.clone(), attr);
        }
        Ok(key)
    }
}

fn validate_key_type(
    name: &str,
    expected: ScalarAttributeType,
    value: &AttributeValue,
) -> Result<(), StoreError> {
    let matches = matches!(
        (expected, value),
        (ScalarAttributeType::S, AttributeValue::S(_))
            | (ScalarAttributeType::N, AttributeValue::N(_))
            | (ScalarAttributeType::B, AttributeValue::B(_))
    );
    if matches {
        Ok(())
    } else {
        Err(store_error!(
            ValidationException,
            format!(
                "key attribute '{name}' has type {}, expected {expected}",
                value.type_descriptor()
            )
        ))
    }
}
