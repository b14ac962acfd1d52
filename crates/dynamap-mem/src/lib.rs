//! In-memory [`StoreApi`] implementation.
//!
//! A faithful-enough store double for exercising the mapping engine end to
//! end: real key schemas, sort ordering, pagination cursors, and evaluated
//! key-condition/filter expressions, with none of the network. Tables are
//! active the moment they are created.
//!
//! This crate exists for tests and local development; it is not a hosted
//! store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use dynamap_model::api::{StoreApi, StoreResult};
use dynamap_model::input::{
    BatchGetItemInput, BatchWriteItemInput, CreateTableInput, DeleteItemInput, DeleteTableInput,
    DescribeTableInput, GetItemInput, ListTablesInput, PutItemInput, QueryInput, ScanInput,
    UpdateItemInput,
};
use dynamap_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, CreateTableOutput, DeleteItemOutput,
    DeleteTableOutput, DescribeTableOutput, GetItemOutput, ListTablesOutput, PutItemOutput,
    QueryOutput, ScanOutput, UpdateItemOutput,
};
use dynamap_model::store_error;
use dynamap_model::types::{
    Item, Key, ReturnValue, SecondaryIndexDescription, TableDescription, TableStatus,
};
use dynamap_model::{AttributeValue, StoreError};

mod eval;
mod table;

pub use eval::{
    AddAction, CompareOp, EvalContext, EvalError, Expr, Operand, parse_condition, parse_update,
};
pub use table::{KeyAttribute, KeySchema, MemTable, SortKey};

/// An in-memory store holding any number of tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: DashMap<String, Arc<MemTable>>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every table.
    pub fn reset(&self) {
        self.tables.clear();
    }

    fn require(&self, name: &str) -> Result<Arc<MemTable>, StoreError> {
        self.tables
            .get(name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| {
                StoreError::resource_not_found(format!("table not found: {name}"))
            })
    }
}

fn eval_to_store(err: EvalError) -> StoreError {
    StoreError::validation(err.to_string())
}

fn description(table: &MemTable, status: TableStatus) -> TableDescription {
    TableDescription {
        table_name: Some(table.name.clone()),
        table_status: Some(status),
        key_schema: table.key_schema_elements.clone(),
        attribute_definitions: table.attribute_definitions.clone(),
        provisioned_throughput: table.provisioned_throughput.clone(),
        global_secondary_indexes: table
            .global_indexes
            .iter()
            .map(|ix| SecondaryIndexDescription {
                index_name: Some(ix.index_name.clone()),
                key_schema: ix.key_schema.clone(),
                projection: Some(ix.projection.clone()),
            })
            .collect(),
        local_secondary_indexes: table
            .local_indexes
            .iter()
            .map(|ix| SecondaryIndexDescription {
                index_name: Some(ix.index_name.clone()),
                key_schema: ix.key_schema.clone(),
                projection: Some(ix.projection.clone()),
            })
            .collect(),
        item_count: Some(i64::try_from(table.item_count()).unwrap_or(i64::MAX)),
    }
}

/// The `(hash, range)` attribute names a query traverses: the index keys
/// when an index is named, the table keys otherwise.
fn traversal_keys(
    table: &MemTable,
    index_name: Option<&str>,
) -> Result<(String, Option<String>), StoreError> {
    let Some(index_name) = index_name else {
        return Ok((
            table.key_schema.hash.name.clone(),
            table.key_schema.range.as_ref().map(|r| r.name.clone()),
        ));
    };
    let from_schema = |schema: &[dynamap_model::types::KeySchemaElement]| {
        let hash = schema
            .iter()
            .find(|e| e.key_type == dynamap_model::types::KeyType::Hash)
            .map(|e| e.attribute_name.clone())
            .unwrap_or_default();
        let range = schema
            .iter()
            .find(|e| e.key_type == dynamap_model::types::KeyType::Range)
            .map(|e| e.attribute_name.clone());
        (hash, range)
    };
    if let Some(gsi) = table
        .global_indexes
        .iter()
        .find(|ix| ix.index_name == index_name)
    {
        return Ok(from_schema(&gsi.key_schema));
    }
    if let Some(lsi) = table
        .local_indexes
        .iter()
        .find(|ix| ix.index_name == index_name)
    {
        return Ok(from_schema(&lsi.key_schema));
    }
    Err(store_error!(
        ValidationException,
        format!("table {} has no index named {index_name}", table.name)
    ))
}

fn sort_for(item: &Item, field: &str) -> SortKey {
    item.get(field)
        .and_then(|attr| SortKey::from_attribute(field, attr).ok())
        .unwrap_or(SortKey::Sentinel)
}

fn sort_items(items: &mut [Item], hash_field: &str, range_field: Option<&str>) {
    items.sort_by(|a, b| {
        let hash_cmp = sort_for(a, hash_field).cmp(&sort_for(b, hash_field));
        match (hash_cmp, range_field) {
            (std::cmp::Ordering::Equal, Some(range)) => {
                sort_for(a, range).cmp(&sort_for(b, range))
            }
            (other, _) => other,
        }
    });
}

/// Slices a traversal into one page: skips past the exclusive start key,
/// takes the page limit, and reports the continuation key when items
/// remain beyond the page.
fn paginate(
    table: &MemTable,
    items: Vec<Item>,
    exclusive_start_key: &Key,
    limit: Option<i32>,
) -> Result<(Vec<Item>, Key), StoreError> {
    let start = if exclusive_start_key.is_empty() {
        0
    } else {
        items
            .iter()
            .position(|item| key_matches(item, exclusive_start_key))
            .map_or(0, |idx| idx + 1)
    };
    let limit = limit.map_or(usize::MAX, |l| usize::try_from(l.max(0)).unwrap_or(0));
    let page: Vec<Item> = items.iter().skip(start).take(limit).cloned().collect();
    let has_more = start + page.len() < items.len();
    let last_evaluated_key = if has_more {
        page.last().map_or_else(|| Ok(Key::new()), |i| table.key_of(i))?
    } else {
        Key::new()
    };
    Ok((page, last_evaluated_key))
}

fn key_matches(item: &Item, key: &Key) -> bool {
    key.iter()
        .all(|(name, value)| item.get(name) == Some(value))
}

fn apply_filter(
    page: Vec<Item>,
    filter: Option<&eval::Expr>,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<Vec<Item>, StoreError> {
    let Some(filter) = filter else {
        return Ok(page);
    };
    let mut kept = Vec::with_capacity(page.len());
    for item in page {
        let ctx = EvalContext {
            item: &item,
            names,
            values,
        };
        if ctx.eval(filter).map_err(eval_to_store)? {
            kept.push(item);
        }
    }
    Ok(kept)
}

fn add_numbers(existing: Option<&AttributeValue>, delta: &AttributeValue) -> Result<String, StoreError> {
    let delta = delta.as_n().ok_or_else(|| {
        store_error!(ValidationException, "ADD requires a number operand")
    })?;
    let current = match existing {
        Some(attr) => attr.as_n().ok_or_else(|| {
            store_error!(ValidationException, "ADD target is not a number")
        })?,
        None => "0",
    };
    match (current.parse::<i64>(), delta.parse::<i64>()) {
        (Ok(a), Ok(b)) => Ok((a + b).to_string()),
        _ => {
            let a = current.parse::<f64>().unwrap_or(0.0);
            let b = delta.parse::<f64>().unwrap_or(0.0);
            Ok((a + b).to_string())
        }
    }
}

#[async_trait]
impl StoreApi for MemoryStore {
    async fn list_tables(&self, input: ListTablesInput) -> StoreResult<ListTablesOutput> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        let start = input.exclusive_start_table_name.as_ref().map_or(0, |from| {
            names
                .iter()
                .position(|n| n.as_str() > from.as_str())
                .unwrap_or(names.len())
        });
        let limit = usize::try_from(input.limit.unwrap_or(100).clamp(1, 100)).unwrap_or(100);
        let page: Vec<String> = names.iter().skip(start).take(limit).cloned().collect();
        let last_evaluated_table_name = if start + page.len() < names.len() {
            page.last().cloned()
        } else {
            None
        };
        Ok(ListTablesOutput {
            table_names: page,
            last_evaluated_table_name,
        })
    }

    async fn create_table(&self, input: CreateTableInput) -> StoreResult<CreateTableOutput> {
        let key_schema =
            KeySchema::from_elements(&input.key_schema, &input.attribute_definitions)?;
        let table = MemTable::new(
            input.table_name.clone(),
            key_schema,
            input.key_schema,
            input.attribute_definitions,
            input.global_secondary_indexes,
            input.local_secondary_indexes,
            input.provisioned_throughput,
        );
        let table = Arc::new(table);
        match self.tables.entry(input.table_name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::resource_in_use(
                format!("table already exists: {}", input.table_name),
            )),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&table));
                debug!(table = %table.name, "created table");
                Ok(CreateTableOutput {
                    table_description: Some(description(&table, TableStatus::Active)),
                })
            }
        }
    }

    async fn delete_table(&self, input: DeleteTableInput) -> StoreResult<DeleteTableOutput> {
        let (_, table) = self.tables.remove(&input.table_name).ok_or_else(|| {
            StoreError::resource_not_found(format!("table not found: {}", input.table_name))
        })?;
        debug!(table = %table.name, "deleted table");
        Ok(DeleteTableOutput {
            table_description: Some(description(&table, TableStatus::Deleting)),
        })
    }

    async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> StoreResult<DescribeTableOutput> {
        let table = self.require(&input.table_name)?;
        Ok(DescribeTableOutput {
            table: Some(description(&table, TableStatus::Active)),
        })
    }

    async fn get_item(&self, input: GetItemInput) -> StoreResult<GetItemOutput> {
        let table = self.require(&input.table_name)?;
        Ok(GetItemOutput {
            item: table.get(&input.key)?,
        })
    }

    async fn put_item(&self, input: PutItemInput) -> StoreResult<PutItemOutput> {
        let table = self.require(&input.table_name)?;
        let previous = table.put(input.item)?;
        let attributes = match (input.return_values, previous) {
            (Some(ReturnValue::AllOld), Some(old)) => old,
            _ => Item::new(),
        };
        Ok(PutItemOutput { attributes })
    }

    async fn update_item(&self, input: UpdateItemInput) -> StoreResult<UpdateItemOutput> {
        let table = self.require(&input.table_name)?;
        let expression = input.update_expression.as_deref().ok_or_else(|| {
            store_error!(ValidationException, "UpdateItem requires an UpdateExpression")
        })?;
        let actions = parse_update(expression).map_err(eval_to_store)?;

        // Start from the stored item, or from the key attributes alone.
        let mut item = table.get(&input.key)?.unwrap_or_else(|| input.key.clone());
        let mut updated: Vec<String> = Vec::new();
        for action in actions {
            let name = match &action.path {
                Operand::Path(path) if path.starts_with('#') => input
                    .expression_attribute_names
                    .get(path)
                    .cloned()
                    .ok_or_else(|| {
                        store_error!(
                            ValidationException,
                            format!("unresolved expression attribute name {path}")
                        )
                    })?,
                Operand::Path(path) => path.clone(),
                Operand::ValueRef(_) => {
                    return Err(store_error!(
                        ValidationException,
                        "ADD target must be an attribute path"
                    ));
                }
            };
            let value = match &action.value {
                Operand::ValueRef(v) => input
                    .expression_attribute_values
                    .get(&format!(":{v}"))
                    .ok_or_else(|| {
                        store_error!(
                            ValidationException,
                            format!("unresolved expression attribute value :{v}")
                        )
                    })?,
                Operand::Path(_) => {
                    return Err(store_error!(
                        ValidationException,
                        "ADD operand must be an expression attribute value"
                    ));
                }
            };
            let sum = add_numbers(item.get(&name), value)?;
            item.insert(name.clone(), AttributeValue::N(sum));
            updated.push(name);
        }
        table.put(item.clone())?;

        let attributes = match input.return_values {
            Some(ReturnValue::AllNew) => item,
            Some(ReturnValue::UpdatedNew) => item
                .into_iter()
                .filter(|(name, _)| updated.contains(name))
                .collect(),
            _ => Item::new(),
        };
        Ok(UpdateItemOutput { attributes })
    }

    async fn delete_item(&self, input: DeleteItemInput) -> StoreResult<DeleteItemOutput> {
        let table = self.require(&input.table_name)?;
        let previous = table.delete(&input.key)?;
        let attributes = match (input.return_values, previous) {
            (Some(ReturnValue::AllOld), Some(old)) => old,
            _ => Item::new(),
        };
        Ok(DeleteItemOutput { attributes })
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> StoreResult<BatchGetItemOutput> {
        let total: usize = input.request_items.values().map(|ka| ka.keys.len()).sum();
        if total == 0 || total > 100 {
            return Err(store_error!(
                ValidationException,
                format!("BatchGetItem accepts between 1 and 100 keys, got {total}")
            ));
        }
        let mut responses: HashMap<String, Vec<Item>> = HashMap::new();
        for (table_name, keys_and_attrs) in input.request_items {
            let table = self.require(&table_name)?;
            let found = responses.entry(table_name).or_default();
            for key in &keys_and_attrs.keys {
                if let Some(item) = table.get(key)? {
                    found.push(item);
                }
            }
        }
        Ok(BatchGetItemOutput {
            responses,
            unprocessed_keys: HashMap::new(),
        })
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> StoreResult<BatchWriteItemOutput> {
        let total: usize = input.request_items.values().map(Vec::len).sum();
        if total == 0 || total > 25 {
            return Err(store_error!(
                ValidationException,
                format!("BatchWriteItem accepts between 1 and 25 requests, got {total}")
            ));
        }
        for (table_name, requests) in input.request_items {
            let table = self.require(&table_name)?;
            for request in requests {
                match (request.put_request, request.delete_request) {
                    (Some(put), None) => {
                        table.put(put.item)?;
                    }
                    (None, Some(delete)) => {
                        table.delete(&delete.key)?;
                    }
                    _ => {
                        return Err(store_error!(
                            ValidationException,
                            "WriteRequest must carry exactly one of PutRequest or DeleteRequest"
                        ));
                    }
                }
            }
        }
        Ok(BatchWriteItemOutput {
            unprocessed_items: HashMap::new(),
        })
    }

    async fn query(&self, input: QueryInput) -> StoreResult<QueryOutput> {
        let table = self.require(&input.table_name)?;
        let key_expression = input.key_condition_expression.as_deref().ok_or_else(|| {
            store_error!(ValidationException, "Query requires a KeyConditionExpression")
        })?;
        let key_ast = parse_condition(key_expression).map_err(eval_to_store)?;
        let filter_ast = input
            .filter_expression
            .as_deref()
            .map(parse_condition)
            .transpose()
            .map_err(eval_to_store)?;

        let (hash_field, range_field) = traversal_keys(&table, input.index_name.as_deref())?;

        let mut candidates = Vec::new();
        for item in table.all_items() {
            // Items missing the index hash attribute are not in the index.
            if !item.contains_key(&hash_field) {
                continue;
            }
            let ctx = EvalContext {
                item: &item,
                names: &input.expression_attribute_names,
                values: &input.expression_attribute_values,
            };
            if ctx.eval(&key_ast).map_err(eval_to_store)? {
                candidates.push(item);
            }
        }
        sort_items(&mut candidates, &hash_field, range_field.as_deref());
        if !input.scan_index_forward.unwrap_or(true) {
            candidates.reverse();
        }

        let (page, last_evaluated_key) =
            paginate(&table, candidates, &input.exclusive_start_key, input.limit)?;
        let scanned_count = i32::try_from(page.len()).unwrap_or(i32::MAX);
        let items = apply_filter(
            page,
            filter_ast.as_ref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        Ok(QueryOutput {
            count: i32::try_from(items.len()).unwrap_or(i32::MAX),
            scanned_count,
            items,
            last_evaluated_key,
        })
    }

    async fn scan(&self, input: ScanInput) -> StoreResult<ScanOutput> {
        let table = self.require(&input.table_name)?;
        let filter_ast = input
            .filter_expression
            .as_deref()
            .map(parse_condition)
            .transpose()
            .map_err(eval_to_store)?;

        let (page, last_evaluated_key) = paginate(
            &table,
            table.all_items(),
            &input.exclusive_start_key,
            input.limit,
        )?;
        let scanned_count = i32::try_from(page.len()).unwrap_or(i32::MAX);
        let items = apply_filter(
            page,
            filter_ast.as_ref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        Ok(ScanOutput {
            count: i32::try_from(items.len()).unwrap_or(i32::MAX),
            scanned_count,
            items,
            last_evaluated_key,
        })
    }
}
