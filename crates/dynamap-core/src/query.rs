//! Query construction and iteration.
//!
//! [`QueryBuilder`] assembles a `Query` request from typed predicates;
//! [`QueryIter`] pulls results page by page, issuing the next request only
//! when the current page is exhausted and the store reported a non-empty
//! continuation key.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use dynamap_model::input::QueryInput;
use dynamap_model::types::{Item, Select};

use crate::client::DynamapClient;
use crate::error::{Error, Result};
use crate::expression::{Condition, ExpressionCompiler, ExpressionError};
use crate::record::{IndexRecord, Record};
use crate::schema::{SchemaError, TableSchema};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Lazy iteration
// ---------------------------------------------------------------------------

/// Paging state: a fresh iterator has issued nothing; between pages the
/// previous continuation key is wired into the request; done means the
/// store returned an empty continuation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    Fresh,
    Between,
    Done,
}

/// Pull-based iterator over query results, decoded as `T`.
#[derive(Debug)]
pub struct QueryIter<T: Record> {
    client: DynamapClient,
    schema: Arc<TableSchema>,
    request: QueryInput,
    buffer: VecDeque<Item>,
    state: PageState,
    _marker: PhantomData<T>,
}

impl<T: Record> QueryIter<T> {
    pub(crate) fn new(client: DynamapClient, schema: Arc<TableSchema>, request: QueryInput) -> Self {
        Self {
            client,
            schema,
            request,
            buffer: VecDeque::new(),
            state: PageState::Fresh,
            _marker: PhantomData,
        }
    }

    /// The next record, or `None` when the query is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or non-transient store error.
    pub async fn next(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return self.client.decode_item(&self.schema, &item).map(Some);
            }
            if self.state == PageState::Done {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// The next raw item, undecoded.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn next_item(&mut self) -> Result<Option<Item>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.state == PageState::Done {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let api = Arc::clone(&self.client.api);
        let input = self.request.clone();
        let out = self
            .client
            .exec(
                move || {
                    let api = Arc::clone(&api);
                    let input = input.clone();
                    async move { api.query(input).await }
                },
                &[],
            )
            .await?;
        self.buffer.extend(out.items);
        if out.last_evaluated_key.is_empty() {
            self.state = PageState::Done;
        } else {
            self.request.exclusive_start_key = out.last_evaluated_key;
            self.state = PageState::Between;
        }
        Ok(())
    }

    /// Drains the iterator into a vector.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or non-transient store error.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(record) = self.next().await? {
            out.push(record);
        }
        Ok(out)
    }

    /// Collects at most `limit` records, stopping as soon as the bound is
    /// reached.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or non-transient store error.
    pub async fn take(mut self, limit: usize) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while out.len() < limit {
            match self.next().await? {
                Some(record) => out.push(record),
                None => break,
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Fluent, clone-safe construction of a query against one table.
#[derive(Debug, Clone)]
pub struct QueryBuilder<T: Record> {
    client: DynamapClient,
    schema: Arc<TableSchema>,
    request: QueryInput,
    key_expr: Option<String>,
    filter_expr: Option<String>,
    key_compiler: ExpressionCompiler,
    filter_compiler: ExpressionCompiler,
    _marker: PhantomData<T>,
}

impl<T: Record> QueryBuilder<T> {
    fn new(client: DynamapClient, schema: Arc<TableSchema>) -> Self {
        let codec = Arc::clone(&client.codec);
        let request = QueryInput {
            table_name: schema.name.clone(),
            consistent_read: Some(client.config.consistent_read),
            scan_index_forward: Some(client.config.scan_index_forward),
            ..Default::default()
        };
        Self {
            key_compiler: ExpressionCompiler::new(Arc::clone(&schema), Arc::clone(&codec), "k"),
            filter_compiler: ExpressionCompiler::new(Arc::clone(&schema), codec, "p"),
            client,
            schema,
            request,
            key_expr: None,
            filter_expr: None,
            _marker: PhantomData,
        }
    }

    /// Compiles a predicate onto the key condition, `AND`-joined with any
    /// previous key condition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expression`] when the predicate does not compile.
    pub fn key_condition(mut self, condition: &Condition) -> Result<Self> {
        let fragment = self.key_compiler.compile(condition)?;
        self.key_expr = Some(join_and(self.key_expr.take(), fragment));
        Ok(self)
    }

    /// Compiles a predicate onto the filter expression, `AND`-joined with
    /// any previous filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expression`] when the predicate does not compile.
    pub fn filter(mut self, condition: &Condition) -> Result<Self> {
        let fragment = self.filter_compiler.compile(condition)?;
        self.filter_expr = Some(join_and(self.filter_expr.take(), fragment));
        Ok(self)
    }

    /// Like [`key_condition`](Self::key_condition), but additionally routes
    /// the query through a secondary index. With no explicit `name` the
    /// predicate must reference exactly one field and that field must
    /// resolve to an index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the index cannot be resolved.
    pub fn local_index(self, condition: &Condition, name: Option<&str>) -> Result<Self> {
        let index_name = match name {
            Some(name) => {
                self.schema
                    .index(name)
                    .ok_or_else(|| {
                        SchemaError::invalid(format!(
                            "table {} has no index named '{name}'",
                            self.schema.name
                        ))
                    })?
                    .name
                    .clone()
            }
            None => {
                let referenced = condition.referenced_fields();
                let [field] = referenced.as_slice() else {
                    return Err(SchemaError::invalid(format!(
                        "cannot infer an index from a predicate referencing {} fields",
                        referenced.len()
                    ))
                    .into());
                };
                self.schema
                    .index_for_field(field)
                    .ok_or_else(|| {
                        SchemaError::invalid(format!(
                            "field '{field}' does not resolve to an index on table {}",
                            self.schema.name
                        ))
                    })?
                    .name
                    .clone()
            }
        };
        let mut builder = self.key_condition(condition)?;
        builder.request.index_name = Some(index_name);
        Ok(builder)
    }

    /// Projects a literal field list.
    #[must_use]
    pub fn select_fields(mut self, fields: &[&str]) -> Self {
        self.request.projection_expression = Some(fields.join(", "));
        self.request.select = Some(Select::SpecificAttributes);
        self
    }

    /// Projects the intersection of another record shape's fields with
    /// this table's fields.
    #[must_use]
    pub fn select_into<M: Record>(self) -> Self {
        let shape = M::shape();
        let fields: Vec<&str> = shape
            .fields
            .iter()
            .map(|f| f.resolved_name())
            .filter(|name| self.schema.field(name).is_some())
            .collect();
        self.select_fields(&fields)
    }

    /// Projects every base-table field. Useful when querying an index that
    /// projects only a subset.
    #[must_use]
    pub fn select_table_fields(self) -> Self {
        let names: Vec<String> = self.schema.fields.iter().map(|f| f.name.clone()).collect();
        let fields: Vec<&str> = names.iter().map(String::as_str).collect();
        self.select_fields(&fields)
    }

    /// Ascending traversal order.
    #[must_use]
    pub fn order_ascending(mut self) -> Self {
        self.request.scan_index_forward = Some(true);
        self
    }

    /// Descending traversal order.
    #[must_use]
    pub fn order_descending(mut self) -> Self {
        self.request.scan_index_forward = Some(false);
        self
    }

    /// Per-request page size.
    #[must_use]
    pub fn paging_limit(mut self, limit: i32) -> Self {
        self.request.limit = Some(limit);
        self
    }

    /// The assembled request (placeholder maps merged in).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expression`] when no key condition was supplied.
    pub fn build(mut self) -> Result<QueryInput> {
        self.finish()
    }

    fn finish(&mut self) -> Result<QueryInput> {
        // A query must select a partition; a builder whose key compiler
        // produced no placeholders has nothing to send.
        if self.key_compiler.is_empty() {
            return Err(ExpressionError::NoPlaceholders {
                context: "a query requires a key condition".to_owned(),
            }
            .into());
        }
        let mut request = self.request.clone();
        request.key_condition_expression = self.key_expr.clone();
        request.filter_expression = self.filter_expr.clone();
        let (key_names, key_values) = (
            self.key_compiler.names().clone(),
            self.key_compiler.values().clone(),
        );
        let (filter_names, filter_values) = (
            self.filter_compiler.names().clone(),
            self.filter_compiler.values().clone(),
        );
        request.expression_attribute_names.extend(key_names);
        request.expression_attribute_names.extend(filter_names);
        request.expression_attribute_values.extend(key_values);
        request.expression_attribute_values.extend(filter_values);
        if request.limit.is_none() {
            request.limit = Some(self.client.config.paging_limit);
        }
        Ok(request)
    }

    /// Executes lazily.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expression`] when no key condition was supplied.
    pub fn exec(mut self) -> Result<QueryIter<T>> {
        let request = self.finish()?;
        Ok(QueryIter::new(self.client, self.schema, request))
    }

    /// Executes, collecting at most `limit` records.
    ///
    /// # Errors
    ///
    /// Returns the first expression, decoding or non-transient store
    /// error.
    pub async fn exec_limit(mut self, limit: usize) -> Result<Vec<T>> {
        let mut request = self.finish()?;
        if request.limit == Some(self.client.config.paging_limit) {
            request.limit = Some(i32::try_from(limit).unwrap_or(i32::MAX));
        }
        QueryIter::new(self.client, self.schema, request)
            .take(limit)
            .await
    }

    /// Executes lazily, decoding results into a different record shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expression`] when no key condition was supplied.
    pub fn exec_into<R: Record>(mut self) -> Result<QueryIter<R>> {
        let request = self.finish()?;
        Ok(QueryIter::new(self.client, self.schema, request))
    }

    /// Executes with a single-attribute projection, yielding that
    /// attribute's decoded values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] for unknown fields, otherwise the first
    /// decoding or non-transient store error.
    pub async fn exec_column(self, field: &str) -> Result<Vec<Value>> {
        let schema = Arc::clone(&self.schema);
        let field_schema = schema
            .field(field)
            .ok_or_else(|| {
                SchemaError::invalid(format!(
                    "table {} has no field '{field}'",
                    schema.name
                ))
            })?
            .clone();
        let codec = Arc::clone(&self.client.codec);
        let attr_name = codec.attribute_name(&field_schema);
        let mut builder = self.select_fields(&[field]);
        let request = builder.finish()?;
        let mut iter: QueryIter<T> = QueryIter::new(builder.client, builder.schema, request);
        let mut out = Vec::new();
        while let Some(item) = iter.next_item().await? {
            match item.get(&attr_name) {
                Some(attr) => out.push(codec.decode(&field_schema, attr).map_err(Error::from)?),
                None => out.push(Value::Null),
            }
        }
        Ok(out)
    }
}

fn join_and(previous: Option<String>, fragment: String) -> String {
    match previous {
        Some(previous) => format!("({previous}) AND ({fragment})"),
        None => fragment,
    }
}

// ---------------------------------------------------------------------------
// Client surface
// ---------------------------------------------------------------------------

impl DynamapClient {
    /// Seeds a query builder against a record's base table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the type's shape is inconsistent.
    pub fn from_query<T: Record>(&self) -> Result<QueryBuilder<T>> {
        let schema = self.table::<T>()?;
        Ok(QueryBuilder::new(self.clone(), schema))
    }

    /// Seeds a query builder with an initial key predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expression`] when the predicate does not compile.
    pub fn from_query_with<T: Record>(&self, key_condition: &Condition) -> Result<QueryBuilder<T>> {
        self.from_query::<T>()?.key_condition(key_condition)
    }

    /// Seeds a query builder routed through the index `I` declares. Global
    /// indexes leave `ConsistentRead` unset (reads through them are always
    /// best-effort).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the index is not declared on the
    /// table.
    pub fn from_query_index<I: IndexRecord>(&self) -> Result<QueryBuilder<I>> {
        let table_schema = self.table::<I::Table>()?;
        let index_name = I::index_name();
        let index = table_schema.index(&index_name).ok_or_else(|| {
            SchemaError::invalid(format!(
                "table {} does not declare index '{index_name}'",
                table_schema.name
            ))
        })?;
        let global = index.global;
        let mut builder: QueryBuilder<I> = QueryBuilder::new(self.clone(), table_schema);
        builder.request.index_name = Some(index_name);
        if global {
            builder.request.consistent_read = None;
        }
        Ok(builder)
    }

    /// Runs a prepared query lazily.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the type's shape is inconsistent.
    pub fn query<T: Record>(&self, request: QueryInput) -> Result<QueryIter<T>> {
        let schema = self.table::<T>()?;
        Ok(QueryIter::new(self.clone(), schema, request))
    }

    /// Runs a prepared query, collecting at most `limit` records. Sets the
    /// request's page size to `limit` when none was set.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or non-transient store error.
    pub async fn query_limit<T: Record>(
        &self,
        mut request: QueryInput,
        limit: usize,
    ) -> Result<Vec<T>> {
        if request.limit.is_none() {
            request.limit = Some(i32::try_from(limit).unwrap_or(i32::MAX));
        }
        self.query::<T>(request)?.take(limit).await
    }

    /// Lazily yields the children stored under a parent hash key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expression`] when the key predicate does not
    /// compile.
    pub fn get_related<T: Record, H: Into<Value>>(&self, parent_hash: H) -> Result<QueryIter<T>> {
        let schema = self.table::<T>()?;
        let mut compiler = ExpressionCompiler::new(
            Arc::clone(&schema),
            Arc::clone(&self.codec),
            "k",
        );
        let condition = Condition::eq(schema.hash_key.name.clone(), parent_hash.into());
        let expression = compiler.compile(&condition)?;
        let (names, values) = compiler.take_maps();
        let request = QueryInput {
            table_name: schema.name.clone(),
            key_condition_expression: Some(expression),
            expression_attribute_names: names,
            expression_attribute_values: values,
            consistent_read: Some(self.config.consistent_read),
            scan_index_forward: Some(self.config.scan_index_forward),
            limit: Some(self.config.paging_limit),
            ..Default::default()
        };
        Ok(QueryIter::new(self.clone(), schema, request))
    }
}
