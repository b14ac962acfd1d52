//! Scan construction and iteration.
//!
//! Mirrors the query side without key conditions: a scan walks the whole
//! table (or an index) and filters server-side. Result order within a scan
//! is whatever the store returns.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use dynamap_model::input::ScanInput;
use dynamap_model::types::{Item, Select};

use crate::client::DynamapClient;
use crate::error::Result;
use crate::expression::{Condition, ExpressionCompiler};
use crate::record::{IndexRecord, Record};
use crate::schema::{SchemaError, TableSchema};

/// Pull-based iterator over scan results, decoded as `T`.
#[derive(Debug)]
pub struct ScanIter<T: Record> {
    client: DynamapClient,
    schema: Arc<TableSchema>,
    request: ScanInput,
    buffer: VecDeque<Item>,
    exhausted: bool,
    _marker: PhantomData<T>,
}

impl<T: Record> ScanIter<T> {
    pub(crate) fn new(client: DynamapClient, schema: Arc<TableSchema>, request: ScanInput) -> Self {
        Self {
            client,
            schema,
            request,
            buffer: VecDeque::new(),
            exhausted: false,
            _marker: PhantomData,
        }
    }

    /// The next record, or `None` when the scan is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or non-transient store error.
    pub async fn next(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return self.client.decode_item(&self.schema, &item).map(Some);
            }
            if self.exhausted {
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
                    async move { api.scan(input).await }
                },
                &[],
            )
            .await?;
        self.buffer.extend(out.items);
        if out.last_evaluated_key.is_empty() {
            self.exhausted = true;
        } else {
            self.request.exclusive_start_key = out.last_evaluated_key;
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

    /// Collects at most `limit` records.
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

/// Fluent, clone-safe construction of a scan against one table.
#[derive(Debug, Clone)]
pub struct ScanBuilder<T: Record> {
    client: DynamapClient,
    schema: Arc<TableSchema>,
    request: ScanInput,
    filter_expr: Option<String>,
    filter_compiler: ExpressionCompiler,
    _marker: PhantomData<T>,
}

impl<T: Record> ScanBuilder<T> {
    fn new(client: DynamapClient, schema: Arc<TableSchema>) -> Self {
        let codec = Arc::clone(&client.codec);
        let request = ScanInput {
            table_name: schema.name.clone(),
            consistent_read: Some(client.config.consistent_read),
            ..Default::default()
        };
        Self {
            filter_compiler: ExpressionCompiler::new(Arc::clone(&schema), codec, "p"),
            client,
            schema,
            request,
            filter_expr: None,
            _marker: PhantomData,
        }
    }

    /// Compiles a predicate onto the filter expression, `AND`-joined with
    /// any previous filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expression`](crate::Error::Expression) when the
    /// predicate does not compile.
    pub fn filter(mut self, condition: &Condition) -> Result<Self> {
        let fragment = self.filter_compiler.compile(condition)?;
        self.filter_expr = Some(match self.filter_expr.take() {
            Some(previous) => format!("({previous}) AND ({fragment})"),
            None => fragment,
        });
        Ok(self)
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

    /// Projects every base-table field.
    #[must_use]
    pub fn select_table_fields(self) -> Self {
        let names: Vec<String> = self.schema.fields.iter().map(|f| f.name.clone()).collect();
        let fields: Vec<&str> = names.iter().map(String::as_str).collect();
        self.select_fields(&fields)
    }

    /// Per-request page size.
    #[must_use]
    pub fn paging_limit(mut self, limit: i32) -> Self {
        self.request.limit = Some(limit);
        self
    }

    fn finish(&mut self) -> ScanInput {
        let mut request = self.request.clone();
        request.filter_expression = self.filter_expr.clone();
        request
            .expression_attribute_names
            .extend(self.filter_compiler.names().clone());
        request
            .expression_attribute_values
            .extend(self.filter_compiler.values().clone());
        if request.limit.is_none() {
            request.limit = Some(self.client.config.paging_limit);
        }
        request
    }

    /// The assembled request (placeholder maps merged in).
    #[must_use]
    pub fn build(mut self) -> ScanInput {
        self.finish()
    }

    /// Executes lazily.
    #[must_use]
    pub fn exec(mut self) -> ScanIter<T> {
        let request = self.finish();
        ScanIter::new(self.client, self.schema, request)
    }

    /// Executes, collecting at most `limit` records.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or non-transient store error.
    pub async fn exec_limit(mut self, limit: usize) -> Result<Vec<T>> {
        let mut request = self.finish();
        if request.limit == Some(self.client.config.paging_limit) {
            request.limit = Some(i32::try_from(limit).unwrap_or(i32::MAX));
        }
        ScanIter::new(self.client, self.schema, request)
            .take(limit)
            .await
    }

    /// Executes lazily, decoding results into a different record shape.
    #[must_use]
    pub fn exec_into<R: Record>(mut self) -> ScanIter<R> {
        let request = self.finish();
        ScanIter::new(self.client, self.schema, request)
    }
}

// ---------------------------------------------------------------------------
// Client surface
// ---------------------------------------------------------------------------

impl DynamapClient {
    /// Seeds a scan builder against a record's base table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`](crate::Error::Schema) when the type's
    /// shape is inconsistent.
    pub fn from_scan<T: Record>(&self) -> Result<ScanBuilder<T>> {
        let schema = self.table::<T>()?;
        Ok(ScanBuilder::new(self.clone(), schema))
    }

    /// Seeds a scan builder with an initial filter predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expression`](crate::Error::Expression) when the
    /// predicate does not compile.
    pub fn from_scan_with<T: Record>(&self, filter: &Condition) -> Result<ScanBuilder<T>> {
        self.from_scan::<T>()?.filter(filter)
    }

    /// Seeds a scan builder routed through the index `I` declares.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`](crate::Error::Schema) when the index is
    /// not declared on the table.
    pub fn from_scan_index<I: IndexRecord>(&self) -> Result<ScanBuilder<I>> {
        let table_schema = self.table::<I::Table>()?;
        let index_name = I::index_name();
        let index = table_schema.index(&index_name).ok_or_else(|| {
            SchemaError::invalid(format!(
                "table {} does not declare index '{index_name}'",
                table_schema.name
            ))
        })?;
        let global = index.global;
        let mut builder: ScanBuilder<I> = ScanBuilder::new(self.clone(), table_schema);
        builder.request.index_name = Some(index_name);
        if global {
            builder.request.consistent_read = None;
        }
        Ok(builder)
    }

    /// Runs a prepared scan lazily.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`](crate::Error::Schema) when the type's
    /// shape is inconsistent.
    pub fn scan<T: Record>(&self, request: ScanInput) -> Result<ScanIter<T>> {
        let schema = self.table::<T>()?;
        Ok(ScanIter::new(self.clone(), schema, request))
    }

    /// Runs a prepared scan, collecting at most `limit` records. Sets the
    /// request's page size to `limit` when none was set.
    ///
    /// # Errors
    ///
    /// Returns the first decoding or non-transient store error.
    pub async fn scan_limit<T: Record>(
        &self,
        mut request: ScanInput,
        limit: usize,
    ) -> Result<Vec<T>> {
        if request.limit.is_none() {
            request.limit = Some(i32::try_from(limit).unwrap_or(i32::MAX));
        }
        self.scan::<T>(request)?.take(limit).await
    }
}
