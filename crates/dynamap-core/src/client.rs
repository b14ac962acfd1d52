//! The request engine: typed operations over a store handle.
//!
//! One [`DynamapClient`] owns a transport handle, a codec, and a reference
//! to the process-wide schema registry. Every operation is a self-contained
//! round-trip (or bounded loop of round-trips) through the [`exec`]
//! retry wrapper, so the client is safe to share across concurrent tasks.
//!
//! [`exec`]: DynamapClient::exec

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info};

use dynamap_model::api::{StoreApi, StoreResult};
use dynamap_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, DeleteTableInput, DescribeTableInput,
    GetItemInput, ListTablesInput, PutItemInput, UpdateItemInput,
};
use dynamap_model::types::{
    Item, Key, KeysAndAttributes, ReturnValue, TableStatus, WriteRequest,
};
use dynamap_model::{AttributeValue, StoreErrorCode};

use crate::codec::Codec;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::schema::{SchemaError, SchemaRegistry, TableSchema};
use crate::sequence::Seq;
use crate::value::Value;

/// The store accepts at most this many keys per `BatchGetItem`.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// The store accepts at most this many writes per `BatchWriteItem`.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Attempt-indexed exponential back-off, capped at `base * 64`.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt.min(6))
}

/// Typed object-mapping client over one store handle.
#[derive(Clone)]
pub struct DynamapClient {
    pub(crate) api: Arc<dyn StoreApi>,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) codec: Arc<Codec>,
    pub(crate) config: ClientConfig,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for DynamapClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamapClient")
            .field("codec", &self.codec)
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl DynamapClient {
    /// A client over `api` with default configuration, the default codec,
    /// and the process-wide registry.
    #[must_use]
    pub fn new(api: Arc<dyn StoreApi>) -> Self {
        Self::with_parts(api, SchemaRegistry::shared(), Arc::new(Codec::new()), ClientConfig::default())
    }

    /// A client assembled from explicit parts.
    #[must_use]
    pub fn with_parts(
        api: Arc<dyn StoreApi>,
        registry: Arc<SchemaRegistry>,
        codec: Arc<Codec>,
        config: ClientConfig,
    ) -> Self {
        Self {
            api,
            registry,
            codec,
            config,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// An independent client with different configuration. The store
    /// handle, registry and codec are shared with `self`.
    #[must_use]
    pub fn with_config(&self, config: ClientConfig) -> Self {
        Self {
            api: Arc::clone(&self.api),
            registry: Arc::clone(&self.registry),
            codec: Arc::clone(&self.codec),
            config,
            closed: Arc::clone(&self.closed),
        }
    }

    /// The client's configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The schema registry this client resolves types through.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Releases the store handle. Idempotent; operations issued after
    /// closing fail with [`Error::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("client closed, releasing store handle");
        }
    }

    /// Registers a record type, returning its schema. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] for inconsistent shapes.
    pub fn register<T: Record>(&self) -> Result<Arc<TableSchema>> {
        Ok(self.registry.register::<T>()?)
    }

    pub(crate) fn table<T: Record>(&self) -> Result<Arc<TableSchema>> {
        self.register::<T>()
    }

    // -----------------------------------------------------------------
    // Retry wrapper
    // -----------------------------------------------------------------

    /// Runs a store round-trip, absorbing transient errors with exponential
    /// attempt-indexed back-off until `max_retry_timeout` elapses.
    ///
    /// Codes in `exempt` (and `ResourceNotFoundException`, always) are
    /// rethrown immediately.
    pub(crate) async fn exec<T, F, Fut>(&self, mut action: F, exempt: &[StoreErrorCode]) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            match action().await {
                Ok(out) => return Ok(out),
                Err(err) => {
                    let retryable = err.code != StoreErrorCode::ResourceNotFoundException
                        && !exempt.contains(&err.code)
                        && self.config.retry_codes.contains(&err.code);
                    if !retryable {
                        return Err(Error::from_store(err));
                    }
                    if started.elapsed() >= self.config.max_retry_timeout {
                        return Err(Error::Timeout {
                            budget: self.config.max_retry_timeout,
                            attempts: attempt + 1,
                            message: err.to_string(),
                        });
                    }
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    debug!(code = %err.code, attempt, ?delay, "transient store error, backing off");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Schema lifecycle
    // -----------------------------------------------------------------

    /// Creates every missing registered table (the sequence table
    /// included) and blocks until all are active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when tables do not become active within
    /// the retry budget.
    pub async fn init_schema(&self) -> Result<()> {
        self.register::<Seq>()?;
        let tables = self.registry.tables();
        let ready = self
            .create_missing_tables(&tables, self.config.max_retry_timeout)
            .await?;
        if ready {
            Ok(())
        } else {
            Err(Error::Timeout {
                budget: self.config.max_retry_timeout,
                attempts: 0,
                message: "tables did not become active".to_owned(),
            })
        }
    }

    /// Creates each table absent from the store, then polls until every
    /// named table is active or `timeout` elapses (returning `false` on
    /// timeout). `ResourceInUseException` during creation is swallowed so
    /// concurrent initializers are idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn create_missing_tables(
        &self,
        schemas: &[Arc<TableSchema>],
        timeout: Duration,
    ) -> Result<bool> {
        let existing: HashSet<String> = self.list_table_names().await?.into_iter().collect();
        for schema in schemas {
            if existing.contains(&schema.name) {
                continue;
            }
            let input = schema
                .to_create_table_input(self.config.read_capacity, self.config.write_capacity)?;
            let api = Arc::clone(&self.api);
            let result = self
                .exec(
                    move || {
                        let api = Arc::clone(&api);
                        let input = input.clone();
                        async move { api.create_table(input).await }
                    },
                    &[StoreErrorCode::ResourceInUseException],
                )
                .await;
            match result {
                Ok(_) => info!(table = %schema.name, "created table"),
                Err(Error::Store(err))
                    if err.code == StoreErrorCode::ResourceInUseException =>
                {
                    debug!(table = %schema.name, "table already being created");
                }
                Err(err) => return Err(err),
            }
        }
        let names = schemas.iter().map(|s| s.name.clone()).collect();
        self.wait_for_tables_ready(names, timeout).await
    }

    /// Polls table status every `poll_table_status` until every named
    /// table is active, returning `false` when `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn wait_for_tables_ready(
        &self,
        names: Vec<String>,
        timeout: Duration,
    ) -> Result<bool> {
        let started = Instant::now();
        let mut pending = names;
        loop {
            let mut still_pending = Vec::new();
            for name in pending {
                match self.describe_status(&name).await {
                    Ok(Some(TableStatus::Active)) => {}
                    Ok(_) => still_pending.push(name),
                    Err(Error::NotFound { .. }) => still_pending.push(name),
                    Err(err) => return Err(err),
                }
            }
            if still_pending.is_empty() {
                return Ok(true);
            }
            if started.elapsed() >= timeout {
                debug!(pending = ?still_pending, "timed out waiting for tables to become active");
                return Ok(false);
            }
            pending = still_pending;
            sleep(self.config.poll_table_status).await;
        }
    }

    /// Deletes the named tables, ignoring ones that do not exist.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn delete_tables(&self, names: &[String]) -> Result<()> {
        for name in names {
            let api = Arc::clone(&self.api);
            let input = DeleteTableInput {
                table_name: name.clone(),
            };
            let result = self
                .exec(
                    move || {
                        let api = Arc::clone(&api);
                        let input = input.clone();
                        async move { api.delete_table(input).await }
                    },
                    &[],
                )
                .await;
            match result {
                Ok(_) => info!(table = %name, "deleted table"),
                Err(Error::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Polls until every named table is gone, returning `false` when
    /// `timeout` elapses first.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn wait_for_tables_to_be_deleted(
        &self,
        names: Vec<String>,
        timeout: Duration,
    ) -> Result<bool> {
        let started = Instant::now();
        let mut pending = names;
        loop {
            let mut still_pending = Vec::new();
            for name in pending {
                match self.describe_status(&name).await {
                    Err(Error::NotFound { .. }) => {}
                    Ok(_) => still_pending.push(name),
                    Err(err) => return Err(err),
                }
            }
            if still_pending.is_empty() {
                return Ok(true);
            }
            if started.elapsed() >= timeout {
                return Ok(false);
            }
            pending = still_pending;
            sleep(self.config.poll_table_status).await;
        }
    }

    async fn describe_status(&self, name: &str) -> Result<Option<TableStatus>> {
        let api = Arc::clone(&self.api);
        let input = DescribeTableInput {
            table_name: name.to_owned(),
        };
        let out = self
            .exec(
                move || {
                    let api = Arc::clone(&api);
                    let input = input.clone();
                    async move { api.describe_table(input).await }
                },
                &[],
            )
            .await?;
        Ok(out.table.and_then(|t| t.table_status))
    }

    /// Lists every table name, following the listing cursor to the end.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn list_table_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut start: Option<String> = None;
        loop {
            let api = Arc::clone(&self.api);
            let input = ListTablesInput {
                exclusive_start_table_name: start.clone(),
                limit: None,
            };
            let out = self
                .exec(
                    move || {
                        let api = Arc::clone(&api);
                        let input = input.clone();
                        async move { api.list_tables(input).await }
                    },
                    &[],
                )
                .await?;
            names.extend(out.table_names);
            match out.last_evaluated_table_name {
                Some(next) => start = Some(next),
                None => return Ok(names),
            }
        }
    }

    // -----------------------------------------------------------------
    // Single-item operations
    // -----------------------------------------------------------------

    /// Fetches one record by hash key. `Ok(None)` when the item is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the table itself does not exist.
    pub async fn get_item<T: Record, H: Into<Value>>(&self, hash: H) -> Result<Option<T>> {
        let schema = self.table::<T>()?;
        let key = self.key_for(&schema, hash.into(), None)?;
        self.get_by_key(&schema, key).await
    }

    /// Fetches one record by composite key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the table has no range key.
    pub async fn get_item_with_range<T, H, R>(&self, hash: H, range: R) -> Result<Option<T>>
    where
        T: Record,
        H: Into<Value>,
        R: Into<Value>,
    {
        let schema = self.table::<T>()?;
        let key = self.key_for(&schema, hash.into(), Some(range.into()))?;
        self.get_by_key(&schema, key).await
    }

    async fn get_by_key<T: Record>(&self, schema: &TableSchema, key: Key) -> Result<Option<T>> {
        let api = Arc::clone(&self.api);
        let input = GetItemInput {
            table_name: schema.name.clone(),
            key,
            consistent_read: Some(self.config.consistent_read),
            ..Default::default()
        };
        let out = self
            .exec(
                move || {
                    let api = Arc::clone(&api);
                    let input = input.clone();
                    async move { api.get_item(input).await }
                },
                &[],
            )
            .await?;
        match out.item {
            Some(attrs) => Ok(Some(self.codec.record_from_item(schema, &attrs)?)),
            None => Ok(None),
        }
    }

    /// Writes one record, replacing any existing item with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] when a field cannot be serialized.
    pub async fn put_item<T: Record>(&self, record: &T) -> Result<()> {
        let schema = self.table::<T>()?;
        let item = self.codec.to_item(&schema, record)?;
        let api = Arc::clone(&self.api);
        let input = PutItemInput {
            table_name: schema.name.clone(),
            item,
            ..Default::default()
        };
        self.exec(
            move || {
                let api = Arc::clone(&api);
                let input = input.clone();
                async move { api.put_item(input).await }
            },
            &[],
        )
        .await?;
        Ok(())
    }

    /// Deletes one record by hash key. Succeeds whether or not the item
    /// existed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the table itself does not exist.
    pub async fn delete_item<T: Record, H: Into<Value>>(&self, hash: H) -> Result<()> {
        let schema = self.table::<T>()?;
        let key = self.key_for(&schema, hash.into(), None)?;
        self.delete_by_key(&schema, key).await
    }

    /// Deletes one record by composite key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the table has no range key.
    pub async fn delete_item_with_range<T, H, R>(&self, hash: H, range: R) -> Result<()>
    where
        T: Record,
        H: Into<Value>,
        R: Into<Value>,
    {
        let schema = self.table::<T>()?;
        let key = self.key_for(&schema, hash.into(), Some(range.into()))?;
        self.delete_by_key(&schema, key).await
    }

    async fn delete_by_key(&self, schema: &TableSchema, key: Key) -> Result<()> {
        let api = Arc::clone(&self.api);
        let input = DeleteItemInput {
            table_name: schema.name.clone(),
            key,
            ..Default::default()
        };
        self.exec(
            move || {
                let api = Arc::clone(&api);
                let input = input.clone();
                async move { api.delete_item(input).await }
            },
            &[],
        )
        .await?;
        Ok(())
    }

    /// Atomically adds `delta` to a number attribute, returning the new
    /// value (`delta` itself when the attribute or item was absent).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the field is not part of the table.
    pub async fn increment<T: Record, H: Into<Value>>(
        &self,
        hash: H,
        field: &str,
        delta: i64,
    ) -> Result<i64> {
        let schema = self.table::<T>()?;
        let field_schema = schema
            .field(field)
            .ok_or_else(|| {
                SchemaError::invalid(format!(
                    "cannot increment unknown field '{field}' on table {}",
                    schema.name
                ))
            })?
            .clone();
        let attr_name = self.codec.attribute_name(&field_schema);
        let key = self.key_for(&schema, hash.into(), None)?;

        let input = UpdateItemInput {
            table_name: schema.name.clone(),
            key,
            update_expression: Some("ADD #f :d".to_owned()),
            expression_attribute_names: HashMap::from([("#f".to_owned(), attr_name.clone())]),
            expression_attribute_values: HashMap::from([(
                ":d".to_owned(),
                AttributeValue::N(delta.to_string()),
            )]),
            return_values: Some(ReturnValue::AllNew),
            ..Default::default()
        };
        let api = Arc::clone(&self.api);
        let out = self
            .exec(
                move || {
                    let api = Arc::clone(&api);
                    let input = input.clone();
                    async move { api.update_item(input).await }
                },
                &[],
            )
            .await?;
        Ok(out
            .attributes
            .get(&attr_name)
            .and_then(|attr| attr.as_n())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0))
    }

    // -----------------------------------------------------------------
    // Batch operations
    // -----------------------------------------------------------------

    /// Fetches many records by hash key, batching 100 keys per request and
    /// resubmitting unprocessed keys with back-off until none remain.
    /// Results arrive in the order the store returns them.
    ///
    /// # Errors
    ///
    /// Returns the first encoding or non-transient store error.
    pub async fn get_items<T, I, V>(&self, hashes: I) -> Result<Vec<T>>
    where
        T: Record,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let schema = self.table::<T>()?;
        let keys: Vec<Key> = hashes
            .into_iter()
            .map(|h| self.key_for(&schema, h.into(), None))
            .collect::<Result<_>>()?;

        let mut records = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_BATCH_GET_KEYS) {
            let mut request_items = HashMap::from([(
                schema.name.clone(),
                KeysAndAttributes {
                    keys: chunk.to_vec(),
                    consistent_read: Some(self.config.consistent_read),
                    ..Default::default()
                },
            )]);
            let mut attempt: u32 = 0;
            loop {
                let api = Arc::clone(&self.api);
                let input = BatchGetItemInput {
                    request_items: request_items.clone(),
                };
                let out = self
                    .exec(
                        move || {
                            let api = Arc::clone(&api);
                            let input = input.clone();
                            async move { api.batch_get_item(input).await }
                        },
                        &[],
                    )
                    .await?;
                if let Some(items) = out.responses.get(&schema.name) {
                    for item in items {
                        records.push(self.codec.record_from_item(&schema, item)?);
                    }
                }
                if out.unprocessed_keys.is_empty() {
                    break;
                }
                debug!(
                    table = %schema.name,
                    attempt,
                    "resubmitting unprocessed batch-get keys"
                );
                request_items = out.unprocessed_keys;
                sleep(backoff_delay(self.config.retry_base_delay, attempt)).await;
                attempt += 1;
            }
        }
        Ok(records)
    }

    /// Writes many records, batching 25 puts per request.
    ///
    /// # Errors
    ///
    /// Returns the first encoding or non-transient store error.
    pub async fn put_items<T: Record>(&self, records: &[T]) -> Result<()> {
        let schema = self.table::<T>()?;
        let requests: Vec<WriteRequest> = records
            .iter()
            .map(|r| self.codec.to_item(&schema, r).map(WriteRequest::put))
            .collect::<std::result::Result<_, _>>()?;
        self.write_batches(&schema.name, requests).await
    }

    /// Deletes many records by hash key, batching 25 deletes per request.
    ///
    /// # Errors
    ///
    /// Returns the first encoding or non-transient store error.
    pub async fn delete_items<T, I, V>(&self, hashes: I) -> Result<()>
    where
        T: Record,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let schema = self.table::<T>()?;
        let requests: Vec<WriteRequest> = hashes
            .into_iter()
            .map(|h| {
                self.key_for(&schema, h.into(), None)
                    .map(WriteRequest::delete)
            })
            .collect::<Result<_>>()?;
        self.write_batches(&schema.name, requests).await
    }

    /// Submits write requests in chunks of 25, resubmitting unprocessed
    /// items with back-off until none remain. Item order across
    /// resubmissions is not preserved.
    async fn write_batches(&self, table: &str, requests: Vec<WriteRequest>) -> Result<()> {
        for chunk in requests.chunks(MAX_BATCH_WRITE_ITEMS) {
            let mut request_items = HashMap::from([(table.to_owned(), chunk.to_vec())]);
            let mut attempt: u32 = 0;
            loop {
                let api = Arc::clone(&self.api);
                let input = BatchWriteItemInput {
                    request_items: request_items.clone(),
                };
                let out = self
                    .exec(
                        move || {
                            let api = Arc::clone(&api);
                            let input = input.clone();
                            async move { api.batch_write_item(input).await }
                        },
                        &[],
                    )
                    .await?;
                if out.unprocessed_items.is_empty() {
                    break;
                }
                debug!(table, attempt, "resubmitting unprocessed batch writes");
                request_items = out.unprocessed_items;
                sleep(backoff_delay(self.config.retry_base_delay, attempt)).await;
                attempt += 1;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Related items
    // -----------------------------------------------------------------

    /// Stamps each child record with the parent hash key and batch-writes
    /// them. The child table must have a range key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] when the child table has no range key.
    pub async fn put_related<T: Record, H: Into<Value>>(
        &self,
        parent_hash: H,
        mut records: Vec<T>,
    ) -> Result<()> {
        let schema = self.table::<T>()?;
        if schema.range_key.is_none() {
            return Err(SchemaError::invalid(format!(
                "put_related requires a range key on table {}",
                schema.name
            ))
            .into());
        }
        let hash = parent_hash.into();
        for record in &mut records {
            record
                .set(&schema.hash_key.name, hash.clone())
                .map_err(|e| {
                    Error::Schema(SchemaError::invalid(format!(
                        "cannot stamp hash key '{}': {e}",
                        schema.hash_key.name
                    )))
                })?;
        }
        self.put_items(&records).await
    }

    // -----------------------------------------------------------------
    // Key helpers
    // -----------------------------------------------------------------

    pub(crate) fn key_for(
        &self,
        schema: &TableSchema,
        hash: Value,
        range: Option<Value>,
    ) -> Result<Key> {
        let mut key = Key::new();
        let hash_attr = self.codec.encode(&schema.hash_key, &hash)?;
        key.insert(self.codec.attribute_name(&schema.hash_key), hash_attr);
        if let Some(range_value) = range {
            let range_field = schema.range_key.as_ref().ok_or_else(|| {
                SchemaError::invalid(format!("table {} has no range key", schema.name))
            })?;
            let range_attr = self.codec.encode(range_field, &range_value)?;
            key.insert(self.codec.attribute_name(range_field), range_attr);
        }
        Ok(key)
    }

    /// Decodes a wire item into a record of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] naming the first failing field.
    pub(crate) fn decode_item<T: Record>(&self, schema: &TableSchema, item: &Item) -> Result<T> {
        Ok(self.codec.record_from_item(schema, item)?)
    }
}
