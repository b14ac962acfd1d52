//! End-to-end tests for the dynamap engine.
//!
//! Every test drives the full client (registry, codec, expression compiler,
//! request engine) against the in-memory store, optionally wrapped in a
//! counting or fault-injecting transport to observe batching and retry
//! behavior.

use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use dynamap_core::{ClientConfig, Codec, DynamapClient, SchemaRegistry};
use dynamap_mem::MemoryStore;
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
use dynamap_model::{StoreError, StoreErrorCode};

static INIT: Once = Once::new();

/// Initialize tracing (once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Fast timings so retry and polling loops finish quickly under test.
#[must_use]
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        poll_table_status: Duration::from_millis(5),
        max_retry_timeout: Duration::from_secs(2),
        retry_base_delay: Duration::from_millis(1),
        ..ClientConfig::default()
    }
}

/// A client over a fresh in-memory store with an isolated registry.
#[must_use]
pub fn test_client() -> (Arc<MemoryStore>, DynamapClient) {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let api: Arc<dyn StoreApi> = store.clone() as Arc<dyn StoreApi>;
    let client = DynamapClient::with_parts(
        api,
        Arc::new(SchemaRegistry::new()),
        Arc::new(Codec::new()),
        fast_config(),
    );
    (store, client)
}

/// A client over an arbitrary transport with an isolated registry.
#[must_use]
pub fn client_over(api: Arc<dyn StoreApi>) -> DynamapClient {
    init_tracing();
    DynamapClient::with_parts(
        api,
        Arc::new(SchemaRegistry::new()),
        Arc::new(Codec::new()),
        fast_config(),
    )
}

// ---------------------------------------------------------------------------
// Shared record types
// ---------------------------------------------------------------------------

dynamap_core::record! {
    /// Minimal round-trip record.
    pub struct Poco {
        hash id: i64 => "Id",
        attr name: String => "Name",
    }
}

dynamap_core::record! {
    /// Composite-key record with a global index on `Date`.
    pub struct Order in "Orders" {
        hash customer_id: i64 => "CustomerId",
        range order_id: i64 => "OrderId",
        attr total: f64 => "Total",
        attr date: String => "Date",
    }
    indexes [OrderByDate]
}

dynamap_core::index_record! {
    /// Orders by date, projecting the total.
    pub struct OrderByDate of Order as "OrderByDateIndex" global {
        hash date: String => "Date",
        range order_id: i64 => "OrderId",
        attr total: f64 => "Total",
    }
}

dynamap_core::record! {
    /// Narrow projection target for `exec_into`.
    pub struct OrderSummary {
        hash customer_id: i64 => "CustomerId",
        range order_id: i64 => "OrderId",
        attr total: f64 => "Total",
    }
}

dynamap_core::record! {
    /// Counter record for increments.
    pub struct Counter {
        hash id: String => "Id",
        attr n: i64 => "N",
    }
}

dynamap_core::document! {
    /// Nested document stored as value-serialized text.
    pub struct Address {
        street: String => "Street",
        city: String => "City",
    }
}

dynamap_core::record! {
    /// Record exercising documents and sets end to end.
    pub struct Customer in "Customers" {
        hash id: i64 => "Id",
        attr address: Address => "Address",
        attr tags: std::collections::BTreeSet<String> => "Tags",
    }
}

/// A fully populated order for test fixtures.
#[must_use]
pub fn order(customer_id: i64, order_id: i64, total: f64, date: &str) -> Order {
    Order {
        customer_id,
        order_id,
        total,
        date: date.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Transport wrappers
// ---------------------------------------------------------------------------

/// Counts round-trips per operation, delegating to an inner transport.
#[derive(Debug, Default)]
pub struct CallCounts {
    /// `GetItem` round-trips.
    pub get_item: AtomicUsize,
    /// `PutItem` round-trips.
    pub put_item: AtomicUsize,
    /// `UpdateItem` round-trips.
    pub update_item: AtomicUsize,
    /// `BatchGetItem` round-trips.
    pub batch_get: AtomicUsize,
    /// `BatchWriteItem` round-trips.
    pub batch_write: AtomicUsize,
    /// `Query` round-trips.
    pub query: AtomicUsize,
    /// `Scan` round-trips.
    pub scan: AtomicUsize,
}

/// Transport wrapper that counts calls per operation.
#[derive(Debug)]
pub struct CountingStore<S> {
    inner: S,
    /// Observed round-trip counts.
    pub counts: Arc<CallCounts>,
}

impl<S> CountingStore<S> {
    /// Wraps `inner`, sharing the returned counters.
    pub fn new(inner: S) -> (Self, Arc<CallCounts>) {
        let counts = Arc::new(CallCounts::default());
        (
            Self {
                inner,
                counts: Arc::clone(&counts),
            },
            counts,
        )
    }
}

#[async_trait]
impl<S: StoreApi> StoreApi for CountingStore<S> {
    async fn list_tables(&self, input: ListTablesInput) -> StoreResult<ListTablesOutput> {
        self.inner.list_tables(input).await
    }

    async fn create_table(&self, input: CreateTableInput) -> StoreResult<CreateTableOutput> {
        self.inner.create_table(input).await
    }

    async fn delete_table(&self, input: DeleteTableInput) -> StoreResult<DeleteTableOutput> {
        self.inner.delete_table(input).await
    }

    async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> StoreResult<DescribeTableOutput> {
        self.inner.describe_table(input).await
    }

    async fn get_item(&self, input: GetItemInput) -> StoreResult<GetItemOutput> {
        self.counts.get_item.fetch_add(1, Ordering::SeqCst);
        self.inner.get_item(input).await
    }

    async fn put_item(&self, input: PutItemInput) -> StoreResult<PutItemOutput> {
        self.counts.put_item.fetch_add(1, Ordering::SeqCst);
        self.inner.put_item(input).await
    }

    async fn update_item(&self, input: UpdateItemInput) -> StoreResult<UpdateItemOutput> {
        self.counts.update_item.fetch_add(1, Ordering::SeqCst);
        self.inner.update_item(input).await
    }

    async fn delete_item(&self, input: DeleteItemInput) -> StoreResult<DeleteItemOutput> {
        self.inner.delete_item(input).await
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> StoreResult<BatchGetItemOutput> {
        self.counts.batch_get.fetch_add(1, Ordering::SeqCst);
        self.inner.batch_get_item(input).await
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> StoreResult<BatchWriteItemOutput> {
        self.counts.batch_write.fetch_add(1, Ordering::SeqCst);
        self.inner.batch_write_item(input).await
    }

    async fn query(&self, input: QueryInput) -> StoreResult<QueryOutput> {
        self.counts.query.fetch_add(1, Ordering::SeqCst);
        self.inner.query(input).await
    }

    async fn scan(&self, input: ScanInput) -> StoreResult<ScanOutput> {
        self.counts.scan.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(input).await
    }
}

/// Transport wrapper that fails the first `failures` round-trips with a
/// fixed error code, then delegates.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: S,
    remaining: AtomicI64,
    code: StoreErrorCode,
}

impl<S> FlakyStore<S> {
    /// Wraps `inner`, failing the first `failures` calls with `code`.
    pub fn new(inner: S, failures: i64, code: StoreErrorCode) -> Self {
        Self {
            inner,
            remaining: AtomicI64::new(failures),
            code,
        }
    }

    /// Arms the wrapper to fail the next `n` calls.
    pub fn set_failures(&self, n: i64) {
        self.remaining.store(n, Ordering::SeqCst);
    }

    fn trip(&self) -> Result<(), StoreError> {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            Err(StoreError::new(self.code.clone()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: StoreApi> StoreApi for FlakyStore<S> {
    async fn list_tables(&self, input: ListTablesInput) -> StoreResult<ListTablesOutput> {
        self.trip()?;
        self.inner.list_tables(input).await
    }

    async fn create_table(&self, input: CreateTableInput) -> StoreResult<CreateTableOutput> {
        self.trip()?;
        self.inner.create_table(input).await
    }

    async fn delete_table(&self, input: DeleteTableInput) -> StoreResult<DeleteTableOutput> {
        self.trip()?;
        self.inner.delete_table(input).await
    }

    async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> StoreResult<DescribeTableOutput> {
        self.trip()?;
        self.inner.describe_table(input).await
    }

    async fn get_item(&self, input: GetItemInput) -> StoreResult<GetItemOutput> {
        self.trip()?;
        self.inner.get_item(input).await
    }

    async fn put_item(&self, input: PutItemInput) -> StoreResult<PutItemOutput> {
        self.trip()?;
        self.inner.put_item(input).await
    }

    async fn update_item(&self, input: UpdateItemInput) -> StoreResult<UpdateItemOutput> {
        self.trip()?;
        self.inner.update_item(input).await
    }

    async fn delete_item(&self, input: DeleteItemInput) -> StoreResult<DeleteItemOutput> {
        self.trip()?;
        self.inner.delete_item(input).await
    }

    async fn batch_get_item(&self, input: BatchGetItemInput) -> StoreResult<BatchGetItemOutput> {
        self.trip()?;
        self.inner.batch_get_item(input).await
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> StoreResult<BatchWriteItemOutput> {
        self.trip()?;
        self.inner.batch_write_item(input).await
    }

    async fn query(&self, input: QueryInput) -> StoreResult<QueryOutput> {
        self.trip()?;
        self.inner.query(input).await
    }

    async fn scan(&self, input: ScanInput) -> StoreResult<ScanOutput> {
        self.trip()?;
        self.inner.scan(input).await
    }
}

mod test_batch;
mod test_crud;
mod test_increment;
mod test_index;
mod test_projection;
mod test_query;
mod test_related;
mod test_retry;
mod test_schema;
mod test_sequence;
