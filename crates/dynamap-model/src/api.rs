//! The transport contract the mapping engine drives.
//!
//! A [`StoreApi`] implementation owns the connection to one store endpoint
//! and maps each wire operation onto a single request/response round-trip.
//! The engine treats the trait object as the SDK handle: it never retries or
//! interprets errors here, that policy lives above the transport.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::input::{
    BatchGetItemInput, BatchWriteItemInput, CreateTableInput, DeleteItemInput, DeleteTableInput,
    DescribeTableInput, GetItemInput, ListTablesInput, PutItemInput, QueryInput, ScanInput,
    UpdateItemInput,
};
use crate::output::{
    BatchGetItemOutput, BatchWriteItemOutput, CreateTableOutput, DeleteItemOutput,
    DeleteTableOutput, DescribeTableOutput, GetItemOutput, ListTablesOutput, PutItemOutput,
    QueryOutput, ScanOutput, UpdateItemOutput,
};

/// Result alias for transport round-trips.
pub type StoreResult<T> = Result<T, StoreError>;

/// One round-trip per wire operation.
#[async_trait]
pub trait StoreApi: Send + Sync + 'static {
    /// List table names, one page at a time.
    async fn list_tables(&self, input: ListTablesInput) -> StoreResult<ListTablesOutput>;

    /// Create a table with its key schema and indexes.
    async fn create_table(&self, input: CreateTableInput) -> StoreResult<CreateTableOutput>;

    /// Delete a table.
    async fn delete_table(&self, input: DeleteTableInput) -> StoreResult<DeleteTableOutput>;

    /// Describe a table's metadata and lifecycle status.
    async fn describe_table(&self, input: DescribeTableInput)
        -> StoreResult<DescribeTableOutput>;

    /// Fetch a single item by primary key.
    async fn get_item(&self, input: GetItemInput) -> StoreResult<GetItemOutput>;

    /// Insert or replace a single item.
    async fn put_item(&self, input: PutItemInput) -> StoreResult<PutItemOutput>;

    /// Apply update actions to a single item.
    async fn update_item(&self, input: UpdateItemInput) -> StoreResult<UpdateItemOutput>;

    /// Delete a single item by primary key.
    async fn delete_item(&self, input: DeleteItemInput) -> StoreResult<DeleteItemOutput>;

    /// Fetch up to 100 items by primary key.
    async fn batch_get_item(&self, input: BatchGetItemInput) -> StoreResult<BatchGetItemOutput>;

    /// Apply up to 25 put/delete requests.
    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> StoreResult<BatchWriteItemOutput>;

    /// Query one partition (of the table or an index) by key condition.
    async fn query(&self, input: QueryInput) -> StoreResult<QueryOutput>;

    /// Scan a table or index page by page.
    async fn scan(&self, input: ScanInput) -> StoreResult<ScanOutput>;
}
