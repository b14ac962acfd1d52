//! Typed record mapping over a hosted schemaless key-value document store.
//!
//! Declare a record type with [`record!`], register it, and work with it as
//! a first-class persistent entity: get/put/delete/query/scan/increment in
//! terms of the type, while the engine handles schema projection, value
//! encoding, batching, paging, throttling-aware retries, and expression
//! translation.
//!
//! The engine talks to the store through the
//! [`StoreApi`](dynamap_model::StoreApi) transport trait; any
//! implementation of that trait (an HTTP SDK binding, a test double) plugs
//! in unchanged.
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod expression;
pub mod jsv;
pub mod record;
pub mod schema;
pub mod sequence;
pub mod value;

mod query;
mod scan;

pub use client::{DynamapClient, MAX_BATCH_GET_KEYS, MAX_BATCH_WRITE_ITEMS};
pub use codec::{Codec, EncodingError};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use expression::{CompareOp, Condition, ExpressionCompiler, ExpressionError};
pub use query::{QueryBuilder, QueryIter};
pub use record::{IndexRecord, Record};
pub use scan::{ScanBuilder, ScanIter};
pub use schema::{FieldSchema, IndexSchema, SchemaError, SchemaRegistry, TableSchema};
pub use sequence::{Seq, Sequences};
pub use value::{DbType, RecordValue, Value, ValueError, ValueKind};
