//! Wire-level model types for the dynamap client.
//!
//! This crate defines the store's HTTP API surface as plain Rust types: the
//! `AttributeValue` discriminated union, request/response shapes for the
//! twelve wire operations the engine drives, shared table/index types, and
//! the [`StoreApi`] transport trait. The engine crate never talks to the
//! network itself; it builds these inputs and hands them to whichever
//! `StoreApi` implementation it was constructed with.
//!
//! All wire structs use `PascalCase` JSON field naming. Optional fields and
//! empty collections are omitted from serialized payloads.
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod attribute_value;
pub mod error;
pub mod input;
pub mod output;
pub mod types;

pub use api::StoreApi;
pub use attribute_value::AttributeValue;
pub use error::{StoreError, StoreErrorCode};
