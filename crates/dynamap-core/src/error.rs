//! The engine's error type.
//!
//! Each subsystem defines its own error enum (`SchemaError`, `EncodingError`,
//! `ExpressionError`); this module folds them, together with store-level
//! outcomes, into the single [`Error`] the public API surfaces.

use std::time::Duration;

use dynamap_model::{StoreError, StoreErrorCode};

use crate::codec::EncodingError;
use crate::expression::ExpressionError;
use crate::schema::SchemaError;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Any failure surfaced by the mapping engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Table metadata is missing or inconsistent.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A value could not be translated to or from the wire format.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// A predicate could not be compiled.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// The store reported that the addressed table or index does not exist.
    /// Never retried, so "absent item" decisions stay at the call site.
    #[error("not found: {message}")]
    NotFound {
        /// The store's message.
        message: String,
    },

    /// A non-retryable store error.
    #[error("store error: {0}")]
    Store(StoreError),

    /// The retry budget was exhausted without a successful round-trip.
    #[error("retry budget of {budget:?} exhausted after {attempts} attempts: {message}")]
    Timeout {
        /// The configured budget.
        budget: Duration,
        /// How many attempts were made.
        attempts: u32,
        /// The last transient error observed.
        message: String,
    },

    /// The client was closed; its store handle is gone.
    #[error("client is closed")]
    Closed,
}

impl Error {
    /// Classifies a store error: `ResourceNotFoundException` becomes
    /// [`Error::NotFound`], everything else is a permanent store error.
    #[must_use]
    pub fn from_store(err: StoreError) -> Self {
        if err.code == StoreErrorCode::ResourceNotFoundException {
            Self::NotFound {
                message: err.message,
            }
        } else {
            Self::Store(err)
        }
    }

    /// Returns `true` for the [`Error::NotFound`] kind.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_map_resource_not_found_to_not_found() {
        let err = Error::from_store(StoreError::resource_not_found("no table Orders"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_should_keep_other_codes_as_store_errors() {
        let err = Error::from_store(StoreError::validation("bad request"));
        assert!(matches!(err, Error::Store(_)));
    }
}
