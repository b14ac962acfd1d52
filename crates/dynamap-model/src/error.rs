//! Store error codes and the transport-level error type.
//!
//! The store surfaces failures as identifier strings. A small set of codes
//! marks transient conditions the engine may retry; everything else is
//! permanent from the client's point of view.

use std::fmt;

/// Well-known store error codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum StoreErrorCode {
    /// The request was throttled.
    ThrottlingException,
    /// Provisioned read/write capacity was exceeded.
    ProvisionedThroughputExceededException,
    /// An account or table limit was exceeded.
    LimitExceededException,
    /// The table is being created or deleted concurrently.
    ResourceInUseException,
    /// The table (or index) does not exist.
    ResourceNotFoundException,
    /// A conditional write failed its condition.
    ConditionalCheckFailedException,
    /// The request was malformed.
    ValidationException,
    /// The request body could not be parsed.
    SerializationException,
    /// The store failed internally.
    InternalServerError,
    /// A code this client does not recognize.
    Unknown(String),
}

impl StoreErrorCode {
    /// Returns the wire identifier for this code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ThrottlingException => "ThrottlingException",
            Self::ProvisionedThroughputExceededException => {
                "ProvisionedThroughputExceededException"
            }
            Self::LimitExceededException => "LimitExceededException",
            Self::ResourceInUseException => "ResourceInUseException",
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::ConditionalCheckFailedException => "ConditionalCheckFailedException",
            Self::ValidationException => "ValidationException",
            Self::SerializationException => "SerializationException",
            Self::InternalServerError => "InternalServerError",
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Parses a wire identifier into a code.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "ThrottlingException" => Self::ThrottlingException,
            "ProvisionedThroughputExceededException" => {
                Self::ProvisionedThroughputExceededException
            }
            "LimitExceededException" => Self::LimitExceededException,
            "ResourceInUseException" => Self::ResourceInUseException,
            "ResourceNotFoundException" => Self::ResourceNotFoundException,
            "ConditionalCheckFailedException" => Self::ConditionalCheckFailedException,
            "ValidationException" => Self::ValidationException,
            "SerializationException" => Self::SerializationException,
            "InternalServerError" => Self::InternalServerError,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Returns `true` for codes that mark a transient condition worth
    /// retrying with back-off.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ThrottlingException
                | Self::ProvisionedThroughputExceededException
                | Self::LimitExceededException
                | Self::ResourceInUseException
        )
    }
}

impl fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by the store.
#[derive(Debug, Clone)]
pub struct StoreError {
    /// The error code.
    pub code: StoreErrorCode,
    /// A human-readable message.
    pub message: String,
}

impl StoreError {
    /// Creates a new error with the code's name as its message.
    #[must_use]
    pub fn new(code: StoreErrorCode) -> Self {
        Self {
            message: code.as_str().to_owned(),
            code,
        }
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The requested table or index does not exist.
    #[must_use]
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::ResourceNotFoundException, message)
    }

    /// The table already exists or is mid-lifecycle.
    #[must_use]
    pub fn resource_in_use(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::ResourceInUseException, message)
    }

    /// The request was malformed.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_message(StoreErrorCode::ValidationException, message)
    }

    /// Returns `true` when the code marks a transient condition.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StoreError {}

/// Builds a [`StoreError`] from a code, optionally with a message.
///
/// # Examples
///
/// ```
/// use dynamap_model::store_error;
/// use dynamap_model::StoreErrorCode;
///
/// let err = store_error!(ValidationException);
/// assert_eq!(err.code, StoreErrorCode::ValidationException);
///
/// let err = store_error!(ResourceNotFoundException, "no such table: Orders");
/// assert_eq!(err.message, "no such table: Orders");
/// ```
#[macro_export]
macro_rules! store_error {
    ($code:ident) => {
        $crate::error::StoreError::new($crate::error::StoreErrorCode::$code)
    };
    ($code:ident, $msg:expr) => {
        $crate::error::StoreError::with_message($crate::error::StoreErrorCode::$code, $msg)
    };
}
