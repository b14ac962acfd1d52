//! Client configuration.

use std::env;
use std::time::Duration;

use dynamap_model::StoreErrorCode;

/// Tunables for one client instance. All fields have defaults; independent
/// clients over one store handle can carry independent configurations via
/// [`DynamapClient::with_config`](crate::DynamapClient::with_config).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Use strongly consistent reads on the base table. Reads through
    /// global indexes are always best-effort regardless of this flag.
    pub consistent_read: bool,
    /// Default provisioned read capacity for created tables.
    pub read_capacity: i64,
    /// Default provisioned write capacity for created tables.
    pub write_capacity: i64,
    /// Interval between table-status polls during schema changes.
    pub poll_table_status: Duration,
    /// Total budget for retrying transient store errors.
    pub max_retry_timeout: Duration,
    /// Default per-request page size for scans and queries.
    pub paging_limit: i32,
    /// Default query traversal order.
    pub scan_index_forward: bool,
    /// First back-off sleep; doubles per attempt.
    pub retry_base_delay: Duration,
    /// Error codes treated as transient.
    pub retry_codes: Vec<StoreErrorCode>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            consistent_read: true,
            read_capacity: 10,
            write_capacity: 5,
            poll_table_status: Duration::from_secs(2),
            max_retry_timeout: Duration::from_secs(60),
            paging_limit: 1000,
            scan_index_forward: true,
            retry_base_delay: Duration::from_millis(100),
            retry_codes: vec![
                StoreErrorCode::ThrottlingException,
                StoreErrorCode::ProvisionedThroughputExceededException,
                StoreErrorCode::LimitExceededException,
                StoreErrorCode::ResourceInUseException,
            ],
        }
    }
}

impl ClientConfig {
    /// Reads overrides from `DYNAMAP_*` environment variables, falling back
    /// to defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            consistent_read: env_bool("DYNAMAP_CONSISTENT_READ", defaults.consistent_read),
            read_capacity: env_i64("DYNAMAP_READ_CAPACITY", defaults.read_capacity),
            write_capacity: env_i64("DYNAMAP_WRITE_CAPACITY", defaults.write_capacity),
            poll_table_status: env_secs("DYNAMAP_POLL_TABLE_STATUS_SECS", defaults.poll_table_status),
            max_retry_timeout: env_secs("DYNAMAP_MAX_RETRY_TIMEOUT_SECS", defaults.max_retry_timeout),
            paging_limit: env_i32("DYNAMAP_PAGING_LIMIT", defaults.paging_limit),
            scan_index_forward: env_bool("DYNAMAP_SCAN_INDEX_FORWARD", defaults.scan_index_forward),
            ..defaults
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).map_or(default, |v| {
        matches!(v.as_str(), "1" | "true" | "yes" | "TRUE" | "YES")
    })
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or(default, Duration::from_secs)
}
