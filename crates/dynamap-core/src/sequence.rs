//! Monotonic identifier sequences over a dedicated counter table.
//!
//! The store offers no native auto-increment; this builds one from the
//! atomic `ADD` update. Each named sequence is one item in the `Seq`
//! table, its counter bumped per reservation.

use std::time::Duration;

use crate::client::DynamapClient;
use crate::error::Result;
use crate::value::Value;

crate::record! {
    /// One named counter.
    pub struct Seq in "Seq" {
        hash id: String => "Id",
        attr counter: i64 => "Counter",
    }
}

/// Sequence source backed by a [`DynamapClient`].
#[derive(Debug, Clone)]
pub struct Sequences {
    client: DynamapClient,
}

impl Sequences {
    /// A sequence source sharing the client's store handle.
    #[must_use]
    pub fn new(client: &DynamapClient) -> Self {
        Self {
            client: client.clone(),
        }
    }

    /// Idempotently creates the sequence table.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn init_schema(&self, timeout: Duration) -> Result<bool> {
        let schema = self.client.register::<Seq>()?;
        self.client.create_missing_tables(&[schema], timeout).await
    }

    /// The current value of a sequence; `0` when it has never been
    /// incremented.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn current(&self, key: &str) -> Result<i64> {
        let seq: Option<Seq> = self.client.get_item(Value::Str(key.to_owned())).await?;
        Ok(seq.map_or(0, |s| s.counter))
    }

    /// Reserves and returns the next identifier.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn next(&self, key: &str) -> Result<i64> {
        self.next_block(key, 1).await
    }

    /// Reserves a block of `n` identifiers, returning the last one. The
    /// reserved block is `(result - n, result]`.
    ///
    /// # Errors
    ///
    /// Returns the first non-transient store error.
    pub async fn next_block(&self, key: &str, n: i64) -> Result<i64> {
        self.client
            .increment::<Seq, _>(Value::Str(key.to_owned()), "Counter", n)
            .await
    }
}

impl DynamapClient {
    /// The sequence source bound to this client.
    #[must_use]
    pub fn sequences(&self) -> Sequences {
        Sequences::new(self)
    }
}
