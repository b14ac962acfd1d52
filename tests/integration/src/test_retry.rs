//! Retry behavior under synthetic throttling.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use dynamap_core::{ClientConfig, Error};
    use dynamap_mem::MemoryStore;
    use dynamap_model::StoreErrorCode;
    use dynamap_model::api::StoreApi;

    use crate::{client_over, fast_config, CountingStore, FlakyStore, Poco};

    async fn flaky_setup(
        code: StoreErrorCode,
    ) -> (Arc<FlakyStore<MemoryStore>>, dynamap_core::DynamapClient) {
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new(), 0, code));
        let api: Arc<dyn StoreApi> = flaky.clone() as Arc<dyn StoreApi>;
        let client = client_over(api);
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();
        client
            .put_item(&Poco {
                id: 1,
                name: "steady".to_owned(),
            })
            .await
            .unwrap();
        (flaky, client)
    }

    #[tokio::test]
    async fn test_should_absorb_transient_throttling() {
        let (flaky, client) = flaky_setup(StoreErrorCode::ThrottlingException).await;

        flaky.set_failures(3);
        let got: Poco = client.get_item(1).await.unwrap().unwrap();
        assert_eq!(got.name, "steady");
    }

    #[tokio::test]
    async fn test_should_time_out_when_throttling_never_clears() {
        let (flaky, client) = flaky_setup(StoreErrorCode::ThrottlingException).await;

        let impatient = client.with_config(ClientConfig {
            max_retry_timeout: Duration::from_millis(50),
            ..fast_config()
        });
        flaky.set_failures(i64::MAX);
        let err = impatient.get_item::<Poco, _>(1).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_should_rethrow_non_retryable_errors_immediately() {
        let (flaky, client) = flaky_setup(StoreErrorCode::ValidationException).await;

        flaky.set_failures(1);
        let err = client.get_item::<Poco, _>(1).await.unwrap_err();
        match err {
            Error::Store(store_err) => {
                assert_eq!(store_err.code, StoreErrorCode::ValidationException);
            }
            other => panic!("expected a store error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_should_not_retry_missing_resources() {
        let (counting, counts) = CountingStore::new(MemoryStore::new());
        let client = client_over(Arc::new(counting));
        client.register::<Poco>().unwrap();
        // The table is never created.
        let err = client.get_item::<Poco, _>(1).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(counts.get_item.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_retry_each_batch_round_trip() {
        let (flaky, client) = flaky_setup(StoreErrorCode::ProvisionedThroughputExceededException)
            .await;

        let records: Vec<Poco> = (2..=30)
            .map(|id| Poco {
                id,
                name: format!("n{id}"),
            })
            .collect();
        flaky.set_failures(2);
        client.put_items(&records).await.unwrap();

        let got: Vec<Poco> = client.get_items(2..=30).await.unwrap();
        assert_eq!(got.len(), 29);
    }
}
