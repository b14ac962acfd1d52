//! Atomic counter increments.

#[cfg(test)]
mod tests {
    use crate::{test_client, Counter};

    #[tokio::test]
    async fn test_should_count_up_from_absent() {
        let (_store, client) = test_client();
        client.register::<Counter>().unwrap();
        client.init_schema().await.unwrap();

        // Starting from an absent item, three increments count 1, 2, 3.
        for expected in 1..=3 {
            let value = client.increment::<Counter, _>("hits", "N", 1).await.unwrap();
            assert_eq!(value, expected);
        }

        let counter: Counter = client.get_item("hits").await.unwrap().unwrap();
        assert_eq!(counter.n, 3);
    }

    #[tokio::test]
    async fn test_should_add_arbitrary_deltas() {
        let (_store, client) = test_client();
        client.register::<Counter>().unwrap();
        client.init_schema().await.unwrap();

        assert_eq!(client.increment::<Counter, _>("k", "N", 5).await.unwrap(), 5);
        assert_eq!(client.increment::<Counter, _>("k", "N", -2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_should_track_counters_independently() {
        let (_store, client) = test_client();
        client.register::<Counter>().unwrap();
        client.init_schema().await.unwrap();

        client.increment::<Counter, _>("a", "N", 1).await.unwrap();
        assert_eq!(client.increment::<Counter, _>("b", "N", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_should_reject_unknown_fields() {
        let (_store, client) = test_client();
        client.register::<Counter>().unwrap();
        client.init_schema().await.unwrap();

        let err = client
            .increment::<Counter, _>("k", "Missing", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, dynamap_core::Error::Schema(_)));
    }
}
