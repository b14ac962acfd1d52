//! Batch operations: chunking ceilings and unprocessed-item loops.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use dynamap_mem::MemoryStore;

    use crate::{client_over, CountingStore, Poco};

    fn pocos(range: std::ops::RangeInclusive<i64>) -> Vec<Poco> {
        range
            .map(|id| Poco {
                id,
                name: format!("name-{id}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_should_batch_get_sixty_items_in_one_request() {
        let (counting, counts) = CountingStore::new(MemoryStore::new());
        let client = client_over(Arc::new(counting));
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        client.put_items(&pocos(1..=60)).await.unwrap();
        assert_eq!(counts.batch_write.load(Ordering::SeqCst), 3); // ceil(60/25)

        let got: Vec<Poco> = client.get_items(1..=60).await.unwrap();
        assert_eq!(got.len(), 60);
        assert_eq!(counts.batch_get.load(Ordering::SeqCst), 1); // 60 <= 100

        let mut ids: Vec<i64> = got.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=60).collect::<Vec<_>>());
        for poco in &got {
            assert_eq!(poco.name, format!("name-{}", poco.id));
        }
    }

    #[tokio::test]
    async fn test_should_chunk_batch_gets_above_one_hundred_keys() {
        let (counting, counts) = CountingStore::new(MemoryStore::new());
        let client = client_over(Arc::new(counting));
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        client.put_items(&pocos(1..=150)).await.unwrap();
        assert_eq!(counts.batch_write.load(Ordering::SeqCst), 6); // ceil(150/25)

        let got: Vec<Poco> = client.get_items(1..=150).await.unwrap();
        assert_eq!(got.len(), 150);
        assert_eq!(counts.batch_get.load(Ordering::SeqCst), 2); // ceil(150/100)
    }

    #[tokio::test]
    async fn test_should_skip_missing_keys_in_batch_get() {
        let (_store, client) = crate::test_client();
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        client.put_items(&pocos(1..=5)).await.unwrap();
        let got: Vec<Poco> = client.get_items(1..=10).await.unwrap();
        assert_eq!(got.len(), 5);
    }

    #[tokio::test]
    async fn test_should_batch_delete_items() {
        let (counting, counts) = CountingStore::new(MemoryStore::new());
        let client = client_over(Arc::new(counting));
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        client.put_items(&pocos(1..=30)).await.unwrap();
        counts.batch_write.store(0, Ordering::SeqCst);

        client.delete_items::<Poco, _, _>(1..=30).await.unwrap();
        assert_eq!(counts.batch_write.load(Ordering::SeqCst), 2); // ceil(30/25)

        let remaining: Vec<Poco> = client.get_items(1..=30).await.unwrap();
        assert!(remaining.is_empty());
    }
}
