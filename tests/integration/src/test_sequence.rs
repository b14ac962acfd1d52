//! The sequence source: monotonic identifiers over the counter table.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test_client;

    #[tokio::test]
    async fn test_should_start_sequences_at_zero() {
        let (_store, client) = test_client();
        let sequences = client.sequences();
        sequences.init_schema(Duration::from_secs(1)).await.unwrap();

        assert_eq!(sequences.current("orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_should_yield_monotonic_identifiers() {
        let (_store, client) = test_client();
        let sequences = client.sequences();
        sequences.init_schema(Duration::from_secs(1)).await.unwrap();

        assert_eq!(sequences.next("orders").await.unwrap(), 1);
        assert_eq!(sequences.next("orders").await.unwrap(), 2);
        assert_eq!(sequences.next("orders").await.unwrap(), 3);
        assert_eq!(sequences.current("orders").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_should_reserve_blocks() {
        let (_store, client) = test_client();
        let sequences = client.sequences();
        sequences.init_schema(Duration::from_secs(1)).await.unwrap();

        assert_eq!(sequences.next("ids").await.unwrap(), 1);
        // Reserving 10 yields the end of the block (2..=11).
        assert_eq!(sequences.next_block("ids", 10).await.unwrap(), 11);
        assert_eq!(sequences.next("ids").await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_should_keep_sequences_independent() {
        let (_store, client) = test_client();
        let sequences = client.sequences();
        sequences.init_schema(Duration::from_secs(1)).await.unwrap();

        assert_eq!(sequences.next("a").await.unwrap(), 1);
        assert_eq!(sequences.next("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_should_create_sequence_table_via_init_schema() {
        let (_store, client) = test_client();
        client.init_schema().await.unwrap();
        assert!(client
            .list_table_names()
            .await
            .unwrap()
            .contains(&"Seq".to_owned()));
        assert_eq!(client.sequences().next("x").await.unwrap(), 1);
    }
}
