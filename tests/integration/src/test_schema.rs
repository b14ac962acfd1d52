//! Schema lifecycle: table creation, readiness, deletion.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dynamap_core::Error;

    use crate::{test_client, Order, Poco};

    #[tokio::test]
    async fn test_should_create_registered_tables_on_init_schema() {
        let (_store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.register::<Order>().unwrap();
        client.init_schema().await.unwrap();

        let mut names = client.list_table_names().await.unwrap();
        names.sort();
        assert_eq!(names, ["Orders", "Poco", "Seq"]);
    }

    #[tokio::test]
    async fn test_should_tolerate_repeated_init_schema() {
        let (_store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();
        client.init_schema().await.unwrap();

        let names = client.list_table_names().await.unwrap();
        assert_eq!(names.iter().filter(|n| n.as_str() == "Poco").count(), 1);
    }

    #[tokio::test]
    async fn test_should_create_index_specs_with_table() {
        let (store, client) = test_client();
        client.register::<Order>().unwrap();
        client.init_schema().await.unwrap();

        use dynamap_model::api::StoreApi;
        let out = store
            .describe_table(dynamap_model::input::DescribeTableInput {
                table_name: "Orders".to_owned(),
            })
            .await
            .unwrap();
        let table = out.table.unwrap();
        assert_eq!(table.key_schema.len(), 2);
        assert_eq!(table.global_secondary_indexes.len(), 1);
        assert_eq!(
            table.global_secondary_indexes[0].index_name.as_deref(),
            Some("OrderByDateIndex")
        );
    }

    #[tokio::test]
    async fn test_should_derive_composite_key_schema() {
        let (_store, client) = test_client();
        let schema = client.register::<Order>().unwrap();
        assert_eq!(schema.name, "Orders");
        assert_eq!(schema.hash_key.name, "CustomerId");
        assert_eq!(schema.range_key.as_ref().map(|f| f.name.as_str()), Some("OrderId"));
        assert_eq!(schema.global_indexes.len(), 1);
    }

    #[tokio::test]
    async fn test_should_delete_tables_and_wait() {
        let (_store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        client.delete_tables(&["Poco".to_owned()]).await.unwrap();
        let gone = client
            .wait_for_tables_to_be_deleted(vec!["Poco".to_owned()], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(gone);
        assert!(!client.list_table_names().await.unwrap().contains(&"Poco".to_owned()));

        // Deleting again is not an error.
        client.delete_tables(&["Poco".to_owned()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_should_propagate_not_found_for_missing_tables() {
        let (_store, client) = test_client();
        // Registered but never created in the store.
        let err = client.get_item::<Poco, _>(1).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_should_reject_operations_after_close() {
        let (_store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.close();
        client.close(); // Idempotent.
        let err = client.get_item::<Poco, _>(1).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
