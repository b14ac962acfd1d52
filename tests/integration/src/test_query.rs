//! Query building, filtering, ordering and pagination.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use dynamap_core::Condition;
    use dynamap_mem::MemoryStore;

    use crate::{client_over, test_client, CountingStore, Order, order};

    async fn seed_orders(client: &dynamap_core::DynamapClient) {
        client.register::<Order>().unwrap();
        client.init_schema().await.unwrap();
        client
            .put_items(&[
                order(7, 1, 50.0, "2020-01-01"),
                order(7, 2, 150.0, "2020-01-01"),
                order(7, 3, 250.0, "2020-01-02"),
                order(7, 4, 80.0, "2020-01-03"),
                order(8, 1, 500.0, "2020-01-01"),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_should_query_by_key_and_filter() {
        let (_store, client) = test_client();
        seed_orders(&client).await;

        let results: Vec<Order> = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap()
            .filter(&Condition::gt("Total", 100))
            .unwrap()
            .exec()
            .unwrap()
            .collect()
            .await
            .unwrap();

        // Only customer 7, only totals above 100, ascending OrderId.
        let ids: Vec<i64> = results.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, [2, 3]);
        assert!(results.iter().all(|o| o.customer_id == 7 && o.total > 100.0));
    }

    #[tokio::test]
    async fn test_should_order_descending() {
        let (_store, client) = test_client();
        seed_orders(&client).await;

        let results: Vec<Order> = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap()
            .order_descending()
            .exec()
            .unwrap()
            .collect()
            .await
            .unwrap();
        let ids: Vec<i64> = results.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, [4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_should_page_lazily_until_cursor_is_exhausted() {
        let (counting, counts) = CountingStore::new(MemoryStore::new());
        let client = client_over(Arc::new(counting));
        seed_orders(&client).await;

        let results: Vec<Order> = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap()
            .paging_limit(2)
            .exec()
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        // Two full pages; the second clears the cursor.
        assert_eq!(counts.query.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_should_stop_at_bounded_limit() {
        let (_store, client) = test_client();
        seed_orders(&client).await;

        let results: Vec<Order> = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap()
            .exec_limit(3)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_should_set_page_size_from_bounded_limit() {
        let (_store, client) = test_client();
        seed_orders(&client).await;

        let builder = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap();
        let request = builder.clone().build().unwrap();
        // Default page size applies until a bounded execution overrides it.
        assert_eq!(request.limit, Some(client.config().paging_limit));

        let results: Vec<Order> = client.query_limit(request, 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_should_join_key_conditions_and_filters_with_and() {
        let (_store, client) = test_client();
        seed_orders(&client).await;

        let request = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap()
            .key_condition(&Condition::between("OrderId", 1, 3))
            .unwrap()
            .filter(&Condition::gt("Total", 40))
            .unwrap()
            .filter(&Condition::lt("Total", 200))
            .unwrap()
            .build()
            .unwrap();

        let key_expr = request.key_condition_expression.as_deref().unwrap();
        assert!(key_expr.contains(") AND ("));
        let filter_expr = request.filter_expression.as_deref().unwrap();
        assert!(filter_expr.contains(") AND ("));

        let results: Vec<Order> = client.query(request).unwrap().collect().await.unwrap();
        let ids: Vec<i64> = results.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[tokio::test]
    async fn test_should_clone_builders_without_interference() {
        let (_store, client) = test_client();
        seed_orders(&client).await;

        let base = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap();
        let narrowed = base
            .clone()
            .filter(&Condition::gt("Total", 100))
            .unwrap();

        let all: Vec<Order> = base.exec().unwrap().collect().await.unwrap();
        let filtered: Vec<Order> = narrowed.exec().unwrap().collect().await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn test_should_reject_predicates_on_unknown_fields() {
        let (_store, client) = test_client();
        client.register::<Order>().unwrap();

        let err = client
            .from_query_with::<Order>(&Condition::eq("NoSuchField", 1))
            .unwrap_err();
        assert!(matches!(err, dynamap_core::Error::Expression(_)));
    }

    #[tokio::test]
    async fn test_should_reject_query_with_no_key_condition() {
        let (_store, client) = test_client();
        client.register::<Order>().unwrap();

        // A builder whose key compiler produced no placeholders has
        // nothing to select a partition with.
        let err = client.from_query::<Order>().unwrap().exec().unwrap_err();
        assert!(matches!(err, dynamap_core::Error::Expression(_)));

        // A filter alone does not make the query executable either.
        let err = client
            .from_query::<Order>()
            .unwrap()
            .filter(&Condition::gt("Total", 100))
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, dynamap_core::Error::Expression(_)));
    }
}
