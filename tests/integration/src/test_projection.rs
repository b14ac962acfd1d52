//! Projections: field lists, shape intersection, single-column reads.

#[cfg(test)]
mod tests {
    use dynamap_core::{Condition, Value};

    use crate::{test_client, Order, OrderSummary, order};

    async fn seeded_client() -> dynamap_core::DynamapClient {
        let (_store, client) = test_client();
        client.register::<Order>().unwrap();
        client.init_schema().await.unwrap();
        client
            .put_items(&[
                order(7, 1, 50.0, "2020-01-01"),
                order(7, 2, 150.0, "2020-01-02"),
            ])
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn test_should_project_shape_intersection() {
        let client = seeded_client().await;

        let request = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap()
            .select_into::<OrderSummary>()
            .build()
            .unwrap();
        assert_eq!(
            request.projection_expression.as_deref(),
            Some("CustomerId, OrderId, Total")
        );
        assert_eq!(
            request.select,
            Some(dynamap_model::types::Select::SpecificAttributes)
        );
    }

    #[tokio::test]
    async fn test_should_decode_into_narrower_shape() {
        let client = seeded_client().await;

        let summaries: Vec<OrderSummary> = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap()
            .select_table_fields()
            .exec_into::<OrderSummary>()
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].customer_id, 7);
        let totals: Vec<f64> = summaries.iter().map(|s| s.total).collect();
        assert_eq!(totals, [50.0, 150.0]);
    }

    #[tokio::test]
    async fn test_should_project_all_table_fields() {
        let client = seeded_client().await;

        let request = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap()
            .select_table_fields()
            .build()
            .unwrap();
        assert_eq!(
            request.projection_expression.as_deref(),
            Some("CustomerId, OrderId, Total, Date")
        );
    }

    #[tokio::test]
    async fn test_should_yield_single_column_values() {
        let client = seeded_client().await;

        let totals = client
            .from_query_with::<Order>(&Condition::eq("CustomerId", 7))
            .unwrap()
            .exec_column("Total")
            .await
            .unwrap();
        assert_eq!(totals, [Value::Float(50.0), Value::Float(150.0)]);
    }

    #[tokio::test]
    async fn test_should_reject_unknown_column() {
        let client = seeded_client().await;

        let err = client
            .from_query::<Order>()
            .unwrap()
            .key_condition(&Condition::eq("CustomerId", 7))
            .unwrap()
            .exec_column("Nope")
            .await
            .unwrap_err();
        assert!(matches!(err, dynamap_core::Error::Schema(_)));
    }
}
