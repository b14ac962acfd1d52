//! Parent/child helpers: stamping the parent hash and fetching children.

#[cfg(test)]
mod tests {
    use dynamap_core::Error;

    use crate::{test_client, Order, Poco, order};

    #[tokio::test]
    async fn test_should_stamp_children_with_parent_hash() {
        let (_store, client) = test_client();
        client.register::<Order>().unwrap();
        client.init_schema().await.unwrap();

        // Children arrive with an unset hash; put_related fills it in.
        let children = vec![
            order(0, 1, 10.0, "2020-01-01"),
            order(0, 2, 20.0, "2020-01-01"),
        ];
        client.put_related::<Order, _>(7, children).await.unwrap();

        let got: Vec<Order> = client
            .get_related::<Order, _>(7)
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|o| o.customer_id == 7));
        let ids: Vec<i64> = got.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[tokio::test]
    async fn test_should_return_no_children_for_unknown_parent() {
        let (_store, client) = test_client();
        client.register::<Order>().unwrap();
        client.init_schema().await.unwrap();

        let got: Vec<Order> = client
            .get_related::<Order, _>(999)
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_should_require_a_range_key_for_related_puts() {
        let (_store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        let err = client
            .put_related::<Poco, _>(
                7,
                vec![Poco {
                    id: 1,
                    name: "orphan".to_owned(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
