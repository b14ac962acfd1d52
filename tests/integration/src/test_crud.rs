//! Single-item round trips: put, get, delete, nested documents and sets.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use dynamap_model::api::StoreApi;

    use crate::{test_client, Address, Customer, Order, Poco, order};

    #[tokio::test]
    async fn test_should_roundtrip_simple_record() {
        let (_store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        client
            .put_item(&Poco {
                id: 1,
                name: "foo".to_owned(),
            })
            .await
            .unwrap();

        let got: Poco = client.get_item(1).await.unwrap().expect("item must exist");
        assert_eq!(got.id, 1);
        assert_eq!(got.name, "foo");
    }

    #[tokio::test]
    async fn test_should_return_none_for_absent_items() {
        let (_store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        let got: Option<Poco> = client.get_item(42).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_should_replace_items_on_put() {
        let (_store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        client
            .put_item(&Poco {
                id: 1,
                name: "first".to_owned(),
            })
            .await
            .unwrap();
        client
            .put_item(&Poco {
                id: 1,
                name: "second".to_owned(),
            })
            .await
            .unwrap();

        let got: Poco = client.get_item(1).await.unwrap().unwrap();
        assert_eq!(got.name, "second");
    }

    #[tokio::test]
    async fn test_should_delete_items() {
        let (_store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        client
            .put_item(&Poco {
                id: 1,
                name: "gone soon".to_owned(),
            })
            .await
            .unwrap();
        client.delete_item::<Poco, _>(1).await.unwrap();
        assert!(client.get_item::<Poco, _>(1).await.unwrap().is_none());

        // Deleting an absent item succeeds quietly.
        client.delete_item::<Poco, _>(1).await.unwrap();
    }

    #[tokio::test]
    async fn test_should_address_composite_keys() {
        let (_store, client) = test_client();
        client.register::<Order>().unwrap();
        client.init_schema().await.unwrap();

        client.put_item(&order(7, 3, 50.0, "2020-01-01")).await.unwrap();
        client.put_item(&order(7, 4, 75.0, "2020-01-02")).await.unwrap();

        let got: Order = client
            .get_item_with_range(7, 4)
            .await
            .unwrap()
            .expect("composite item must exist");
        assert_eq!(got.order_id, 4);
        assert_eq!(got.total, 75.0);

        client.delete_item_with_range::<Order, _, _>(7, 3).await.unwrap();
        assert!(client
            .get_item_with_range::<Order, _, _>(7, 3)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_should_roundtrip_documents_and_sets() {
        let (store, client) = test_client();
        client.register::<Customer>().unwrap();
        client.init_schema().await.unwrap();

        let customer = Customer {
            id: 9,
            address: Address {
                street: "1 Main St".to_owned(),
                city: "Austin".to_owned(),
            },
            tags: ["vip".to_owned(), "beta".to_owned()].into_iter().collect::<BTreeSet<_>>(),
        };
        client.put_item(&customer).await.unwrap();

        let got: Customer = client.get_item(9).await.unwrap().unwrap();
        assert_eq!(got, customer);

        // On the wire the document is a string attribute and the tags are a
        // string set, never a number set.
        let raw = store
            .get_item(dynamap_model::input::GetItemInput {
                table_name: "Customers".to_owned(),
                key: [(
                    "Id".to_owned(),
                    dynamap_model::AttributeValue::N("9".to_owned()),
                )]
                .into_iter()
                .collect(),
                ..Default::default()
            })
            .await
            .unwrap()
            .item
            .unwrap();
        assert_eq!(raw["Address"].type_descriptor(), "S");
        assert_eq!(raw["Tags"].type_descriptor(), "SS");
    }

    #[tokio::test]
    async fn test_should_leave_defaults_for_missing_attributes() {
        let (store, client) = test_client();
        client.register::<Poco>().unwrap();
        client.init_schema().await.unwrap();

        // An item written without the Name attribute.
        store
            .put_item(dynamap_model::input::PutItemInput {
                table_name: "Poco".to_owned(),
                item: [(
                    "Id".to_owned(),
                    dynamap_model::AttributeValue::N("5".to_owned()),
                )]
                .into_iter()
                .collect(),
                ..Default::default()
            })
            .await
            .unwrap();

        let got: Poco = client.get_item(5).await.unwrap().unwrap();
        assert_eq!(got.id, 5);
        assert_eq!(got.name, "");
    }
}
