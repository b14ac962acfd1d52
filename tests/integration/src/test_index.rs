//! Secondary index routing: global index queries and local index inference.

#[cfg(test)]
mod tests {
    use dynamap_core::{Condition, Error};

    use crate::{test_client, Order, OrderByDate, order};

    dynamap_core::record! {
        /// Table with a local secondary index on `Priority`.
        pub struct Ticket in "Tickets" {
            hash queue: String => "Queue",
            range ticket_id: i64 => "TicketId",
            attr priority: i64 => "Priority",
        }
        indexes [TicketByPriority]
    }

    dynamap_core::index_record! {
        /// Tickets ordered by priority within a queue.
        pub struct TicketByPriority of Ticket as "TicketByPriorityIndex" local {
            hash queue: String => "Queue",
            range priority: i64 => "Priority",
        }
    }

    #[tokio::test]
    async fn test_should_route_queries_through_a_global_index() {
        let (_store, client) = test_client();
        client.register::<Order>().unwrap();
        client.init_schema().await.unwrap();
        client
            .put_items(&[
                order(7, 1, 50.0, "2020-01-01"),
                order(7, 2, 150.0, "2020-01-02"),
                order(8, 1, 500.0, "2020-01-01"),
            ])
            .await
            .unwrap();

        let builder = client
            .from_query_index::<OrderByDate>()
            .unwrap()
            .key_condition(&Condition::eq("Date", "2020-01-01"))
            .unwrap();
        let request = builder.clone().build().unwrap();
        assert_eq!(request.index_name.as_deref(), Some("OrderByDateIndex"));
        // Reads through a global index are always best-effort.
        assert_eq!(request.consistent_read, None);

        let results: Vec<OrderByDate> = builder.exec().unwrap().collect().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.date == "2020-01-01"));
        let totals: Vec<f64> = results.iter().map(|r| r.total).collect();
        assert!(totals.contains(&50.0) && totals.contains(&500.0));
    }

    #[tokio::test]
    async fn test_should_keep_consistent_read_for_local_index_scans() {
        let (_store, client) = test_client();
        client.register::<Ticket>().unwrap();

        let request = client.from_scan_index::<TicketByPriority>().unwrap().build();
        assert_eq!(request.index_name.as_deref(), Some("TicketByPriorityIndex"));
        assert_eq!(request.consistent_read, Some(true));
    }

    #[tokio::test]
    async fn test_should_infer_local_index_from_single_field_predicate() {
        let (_store, client) = test_client();
        client.register::<Ticket>().unwrap();
        client.init_schema().await.unwrap();
        client
            .put_items(&[
                Ticket {
                    queue: "q".to_owned(),
                    ticket_id: 1,
                    priority: 9,
                },
                Ticket {
                    queue: "q".to_owned(),
                    ticket_id: 2,
                    priority: 1,
                },
            ])
            .await
            .unwrap();

        let builder = client
            .from_query_with::<Ticket>(&Condition::eq("Queue", "q"))
            .unwrap()
            .local_index(&Condition::gt("Priority", 0), None)
            .unwrap();
        let request = builder.clone().build().unwrap();
        assert_eq!(request.index_name.as_deref(), Some("TicketByPriorityIndex"));

        // Traversal follows the index range key: priority order.
        let results: Vec<Ticket> = builder.exec().unwrap().collect().await.unwrap();
        let priorities: Vec<i64> = results.iter().map(|t| t.priority).collect();
        assert_eq!(priorities, [1, 9]);
    }

    #[tokio::test]
    async fn test_should_resolve_local_index_by_name() {
        let (_store, client) = test_client();
        client.register::<Ticket>().unwrap();

        let request = client
            .from_query_with::<Ticket>(&Condition::eq("Queue", "q"))
            .unwrap()
            .local_index(&Condition::gt("Priority", 0), Some("TicketByPriorityIndex"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.index_name.as_deref(), Some("TicketByPriorityIndex"));
    }

    #[tokio::test]
    async fn test_should_reject_ambiguous_index_inference() {
        let (_store, client) = test_client();
        client.register::<Ticket>().unwrap();

        let two_fields = Condition::gt("Priority", 0).and(Condition::eq("TicketId", 1));
        let err = client
            .from_query_with::<Ticket>(&Condition::eq("Queue", "q"))
            .unwrap()
            .local_index(&two_fields, None)
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[tokio::test]
    async fn test_should_reject_fields_that_resolve_to_no_index() {
        let (_store, client) = test_client();
        client.register::<Ticket>().unwrap();

        let err = client
            .from_query_with::<Ticket>(&Condition::eq("Queue", "q"))
            .unwrap()
            .local_index(&Condition::eq("TicketId", 1), None)
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
