//! Tests for message types and identifiers.

use super::*;

mod queue_name_tests {
    use super::*;

    #[test]
    fn test_valid_queue_names() {
        assert!(QueueName::new("orders".to_string()).is_ok());
        assert!(QueueName::new("orders_v2".to_string()).is_ok());
        assert!(QueueName::new("billing-events-1".to_string()).is_ok());
    }

    #[test]
    fn test_invalid_queue_names() {
        assert!(QueueName::new(String::new()).is_err());
        assert!(QueueName::new("a".repeat(81)).is_err());
        assert!(QueueName::new("has space".to_string()).is_err());
        assert!(QueueName::new("-leading".to_string()).is_err());
        assert!(QueueName::new("trailing-".to_string()).is_err());
        assert!(QueueName::new("double--hyphen".to_string()).is_err());
    }

    #[test]
    fn test_dead_letter_name() {
        let name = QueueName::new("orders".to_string()).unwrap();
        assert_eq!(name.dead_letter().unwrap().as_str(), "orders-deadletter");
    }

    #[test]
    fn test_dead_letter_name_too_long() {
        let name = QueueName::new("q".repeat(75)).unwrap();
        assert!(name.dead_letter().is_err());
    }

    #[test]
    fn test_queue_name_deserializes_with_validation() {
        let ok: Result<QueueName, _> = serde_json::from_str("\"orders\"");
        assert!(ok.is_ok());

        let bad: Result<QueueName, _> = serde_json::from_str("\"bad name\"");
        assert!(bad.is_err());
    }
}

mod identifier_tests {
    use super::*;

    #[test]
    fn test_message_id_from_empty_string_fails() {
        assert!(MessageId::from_str("").is_err());
    }

    #[test]
    fn test_lease_handle_display_is_truncated() {
        let handle = LeaseHandle::new("x".repeat(200));
        assert_eq!(handle.to_string(), format!("{}...", "x".repeat(16)));

        let short = LeaseHandle::new("abc");
        assert_eq!(short.to_string(), "abc");
    }
}

mod received_message_tests {
    use super::*;

    fn received(attributes: &[(&str, &str)]) -> ReceivedMessage {
        ReceivedMessage {
            message_id: MessageId::new(),
            body: Bytes::from_static(b"{}"),
            lease_handle: LeaseHandle::new("lease"),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_receive_count_parsed() {
        let msg = received(&[(attributes::APPROXIMATE_RECEIVE_COUNT, "3")]);
        assert_eq!(msg.receive_count(), Some(3));
    }

    #[test]
    fn test_missing_metadata_is_none() {
        let msg = received(&[]);
        assert_eq!(msg.receive_count(), None);
        assert_eq!(msg.sent_at(), None);
    }

    #[test]
    fn test_sent_timestamp_parsed() {
        let msg = received(&[(attributes::SENT_TIMESTAMP, "1700000000000")]);
        assert_eq!(msg.sent_at().unwrap().epoch_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_single_request_asks_for_delivery_metadata() {
        let request = ReceiveRequest::single(Duration::from_secs(30), Duration::from_secs(20));
        assert_eq!(request.max_messages, 1);
        assert!(request
            .attribute_names
            .contains(&attributes::APPROXIMATE_RECEIVE_COUNT.to_string()));
        assert!(request
            .attribute_names
            .contains(&attributes::SENT_TIMESTAMP.to_string()));
    }
}

mod redrive_policy_tests {
    use super::*;

    #[test]
    fn test_attribute_json_shape() {
        let policy = RedrivePolicy::new(3, "arn:aws:sqs:us-east-1:123456789012:orders-deadletter");
        let value: serde_json::Value =
            serde_json::from_str(&policy.to_attribute().unwrap()).unwrap();

        assert_eq!(value["maxReceiveCount"], 3);
        assert_eq!(
            value["deadLetterTargetArn"],
            "arn:aws:sqs:us-east-1:123456789012:orders-deadletter"
        );
    }

    #[test]
    fn test_parses_string_receive_count() {
        let policy = RedrivePolicy::from_attribute(
            r#"{"deadLetterTargetArn":"arn:aws:sqs:eu-west-1:1:jobs-deadletter","maxReceiveCount":"5"}"#,
        )
        .unwrap();
        assert_eq!(policy.max_receive_count, 5);
        assert_eq!(policy.dead_letter_queue_name(), Some("jobs-deadletter"));
    }

    #[test]
    fn test_empty_arn_has_no_queue_name() {
        let policy = RedrivePolicy::new(1, "arn:aws:sqs:eu-west-1:1:");
        assert_eq!(policy.dead_letter_queue_name(), None);
    }
}
