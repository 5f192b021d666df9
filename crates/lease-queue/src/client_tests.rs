//! Tests for the queue client.

use super::*;
use crate::message::QueueName;
use crate::providers::{GatewayOperation, InMemoryGateway};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Job {
    id: u32,
}

fn options() -> QueueOptions {
    QueueOptions::new(QueueName::new("jobs".to_string()).unwrap())
        .with_read_queue_timeout(Duration::from_millis(50))
        .with_dequeue_interval(Duration::from_millis(10))
}

fn queue_on(gateway: &Arc<InMemoryGateway>, options: QueueOptions) -> LeaseQueue<Job> {
    LeaseQueue::builder(options)
        .gateway(Arc::clone(gateway) as Arc<dyn QueueGateway>)
        .build()
        .unwrap()
}

fn new_queue() -> (Arc<InMemoryGateway>, LeaseQueue<Job>) {
    let gateway = Arc::new(InMemoryGateway::new());
    let queue = queue_on(&gateway, options());
    (gateway, queue)
}

async fn dequeue_now(queue: &LeaseQueue<Job>) -> Option<QueueEntry<Job>> {
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    queue.dequeue(&cancelled).await.unwrap()
}

#[derive(Default)]
struct RecordingHooks {
    veto: bool,
    events: Mutex<Vec<String>>,
}

impl RecordingHooks {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueHooks<Job> for RecordingHooks {
    async fn on_enqueuing(&self, value: &Job) -> bool {
        self.record(format!("enqueuing:{}", value.id));
        !self.veto
    }

    async fn on_enqueued(&self, entry: &QueueEntry<Job>) {
        assert!(entry.lease_handle().is_none());
        self.record(format!("enqueued:{}:{}", entry.value().id, entry.attempt()));
    }

    async fn on_dequeued(&self, entry: &QueueEntry<Job>) {
        self.record(format!("dequeued:{}:{}", entry.value().id, entry.attempt()));
    }

    async fn on_completed(&self, entry: &QueueEntry<Job>) {
        self.record(format!("completed:{}", entry.value().id));
    }

    async fn on_abandoned(&self, entry: &QueueEntry<Job>) {
        self.record(format!("abandoned:{}", entry.value().id));
    }
}

mod publish_and_consume {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_preserves_payload() {
        let (_gateway, queue) = new_queue();

        let id = queue.enqueue(Job { id: 1 }).await.unwrap().unwrap();
        let entry = dequeue_now(&queue).await.expect("entry");

        assert_eq!(entry.id(), &id);
        assert_eq!(entry.value(), &Job { id: 1 });
        assert_eq!(entry.attempt(), 1);
        assert!(entry.lease_handle().is_some());
        assert!(entry.is_active());
    }

    #[tokio::test]
    async fn test_pre_cancelled_dequeue_on_empty_queue_returns_quickly() {
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_on(
            &gateway,
            options().with_read_queue_timeout(Duration::from_secs(20)),
        );

        let started = Instant::now();
        assert!(dequeue_now(&queue).await.is_none());

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(gateway.calls(GatewayOperation::ReceiveMessages), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_long_poll_returns_none() {
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_on(
            &gateway,
            options().with_read_queue_timeout(Duration::from_secs(20)),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        assert!(queue.dequeue(&cancel).await.unwrap().is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_dequeue_polls_until_message_arrives() {
        let (_gateway, queue) = new_queue();

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            producer.enqueue(Job { id: 9 }).await.unwrap();
        });

        let entry = queue
            .dequeue(&CancellationToken::new())
            .await
            .unwrap()
            .expect("entry after polling");
        assert_eq!(entry.value().id, 9);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_serialization_error() {
        let (gateway, queue) = new_queue();
        let handle = queue
            .inner
            .bootstrap
            .ensure_queue_ready(gateway.as_ref())
            .await
            .unwrap();
        gateway
            .send_message(&handle, Bytes::from_static(b"not json"))
            .await
            .unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let result = queue.dequeue(&cancelled).await;

        assert!(matches!(result, Err(QueueError::SerializationError(_))));
        assert_eq!(queue.inner.counters.snapshot().dequeued, 1);
    }

    #[tokio::test]
    async fn test_transport_error_propagates_without_counting() {
        let (gateway, queue) = new_queue();
        queue.enqueue(Job { id: 1 }).await.unwrap();

        gateway.fail_next(GatewayOperation::SendMessage);
        let result = queue.enqueue(Job { id: 2 }).await;

        assert!(matches!(result, Err(QueueError::ConnectionFailed { .. })));
        assert_eq!(queue.inner.counters.snapshot().enqueued, 1);
    }

    #[tokio::test]
    async fn test_lazy_sqs_gateway_without_credentials_fails_on_use() {
        let connection = SqsConnection {
            access_key_id: None,
            secret_access_key: None,
            ..SqsConnection::default()
        };
        let queue: LeaseQueue<Job> = LeaseQueue::builder(options()).sqs(connection).build().unwrap();

        let result = queue.enqueue(Job { id: 1 }).await;
        assert!(matches!(
            result,
            Err(QueueError::AuthenticationFailed { .. })
        ));
    }
}

mod lease_operations {
    use super::*;

    #[tokio::test]
    async fn test_double_complete_is_invalid_state() {
        let (gateway, queue) = new_queue();
        queue.enqueue(Job { id: 1 }).await.unwrap();
        let entry = dequeue_now(&queue).await.unwrap();

        queue.complete(&entry).await.unwrap();
        assert_eq!(entry.state(), EntryState::Completed);

        match queue.complete(&entry).await {
            Err(QueueError::InvalidEntryState { state, .. }) => {
                assert_eq!(state, EntryState::Completed)
            }
            other => panic!("Expected InvalidEntryState, got: {:?}", other),
        }
        assert_eq!(gateway.calls(GatewayOperation::DeleteMessage), 1);
    }

    #[tokio::test]
    async fn test_concurrent_complete_counts_once() {
        let gateway = Arc::new(InMemoryGateway::new().with_latency(Duration::from_millis(50)));
        let queue = queue_on(&gateway, options());
        queue.enqueue(Job { id: 1 }).await.unwrap();
        let entry = dequeue_now(&queue).await.unwrap();

        let (first, second) = tokio::join!(queue.complete(&entry), queue.complete(&entry));

        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
        assert!(matches!(
            first.err().or(second.err()),
            Some(QueueError::InvalidEntryState { .. })
        ));
        assert_eq!(gateway.calls(GatewayOperation::DeleteMessage), 1);
        assert_eq!(queue.get_stats().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_concurrent_complete_and_abandon_count_once() {
        let gateway = Arc::new(InMemoryGateway::new().with_latency(Duration::from_millis(50)));
        let queue = queue_on(&gateway, options());
        queue.enqueue(Job { id: 1 }).await.unwrap();
        let entry = dequeue_now(&queue).await.unwrap();

        let (completed, abandoned) = tokio::join!(queue.complete(&entry), queue.abandon(&entry));
        assert!(completed.is_ok() != abandoned.is_ok());

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.completed + stats.abandoned, 1);
        assert!(entry.state().is_terminal());
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_entry_active() {
        let (gateway, queue) = new_queue();
        queue.enqueue(Job { id: 1 }).await.unwrap();
        let entry = dequeue_now(&queue).await.unwrap();

        gateway.fail_next(GatewayOperation::DeleteMessage);
        assert!(queue.complete(&entry).await.is_err());
        assert_eq!(entry.state(), EntryState::Active);
        assert_eq!(queue.get_stats().await.unwrap().completed, 0);

        queue.complete(&entry).await.unwrap();
        assert_eq!(entry.state(), EntryState::Completed);
        assert_eq!(queue.get_stats().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_terminal_entry_rejected_before_remote_call() {
        let (gateway, queue) = new_queue();
        queue.enqueue(Job { id: 1 }).await.unwrap();
        let entry = dequeue_now(&queue).await.unwrap();

        queue.abandon(&entry).await.unwrap();
        assert_eq!(gateway.calls(GatewayOperation::ChangeVisibility), 1);

        assert!(matches!(
            queue.abandon(&entry).await,
            Err(QueueError::InvalidEntryState { .. })
        ));
        assert!(matches!(
            queue.renew_lease(&entry).await,
            Err(QueueError::InvalidEntryState { .. })
        ));
        assert!(matches!(
            queue.complete(&entry).await,
            Err(QueueError::InvalidEntryState { .. })
        ));
        assert_eq!(gateway.calls(GatewayOperation::ChangeVisibility), 1);
        assert_eq!(gateway.calls(GatewayOperation::DeleteMessage), 0);
    }

    #[tokio::test]
    async fn test_abandoned_entry_stays_hidden_for_lease_window() {
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_on(
            &gateway,
            options().with_work_item_timeout(Duration::from_millis(150)),
        );
        queue.enqueue(Job { id: 1 }).await.unwrap();

        let entry = dequeue_now(&queue).await.unwrap();
        queue.abandon(&entry).await.unwrap();
        assert!(dequeue_now(&queue).await.is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let again = dequeue_now(&queue).await.expect("redelivered");
        assert_eq!(again.id(), entry.id());
        assert_eq!(again.attempt(), 2);
    }

    #[tokio::test]
    async fn test_renew_extends_lease() {
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_on(
            &gateway,
            options().with_work_item_timeout(Duration::from_millis(200)),
        );
        queue.enqueue(Job { id: 1 }).await.unwrap();
        let entry = dequeue_now(&queue).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        queue.renew_lease(&entry).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // Past the original lease, inside the renewed one
        assert!(dequeue_now(&queue).await.is_none());
        assert!(entry.is_active());
        queue.complete(&entry).await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_entry_rejected() {
        let gateway = Arc::new(InMemoryGateway::new());
        let producer = queue_on(&gateway, options());
        let other = queue_on(&gateway, options());

        producer.enqueue(Job { id: 1 }).await.unwrap();
        let entry = dequeue_now(&producer).await.unwrap();

        assert!(matches!(
            other.complete(&entry).await,
            Err(QueueError::ForeignEntry { .. })
        ));
        assert_eq!(gateway.calls(GatewayOperation::DeleteMessage), 0);
        assert!(entry.is_active());
    }

    #[tokio::test]
    async fn test_entry_without_lease_rejected() {
        let (gateway, queue) = new_queue();
        let entry = QueueEntry::new(
            queue.inner.id,
            MessageId::new(),
            Job { id: 1 },
            None,
            Timestamp::now(),
            0,
        );

        match queue.complete(&entry).await {
            Err(QueueError::ValidationError(ValidationError::Required { field })) => {
                assert_eq!(field, "lease_handle")
            }
            other => panic!("Expected ValidationError, got: {:?}", other),
        }
        assert_eq!(gateway.calls(GatewayOperation::DeleteMessage), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_surfaces_message_not_found() {
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_on(
            &gateway,
            options().with_work_item_timeout(Duration::from_millis(50)),
        );
        queue.enqueue(Job { id: 1 }).await.unwrap();

        let stale = dequeue_now(&queue).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let _fresh = dequeue_now(&queue).await.unwrap();

        assert!(matches!(
            queue.complete(&stale).await,
            Err(QueueError::MessageNotFound { .. })
        ));
        assert!(stale.is_active());
    }
}

mod hooks {
    use super::*;

    #[tokio::test]
    async fn test_veto_skips_remote_send() {
        let gateway = Arc::new(InMemoryGateway::new());
        let hooks = Arc::new(RecordingHooks {
            veto: true,
            ..Default::default()
        });
        let queue: LeaseQueue<Job> = LeaseQueue::builder(options())
            .gateway(Arc::clone(&gateway) as Arc<dyn QueueGateway>)
            .hooks(Arc::clone(&hooks) as Arc<dyn QueueHooks<Job>>)
            .build()
            .unwrap();

        assert_eq!(queue.enqueue(Job { id: 7 }).await.unwrap(), None);

        assert_eq!(gateway.calls(GatewayOperation::SendMessage), 0);
        assert_eq!(gateway.calls(GatewayOperation::ResolveQueue), 0);
        assert_eq!(queue.inner.counters.snapshot().enqueued, 0);
        assert_eq!(hooks.events(), vec!["enqueuing:7".to_string()]);
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_fire_in_order() {
        let gateway = Arc::new(InMemoryGateway::new());
        let hooks = Arc::new(RecordingHooks::default());
        let queue: LeaseQueue<Job> = LeaseQueue::builder(options())
            .gateway(Arc::clone(&gateway) as Arc<dyn QueueGateway>)
            .hooks(Arc::clone(&hooks) as Arc<dyn QueueHooks<Job>>)
            .build()
            .unwrap();

        queue.enqueue(Job { id: 1 }).await.unwrap();
        queue.enqueue(Job { id: 2 }).await.unwrap();
        let first = dequeue_now(&queue).await.unwrap();
        queue.complete(&first).await.unwrap();
        let second = dequeue_now(&queue).await.unwrap();
        queue.abandon(&second).await.unwrap();

        assert_eq!(
            hooks.events(),
            vec![
                "enqueuing:1",
                "enqueued:1:0",
                "enqueuing:2",
                "enqueued:2:0",
                "dequeued:1:1",
                "completed:1",
                "dequeued:2:1",
                "abandoned:2",
            ]
        );
    }
}

mod stats_and_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_stats_combine_remote_depth_and_counters() {
        let (_gateway, queue) = new_queue();
        for id in 0..3 {
            queue.enqueue(Job { id }).await.unwrap();
        }
        let entry = dequeue_now(&queue).await.unwrap();

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.working, 1);
        assert_eq!(stats.deadletter, 0);
        assert_eq!(stats.enqueued, 3);
        assert_eq!(stats.dequeued, 1);
        assert_eq!(stats.timeouts, 0);

        queue.complete(&entry).await.unwrap();
        assert_eq!(queue.get_stats().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_stats_without_dead_letter_skip_dead_letter_lookup() {
        let gateway = Arc::new(InMemoryGateway::new());
        let queue = queue_on(&gateway, options().with_dead_letter(false, 0));

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.deadletter, 0);
        // Depth of the primary only
        assert_eq!(gateway.calls(GatewayOperation::GetAttributes), 1);
    }

    #[tokio::test]
    async fn test_delete_resets_counters_and_rebootstraps() {
        let (gateway, queue) = new_queue();
        queue.enqueue(Job { id: 1 }).await.unwrap();
        let _ = dequeue_now(&queue).await.unwrap();

        queue.delete_queue().await.unwrap();
        assert_eq!(gateway.message_count(&queue.options().name), 0);

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats, QueueStats::default());
        assert_eq!(gateway.calls(GatewayOperation::ResolveQueue), 2);
    }

    #[tokio::test]
    async fn test_delete_resets_counters_even_on_remote_failure() {
        let (gateway, queue) = new_queue();
        queue.enqueue(Job { id: 1 }).await.unwrap();

        gateway.fail_next(GatewayOperation::DeleteQueue);
        assert!(queue.delete_queue().await.is_err());

        assert_eq!(queue.inner.counters.snapshot(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let (_gateway, queue) = new_queue();
        let clone = queue.clone();

        clone.enqueue(Job { id: 1 }).await.unwrap();
        let entry = dequeue_now(&queue).await.unwrap();
        clone.complete(&entry).await.unwrap();

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.completed, 1);
    }
}
