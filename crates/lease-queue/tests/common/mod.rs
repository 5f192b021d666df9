//! Common test utilities for lease-queue integration tests
//!
//! This module provides:
//! - A JSON payload type used across scenarios
//! - Queue construction over the in-memory gateway with short timings
//! - A polling helper for asserting on background worker progress

use lease_queue::providers::InMemoryGateway;
use lease_queue::{LeaseQueue, QueueGateway, QueueOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u32,
}

/// Options with timings short enough for real-time tests
pub fn fast_options(name: &str, work_item_timeout: Duration) -> QueueOptions {
    QueueOptions::new(name.parse().expect("valid queue name"))
        .with_work_item_timeout(work_item_timeout)
        .with_read_queue_timeout(Duration::from_millis(50))
        .with_dequeue_interval(Duration::from_millis(10))
}

pub fn queue_on(gateway: &Arc<InMemoryGateway>, options: QueueOptions) -> LeaseQueue<Order> {
    LeaseQueue::builder(options)
        .gateway(Arc::clone(gateway) as Arc<dyn QueueGateway>)
        .build()
        .expect("valid queue configuration")
}

/// Poll until `condition` holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
