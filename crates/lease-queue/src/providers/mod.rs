//! Queue gateway implementations.
//!
//! This module contains concrete implementations of the `QueueGateway`
//! trait for different visibility-timeout backends.

pub mod aws;
pub mod memory;

pub use aws::{AwsError, SqsGateway};
pub use memory::{GatewayOperation, InMemoryGateway};
