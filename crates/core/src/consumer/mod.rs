//! Consumption loop: the long-running half of the worker.
//!
//! The loop owns the broker session lifecycle:
//! - **Connect**: through a [`Connector`](crate::broker::Connector), retried
//!   with backoff; a queue configuration mismatch is fatal
//! - **Consume**: bounded by a worker pool of `concurrency` slots
//! - **Reconnect**: a lost session is replaced, never mutated
//! - **Shutdown**: stop pulling, drain, abort and requeue at the deadline

mod config;
mod runner;
mod types;

pub use config::ConsumerConfig;
pub use runner::ConsumptionLoop;
pub use types::{ConsumerError, ConsumerStatus};
