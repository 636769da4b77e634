//! Background workers
//!
//! Two periodic loops run beside the intake path:
//! - [`RetryWorker`] drains the outbox with backoff
//! - [`PresenceBroadcaster`] announces this node and refreshes routes
//!
//! [`Scheduler`] owns both loops and stops them together.

pub mod presence;
pub mod retry;
pub mod scheduler;

pub use presence::{PresenceBroadcaster, PresenceReport};
pub use retry::{RetryReport, RetryWorker, NO_ROUTE, TTL_EXPIRED};
pub use scheduler::{Scheduler, SchedulerHandle};
