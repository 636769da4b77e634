//! Durable node state
//!
//! Every store keeps its working set in memory and mirrors it to JSON
//! documents under the node's state directory. Documents are replaced by
//! atomic snapshot writes, so a reader only ever sees a complete old or a
//! complete new file.
//!
//! - [`SeenRegistry`]: message ids already accepted (loop suppression)
//! - [`RouteTable`]: node id to last-known address and liveness
//! - [`MessageStore`]: accepted messages, one document each
//! - [`OutboxQueue`]: messages pending delivery with retry scheduling
//! - [`DeliveryIndex`]: last known delivery state per message id

mod error;
pub mod inbox;
pub mod index;
pub mod outbox;
pub mod routes;
pub mod seen;
pub mod snapshot;

pub use error::{StoreError, StoreResult};
pub use inbox::MessageStore;
pub use index::{DeliveryCounts, DeliveryIndex, DeliveryState, DeliveryStatus};
pub use outbox::{backoff, OutboxClaim, OutboxQueue, OutboxRecord, BACKOFF_SCHEDULE, MAX_ATTEMPTS};
pub use routes::{RouteEntry, RouteStatus, RouteTable};
pub use seen::SeenRegistry;
