//! RFMail relay node
//!
//! A store-and-forward relay for small peer-to-peer mail networks. Nodes
//! exchange JSON envelopes over HTTP, learn each other's addresses from
//! periodic presence announcements, and forward messages toward their
//! destination within a hop budget.
//!
//! - [`message`]: envelope validation
//! - [`store`]: durable seen ids, routes, inbox and outbox
//! - [`relay`]: the intake path and node state
//! - [`transport`]: sending envelopes to peers
//! - [`worker`]: retry and presence loops
//! - [`api`]: HTTP surface

pub mod api;
pub mod config;
pub mod message;
pub mod metrics;
pub mod relay;
pub mod store;
pub mod transport;
pub mod worker;

pub use relay::{Outcome, RelayConfig, RelayError, RelayNode, RelayNodeBuilder, RelayResult};
