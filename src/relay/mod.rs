//! Store-and-Forward Relay Module
//!
//! Intake path of a relay node in a small peer-to-peer message network.
//!
//! Key features:
//! - Duplicate and loop suppression through the seen registry
//! - TTL-bounded forwarding, one decrement per hop
//! - Route lookup with a default-peer fallback
//! - Staging into a durable outbox so delivery never blocks intake

pub mod node;
pub mod types;

pub use node::{NodeStatus, OriginateRequest, RelayEvent, RelayNode, RelayNodeBuilder, RouteView};
pub use types::{Outcome, PeerSpec, RelayConfig, RelayError, RelayResult, RelayStats, VERSION};
