//! Peer transport
//!
//! The relay core only needs one operation from the network: post a JSON
//! envelope to a peer URL and learn whether the peer took it.

mod error;
pub mod http;
pub mod scripted;

pub use error::{TransportError, TransportResult};
pub use http::HttpTransport;
pub use scripted::ScriptedTransport;

use async_trait::async_trait;
use serde_json::Value;

/// Sends envelopes to peers
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver `envelope` to `url`
    ///
    /// `Ok` only when the peer acknowledged receipt.
    async fn send(&self, url: &str, envelope: &Value) -> TransportResult<()>;
}
