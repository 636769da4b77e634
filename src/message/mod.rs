//! Message envelope handling
//!
//! Inbound JSON envelopes are validated once at the boundary and turned into
//! a tagged [`Message`]: presence announcements or ordinary data messages.

mod error;
mod types;

pub use error::{MessageError, MessageResult};
pub use types::{DataMessage, Message, PresenceMessage, PRESENCE_TYPE};
