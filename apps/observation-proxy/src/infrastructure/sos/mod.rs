//! SOS Adapters
//!
//! Client side of an OGC Sensor Observation Service using its JSON
//! key-value-pair binding.
//!
//! - `client`: capabilities discovery and session opening
//! - `session`: per-property result streaming (polling or WebSocket)
//! - `codec`: result payload decoding
//! - `reconnect`: retry backoff for dropped streams

/// Capabilities and result template requests.
pub mod client;

/// Result payload codec.
pub mod codec;

/// Retry backoff.
pub mod reconnect;

/// Streaming sessions.
pub mod session;

pub use client::{SosClient, SosClientConfig, SosRequestError};
pub use codec::{CodecError, ResultCodec};
pub use reconnect::{Backoff, BackoffConfig};
pub use session::SosStreamSession;
