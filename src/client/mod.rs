//! Live connection client
//!
//! The connection manager keeps exactly one logical WebSocket connection to
//! the server's push endpoint, recovers from failures with capped exponential
//! backoff, and hands decoded messages to subscribers. The pieces:
//!
//! - [`ConnectionManager`] - lifecycle, reconnection and publish/subscribe
//! - [`ReconnectPolicy`] - the backoff schedule
//! - [`ConnState`] - the lifecycle state machine
//!
//! Transport failures are never surfaced as hard errors; they degrade to a
//! retry, a log line, or a `connectionChange` event.

mod backoff;
mod connection;
mod registry;
mod state;

pub use backoff::ReconnectPolicy;
pub use connection::ConnectionManager;
pub use registry::{Handler, HandlerId};
pub use state::ConnState;
