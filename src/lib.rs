#![deny(unreachable_pub)]
pub mod batch;
pub mod client;
pub mod config;
mod errors;
pub mod events;
pub mod render;
pub mod runner;
pub use batch::BatchDispatcher;
pub use client::{ConnState, ConnectionManager, Handler, HandlerId, ReconnectPolicy};
pub use config::Settings;
pub use errors::{LiveError, LiveResult};
pub use events::{Envelope, EventKind, LiveEvent};
pub use render::{NoOpSink, RenderSink};
pub use runner::LiveRunner;
