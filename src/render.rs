//! RenderSink trait definition
//!
//! Defines how the rendering layer receives batched events and connectivity
//! changes from the client.

use crate::events::Envelope;

/// RenderSink interface for the rendering collaborator
///
/// The batch dispatcher owns a single sink instance and invokes these
/// callbacks synchronously: one `render_batch` call per flush window, and a
/// `set_connection_status` call on every connectivity transition. The crate
/// consumes this interface; implementing it (DOM mutation, a TUI, a log) is
/// the embedder's job.
pub trait RenderSink {
    /// Called with all events that accumulated during one batch window,
    /// in arrival order
    fn render_batch(&mut self, events: Vec<Envelope>);

    /// Called when connectivity flips
    fn set_connection_status(&mut self, connected: bool);
}

/// A no-op sink for testing or when rendering isn't wired up
#[derive(Debug, Default)]
pub struct NoOpSink;

impl RenderSink for NoOpSink {
    fn render_batch(&mut self, _events: Vec<Envelope>) {
        // No-op
    }

    fn set_connection_status(&mut self, _connected: bool) {
        // No-op
    }
}
