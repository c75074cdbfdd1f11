//! Tail the desk live feed from a terminal
//!
//! Connects to the push endpoint and logs every batch the rendering layer
//! would receive. Useful for watching the event stream without a browser.
//!
//! Usage: `live_tail [config_file]`

use log::info;

use desk_live::{Envelope, LiveRunner, RenderSink, Settings};

/// Sink that logs batches instead of rendering them
struct LogSink;

impl RenderSink for LogSink {
    fn render_batch(&mut self, events: Vec<Envelope>) {
        info!("batch of {} event(s)", events.len());
        for envelope in &events {
            match serde_json::to_string(envelope) {
                Ok(json) => info!("  {}", json),
                Err(err) => info!("  <unprintable event: {}>", err),
            }
        }
    }

    fn set_connection_status(&mut self, connected: bool) {
        info!(
            "connection status: {}",
            if connected { "online" } else { "offline" }
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runner = match std::env::args().nth(1) {
        Some(config_path) => LiveRunner::new(&config_path)?,
        None => LiveRunner::from_settings(Settings::default()),
    };
    runner.run(LogSink).await?;
    Ok(())
}
