use std::path::Path;

use log::info;

use crate::batch::BatchDispatcher;
use crate::client::ConnectionManager;
use crate::config::Settings;
use crate::errors::LiveResult;
use crate::events::{EventKind, LiveEvent};
use crate::render::RenderSink;

/// Runner wiring the live feed client together
///
/// Builds the connection manager and batch dispatcher from configuration,
/// bridges messages into the batcher and connectivity changes into the sink,
/// then runs until interrupted.
pub struct LiveRunner {
    settings: Settings,
}

impl LiveRunner {
    /// Create a runner from a configuration file
    pub fn new(config_path: impl AsRef<Path>) -> LiveResult<Self> {
        let path = config_path.as_ref().to_string_lossy();
        let settings = Settings::new(&path)?;
        Ok(Self { settings })
    }

    /// Create a runner from already-loaded settings
    pub fn from_settings(settings: Settings) -> Self {
        Self { settings }
    }

    /// Connect a sink to the live feed and return the manager handle
    ///
    /// This is the page-session wiring: every decoded message goes through
    /// the batch dispatcher (which special-cases snapshot and pong), and
    /// connectivity changes drive the sink's status indicator directly.
    pub fn wire<S>(&self, sink: S) -> ConnectionManager
    where
        S: RenderSink + Send + 'static,
    {
        let manager = ConnectionManager::new(&self.settings);
        let batcher = BatchDispatcher::spawn(sink, self.settings.batch.window());

        let status = batcher.clone();
        manager.on(
            EventKind::ConnectionChange,
            Box::new(move |event| {
                if let LiveEvent::ConnectionChange(connected) = event {
                    status.connection_change(*connected);
                }
                Ok(())
            }),
        );

        let feed = batcher;
        manager.on(
            EventKind::Message,
            Box::new(move |event| {
                if let Some(envelope) = event.payload() {
                    feed.submit(envelope.clone());
                }
                Ok(())
            }),
        );

        manager
    }

    /// Run the client until ctrl-c
    pub async fn run<S>(self, sink: S) -> LiveResult<()>
    where
        S: RenderSink + Send + 'static,
    {
        // Setup logging
        if std::env::var("RUST_LOG").is_err() {
            std::env::set_var("RUST_LOG", &self.settings.log.level);
        }
        env_logger::try_init().ok();

        info!(
            "starting live feed client for {}",
            self.settings.endpoint.live_url()
        );

        let manager = self.wire(sink);
        manager.connect();

        tokio::signal::ctrl_c().await?;
        info!("interrupt received, shutting down");
        manager.shutdown();
        Ok(())
    }
}
