//! Fixed-window batch dispatcher
//!
//! Sits between the connection manager's raw message stream and the rendering
//! layer. Under bursty event storms the renderer is the bottleneck, so
//! application events are buffered and flushed as one batch per window (200ms
//! by default) instead of invoking the renderer per event. The window is
//! fixed, not sliding: the first buffered event after a flush arms the timer
//! and later events within the window do not extend it.
//!
//! Two message types bypass batching entirely: `snapshot` (the first message
//! after an open) immediately surfaces a connection-established record, and
//! `pong` is observed and discarded. Connectivity changes also go straight
//! through.

use std::time::Duration;

use chrono::Utc;
use log::debug;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::events::{Envelope, EventKind};
use crate::render::RenderSink;

enum Input {
    Event(Envelope),
    Status(bool),
}

/// Handle feeding the batching task
///
/// Cheap to clone; typically one clone lives in the `message` handler and one
/// in the `connectionChange` handler of the connection manager.
#[derive(Clone)]
pub struct BatchDispatcher {
    tx: mpsc::UnboundedSender<Input>,
}

impl BatchDispatcher {
    /// Spawn the batching task around a sink. Must be called from within a
    /// tokio runtime. The task exits, flushing any pending events, once every
    /// handle has been dropped.
    pub fn spawn<S>(sink: S, window: Duration) -> Self
    where
        S: RenderSink + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, sink, window));
        Self { tx }
    }

    /// Hand one decoded message to the dispatcher.
    pub fn submit(&self, envelope: Envelope) {
        let _ = self.tx.send(Input::Event(envelope));
    }

    /// Forward a connectivity transition; bypasses batching.
    pub fn connection_change(&self, connected: bool) {
        let _ = self.tx.send(Input::Status(connected));
    }
}

async fn run<S: RenderSink>(mut rx: mpsc::UnboundedReceiver<Input>, mut sink: S, window: Duration) {
    let mut pending: Vec<Envelope> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            input = rx.recv() => match input {
                Some(Input::Status(connected)) => sink.set_connection_status(connected),
                Some(Input::Event(envelope)) => {
                    handle_event(envelope, &mut pending, &mut deadline, &mut sink, window)
                }
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                sink.render_batch(std::mem::take(&mut pending));
                deadline = None;
            }
        }
    }

    // Final drain so nothing buffered is lost on teardown
    if !pending.is_empty() {
        sink.render_batch(std::mem::take(&mut pending));
    }
}

fn handle_event<S: RenderSink>(
    envelope: Envelope,
    pending: &mut Vec<Envelope>,
    deadline: &mut Option<Instant>,
    sink: &mut S,
    window: Duration,
) {
    match envelope.kind() {
        Some(EventKind::Snapshot) => sink.render_batch(vec![connected_record(&envelope)]),
        Some(EventKind::Pong) => debug!("keepalive acknowledged at {:?}", envelope.ts),
        _ => {
            pending.push(envelope);
            if deadline.is_none() {
                *deadline = Some(Instant::now() + window);
            }
        }
    }
}

/// Timeline record surfaced for a server snapshot, shaped like a desk event.
fn connected_record(snapshot: &Envelope) -> Envelope {
    let message = snapshot
        .field("message")
        .cloned()
        .unwrap_or(Value::Null);
    let mut fields = Map::new();
    fields.insert("event_type".to_string(), Value::from("CONNECTED"));
    fields.insert("source".to_string(), Value::from("ws"));
    fields.insert("payload".to_string(), json!({ "message": message }));
    let ts = snapshot
        .ts
        .clone()
        .or_else(|| Some(Utc::now().to_rfc3339()));
    Envelope::new(None, ts, fields)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingSink {
        batches: Arc<Mutex<Vec<Vec<Envelope>>>>,
        statuses: Arc<Mutex<Vec<bool>>>,
    }

    impl RenderSink for RecordingSink {
        fn render_batch(&mut self, events: Vec<Envelope>) {
            self.batches.lock().push(events);
        }

        fn set_connection_status(&mut self, connected: bool) {
            self.statuses.lock().push(connected);
        }
    }

    fn desk_event(seq: u64) -> Envelope {
        let mut fields = Map::new();
        fields.insert("event_type".to_string(), Value::from("TEST"));
        fields.insert("seq".to_string(), Value::from(seq));
        Envelope::new(None, Some("2026-01-02T03:04:05Z".to_string()), fields)
    }

    fn seq_of(envelope: &Envelope) -> u64 {
        envelope.field("seq").and_then(Value::as_u64).unwrap()
    }

    async fn settle() {
        // Let the dispatcher task drain its channel before the clock moves
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_flushes_once_in_arrival_order() {
        let sink = RecordingSink::default();
        let dispatcher = BatchDispatcher::spawn(sink.clone(), Duration::from_millis(200));

        for seq in 0..5 {
            dispatcher.submit(desk_event(seq));
        }
        settle().await;
        assert!(sink.batches.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(210)).await;
        settle().await;

        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 1);
        let seqs: Vec<u64> = batches[0].iter().map(seq_of).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_fixed_not_sliding() {
        let sink = RecordingSink::default();
        let dispatcher = BatchDispatcher::spawn(sink.clone(), Duration::from_millis(200));

        dispatcher.submit(desk_event(0));
        settle().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        // Arrives mid-window; must not push the deadline out
        dispatcher.submit(desk_event(1));
        settle().await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        settle().await;
        {
            let batches = sink.batches.lock();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].len(), 2);
        }

        // The next event after a flush arms a fresh window
        dispatcher.submit(desk_event(2));
        settle().await;
        tokio::time::sleep(Duration::from_millis(210)).await;
        settle().await;
        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(seq_of(&batches[1][0]), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_bypasses_batching() {
        let sink = RecordingSink::default();
        let dispatcher = BatchDispatcher::spawn(sink.clone(), Duration::from_millis(200));

        let raw = r#"{"type":"snapshot","ts":"2026-01-02T03:04:05Z","message":"Connected to live feed"}"#;
        let snapshot: Envelope = serde_json::from_str(raw).unwrap();
        dispatcher.submit(snapshot);
        settle().await;

        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 1);
        let record = &batches[0][0];
        assert_eq!(
            record.field("event_type").and_then(Value::as_str),
            Some("CONNECTED")
        );
        assert_eq!(record.field("source").and_then(Value::as_str), Some("ws"));
        assert_eq!(record.ts.as_deref(), Some("2026-01-02T03:04:05Z"));
        assert_eq!(
            record.field("payload").unwrap()["message"],
            Value::from("Connected to live feed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_is_discarded() {
        let sink = RecordingSink::default();
        let dispatcher = BatchDispatcher::spawn(sink.clone(), Duration::from_millis(200));

        let pong: Envelope =
            serde_json::from_str(r#"{"type":"pong","ts":"2026-01-02T03:04:05Z"}"#).unwrap();
        dispatcher.submit(pong);
        settle().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        settle().await;

        assert!(sink.batches.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_is_batched_like_any_event() {
        let sink = RecordingSink::default();
        let dispatcher = BatchDispatcher::spawn(sink.clone(), Duration::from_millis(200));

        let heartbeat: Envelope =
            serde_json::from_str(r#"{"type":"heartbeat","ts":"2026-01-02T03:04:05Z"}"#).unwrap();
        dispatcher.submit(heartbeat);
        settle().await;
        assert!(sink.batches.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(210)).await;
        settle().await;
        assert_eq!(sink.batches.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_changes_bypass_batching() {
        let sink = RecordingSink::default();
        let dispatcher = BatchDispatcher::spawn(sink.clone(), Duration::from_millis(200));

        dispatcher.submit(desk_event(0));
        dispatcher.connection_change(false);
        dispatcher.connection_change(true);
        settle().await;

        // Statuses arrived before any flush
        assert_eq!(*sink.statuses.lock(), vec![false, true]);
        assert!(sink.batches.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_events_flushed_on_teardown() {
        let sink = RecordingSink::default();
        let dispatcher = BatchDispatcher::spawn(sink.clone(), Duration::from_millis(200));

        dispatcher.submit(desk_event(0));
        settle().await;
        drop(dispatcher);
        settle().await;

        assert_eq!(sink.batches.lock().len(), 1);
    }
}
