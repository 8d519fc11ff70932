//! Streaming detection sessions.
//!
//! A session owns one frame source and one model handle, pumping frames
//! through inference and emitting wire-ready events on a bounded channel.
//! Emission is throttled to a minimum interval; frames arriving between
//! emits are read and dropped so the decoder stays live.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use argus_models::{ErrorMessage, ObjectsMessage};

use crate::decode::BoxedFrameSource;
use crate::detector::Infer;
use crate::error::VisionError;

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum interval between emitted detection events.
    pub emit_interval: Duration,
    /// Delay before retrying after a transient read failure.
    pub retry_delay: Duration,
    /// Event channel capacity.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            emit_interval: Duration::from_millis(500),
            retry_delay: Duration::from_millis(50),
            channel_capacity: 32,
        }
    }
}

/// An event produced by a running session, ready for the wire.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Detections(ObjectsMessage),
    Error(ErrorMessage),
}

/// Handle to a spawned session: event stream plus cancellation.
pub struct SessionHandle {
    events: mpsc::Receiver<SessionEvent>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Receive the next event. `None` means the session has terminated.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Request cancellation. The loop observes the signal at its next
    /// iteration boundary, including mid-sleep.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for the session task to finish.
    ///
    /// Drops the event receiver first, so a loop blocked on a full channel
    /// unblocks instead of deadlocking against its own consumer.
    pub async fn join(self) {
        drop(self.events);
        let _ = self.task.await;
    }
}

/// Spawn a detection session over an open frame source.
pub fn spawn_session(
    source: BoxedFrameSource,
    model: Arc<dyn Infer>,
    config: SessionConfig,
) -> SessionHandle {
    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
    let (stop_tx, stop_rx) = watch::channel(false);

    let task = tokio::spawn(run_session(source, model, config, stop_rx, event_tx));

    SessionHandle {
        events: event_rx,
        stop: stop_tx,
        task,
    }
}

async fn run_session(
    mut source: BoxedFrameSource,
    model: Arc<dyn Infer>,
    config: SessionConfig,
    mut stop: watch::Receiver<bool>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut last_emit: Option<Instant> = None;
    info!("Detection session started");

    loop {
        tokio::select! {
            biased;

            changed = stop.changed() => {
                // A closed stop channel counts as a stop request.
                if changed.is_err() || *stop.borrow() {
                    info!("Detection session stopped");
                    return;
                }
            }

            result = source.next_frame() => {
                match result {
                    Ok(Some(frame)) => {
                        let now = Instant::now();
                        let due = last_emit
                            .map(|t| now.duration_since(t) >= config.emit_interval)
                            .unwrap_or(true);
                        if !due {
                            // Drop the frame; keep draining so the decoder
                            // does not fall behind the live edge.
                            continue;
                        }

                        let event = match model.infer(&frame) {
                            Ok(objects) => SessionEvent::Detections(ObjectsMessage::now(objects)),
                            Err(e) => {
                                warn!(error = %e, "Inference failed on frame");
                                SessionEvent::Error(ErrorMessage::new(e.to_string()))
                            }
                        };
                        last_emit = Some(now);

                        if !send_event(&events, &mut stop, event).await {
                            debug!("Session ended during emit");
                            return;
                        }
                    }
                    Ok(None) => {
                        sleep(config.retry_delay).await;
                    }
                    Err(e) if e.is_transient() => {
                        debug!(error = %e, "Transient read failure, retrying");
                        sleep(config.retry_delay).await;
                    }
                    Err(e) => {
                        report_fatal(&events, &mut stop, &e).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Send an event unless a stop request (or a dropped receiver) gets there
/// first. Returns false when the session should terminate.
///
/// Racing the send against the stop channel keeps a loop blocked on a full
/// event channel cancellable; the frame source drops on that path like any
/// other.
async fn send_event(
    events: &mpsc::Sender<SessionEvent>,
    stop: &mut watch::Receiver<bool>,
    event: SessionEvent,
) -> bool {
    tokio::select! {
        biased;

        changed = stop.changed() => {
            let _ = changed;
            false
        }

        sent = events.send(event) => sent.is_ok(),
    }
}

/// Emit the single terminal error event for a fatal decode failure.
async fn report_fatal(
    events: &mpsc::Sender<SessionEvent>,
    stop: &mut watch::Receiver<bool>,
    error: &VisionError,
) {
    match error {
        VisionError::StreamEnded => info!("Stream ended, closing session"),
        other => warn!(error = %other, "Fatal session error"),
    }
    let event = SessionEvent::Error(ErrorMessage::new(error.to_string()));
    let _ = send_event(events, stop, event).await;
}
