//! Typed handle for one encoder subprocess.
//!
//! A handle is the session's side of a pair of channels; the other side, the
//! [`EncoderEndpoint`], is driven either by a real process (see
//! [`crate::encoder::process`]) or by a test double. All status reaches the
//! session through one event channel, and [`EncoderEvent::Exited`] is always
//! the last event a handle yields.

use crate::config::TargetConfig;
use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Status reported by an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// The stream reached the ingest server. Yielded at most once per handle.
    Connected,
    /// The encoder reported a problem; the process may still be running.
    Failure(String),
    /// The process is gone. `None` when it was killed by a signal.
    Exited(Option<i32>),
}

/// Lifecycle of a handle: `Starting → (Connected | Error) → Terminated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderState {
    Starting,
    Connected,
    /// Last reported failure. Not terminal.
    Error(String),
    Terminated(Option<i32>),
}

/// Result of handing one converted block to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Queued for the encoder's stdin.
    Queued,
    /// The input queue is full; the block was dropped.
    Backpressure,
    /// The encoder is stopping or gone; the block was dropped.
    Closed,
}

/// Starts encoders for sessions.
pub trait EncoderLauncher: Send + Sync {
    /// Start a new encoder for `target`.
    ///
    /// Returns as soon as the process exists; readiness arrives later as
    /// [`EncoderEvent::Connected`]. Must be called from within a tokio runtime.
    fn launch(&self, target: &TargetConfig) -> Result<EncoderHandle>;
}

/// The process side of an [`EncoderHandle`].
pub struct EncoderEndpoint {
    /// Converted `s16le` blocks in arrival order.
    pub input: mpsc::Receiver<Vec<u8>>,
    /// Fires (or is dropped) when the session wants the encoder gone.
    pub stop: oneshot::Receiver<()>,
    /// Status towards the session.
    pub events: mpsc::UnboundedSender<EncoderEvent>,
}

/// Session-owned handle to one encoder.
#[derive(Debug)]
pub struct EncoderHandle {
    id: u64,
    pid: Option<u32>,
    input: Option<mpsc::Sender<Vec<u8>>>,
    stop: Option<oneshot::Sender<()>>,
    events: mpsc::UnboundedReceiver<EncoderEvent>,
    state: EncoderState,
    connected_seen: bool,
    dropped_blocks: u64,
}

/// Create a connected handle/endpoint pair with room for `input_capacity`
/// queued blocks.
pub fn channel(input_capacity: usize) -> (EncoderHandle, EncoderEndpoint) {
    let (input_tx, input_rx) = mpsc::channel(input_capacity.max(1));
    let (stop_tx, stop_rx) = oneshot::channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let handle = EncoderHandle {
        id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        pid: None,
        input: Some(input_tx),
        stop: Some(stop_tx),
        events: events_rx,
        state: EncoderState::Starting,
        connected_seen: false,
        dropped_blocks: 0,
    };
    let endpoint = EncoderEndpoint {
        input: input_rx,
        stop: stop_rx,
        events: events_tx,
    };
    (handle, endpoint)
}

impl EncoderHandle {
    /// Process-unique id of this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// OS process id, when backed by a real process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) fn set_pid(&mut self, pid: Option<u32>) {
        self.pid = pid;
    }

    pub fn state(&self) -> &EncoderState {
        &self.state
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, EncoderState::Terminated(_))
    }

    /// Whether `stop` was called or the encoder exited.
    pub fn is_stopping(&self) -> bool {
        self.input.is_none()
    }

    /// Blocks dropped because of backpressure since the handle was created.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }

    /// Queue one converted block for the encoder's stdin.
    ///
    /// Never waits: a full queue drops the block instead of adding latency.
    pub fn feed(&mut self, bytes: Vec<u8>) -> FeedOutcome {
        let Some(input) = &self.input else {
            return FeedOutcome::Closed;
        };
        match input.try_send(bytes) {
            Ok(()) => FeedOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_blocks += 1;
                FeedOutcome::Backpressure
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.input = None;
                FeedOutcome::Closed
            }
        }
    }

    /// Close the encoder's input and ask for termination.
    ///
    /// Idempotent, and a no-op once the encoder has exited.
    pub fn stop(&mut self) {
        // Dropping the sender closes stdin once the queue drains.
        self.input = None;
        if let Some(stop) = self.stop.take()
            && stop.send(()).is_err()
        {
            tracing::trace!(handle = self.id, "encoder already gone at stop");
        }
    }

    /// Wait for the next status event.
    ///
    /// Duplicate `Connected` events are swallowed. If the process side
    /// disappears without reporting an exit, `Exited(None)` is synthesized.
    /// Returns `None` once the handle is terminated.
    pub async fn next_event(&mut self) -> Option<EncoderEvent> {
        if self.is_terminated() {
            return None;
        }
        loop {
            let event = self.events.recv().await.unwrap_or(EncoderEvent::Exited(None));
            match &event {
                EncoderEvent::Connected => {
                    if self.connected_seen {
                        continue;
                    }
                    self.connected_seen = true;
                    self.state = EncoderState::Connected;
                }
                EncoderEvent::Failure(message) => {
                    self.state = EncoderState::Error(message.clone());
                }
                EncoderEvent::Exited(code) => {
                    self.state = EncoderState::Terminated(*code);
                    self.input = None;
                    self.stop = None;
                }
            }
            return Some(event);
        }
    }
}

impl Drop for EncoderHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
