//! # Remote Conversational Channel
//!
//! The contract between the session controller and whatever carries audio to
//! and from the remote model. A connector opens a channel and hands back a
//! [`ChannelHandle`]; the channel reports `Opened` once the remote accepted
//! the session, then streams audio and control events until it closes.
//!
//! Outbound microphone frames go through an [`OutboundQueue`]: a bounded
//! buffer that drops the oldest frame when the transport falls behind, so
//! the capture callback never blocks and stale audio is what gets lost.

use crate::audio::codec::EncodedPayload;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

/// Session parameters sent to the remote when the channel opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub model: String,
    pub response_modality: String,
    pub voice_name: String,
    pub system_instruction: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// The model finished its turn.
    TurnComplete,
    /// The user barged in; the model dropped the rest of its turn.
    Interrupted,
    /// The remote is about to close the connection.
    GoAway,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    Audio(EncodedPayload),
    Control(ControlEvent),
    Closed(Option<String>),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Accepted after evicting the oldest queued frame.
    DroppedOldest,
    /// The channel is gone; the frame was discarded.
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<EncodedPayload>,
    closed: bool,
}

#[derive(Debug)]
struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

/// Bounded drop-oldest handoff of encoded frames to a single consumer.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    inner: Arc<QueueInner>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Never blocks. Safe to call from a device callback thread.
    pub fn push(&self, payload: EncodedPayload) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            let outcome = if state.frames.len() >= self.inner.capacity {
                state.frames.pop_front();
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Accepted
            };
            state.frames.push_back(payload);
            outcome
        };
        self.inner.notify.notify_one();
        outcome
    }

    /// Next queued frame, or `None` once closed. Frames still queued at close
    /// are discarded.
    pub async fn pop(&self) -> Option<EncodedPayload> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<EncodedPayload> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.frames.pop_front()
    }

    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.frames.clear();
        }
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// Controller-side end of an open channel.
pub struct ChannelHandle {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    input: OutboundQueue,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Transport-side end of a channel: where a connector's task reads outbound
/// frames and reports events.
pub struct RemoteEnd {
    pub events: mpsc::UnboundedSender<ChannelEvent>,
    pub input: OutboundQueue,
    pub shutdown: oneshot::Receiver<()>,
}

impl RemoteEnd {
    /// Report an event. Returns false once the controller side is gone.
    pub fn emit(&self, event: ChannelEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn close_requested(&mut self) -> bool {
        !matches!(
            self.shutdown.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

impl ChannelHandle {
    /// Create a connected handle/remote pair with an outbound queue of
    /// `capacity` frames.
    pub fn pair(capacity: usize) -> (ChannelHandle, RemoteEnd) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let input = OutboundQueue::new(capacity);
        (
            ChannelHandle {
                events: events_rx,
                input: input.clone(),
                shutdown: Some(shutdown_tx),
                task: None,
            },
            RemoteEnd {
                events: events_tx,
                input,
                shutdown: shutdown_rx,
            },
        )
    }

    /// Attach the transport task so it is reaped with the handle.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn send_realtime_input(&self, payload: EncodedPayload) -> PushOutcome {
        self.input.push(payload)
    }

    /// Clone of the outbound queue, for producers on other threads.
    pub fn input_queue(&self) -> OutboundQueue {
        self.input.clone()
    }

    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Close the channel. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.input.close();
        self.events.close();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            debug!("Channel close requested");
        }
        // The transport task finishes its close handshake on its own.
        self.task.take();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens channels to the remote model.
///
/// `open` must not block: it returns immediately and the handle reports
/// `Opened`, `Error`, or `Closed` once the transport knows.
pub trait ChannelConnector: Send + Sync {
    fn open(&self, request: &ConnectRequest, input_capacity: usize) -> ChannelHandle;
}
