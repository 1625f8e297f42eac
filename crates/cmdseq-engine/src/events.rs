use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use cmdseq_core::StatusEvent;
use futures::Stream;
use tokio::sync::mpsc;

// ─── StatusBus ────────────────────────────────────────────────────────────

/// Fan-out of [`StatusEvent`]s to external monitors.
///
/// Publishing never blocks a state machine: events are `try_send`-delivered,
/// a full subscriber loses the event, and a dropped subscriber is pruned on
/// the next publish.
#[derive(Clone, Default)]
pub struct StatusBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<StatusEvent>>>>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> StatusStream {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        StatusStream { rx }
    }

    pub fn publish(&self, event: &StatusEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

// ─── StatusStream ─────────────────────────────────────────────────────────

/// One subscriber's view of the status feed.
pub struct StatusStream {
    rx: mpsc::Receiver<StatusEvent>,
}

impl StatusStream {
    /// Receive the next event, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.rx.recv().await
    }
}

impl Stream for StatusStream {
    type Item = StatusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
