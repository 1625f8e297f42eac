use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Duration, Instant};
use uuid::Uuid;

use crate::error::{EngineError, Result};

// ─── Wire types ───────────────────────────────────────────────────────────

/// One command submission to the external command router.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub correlation: Uuid,
    pub opcode: u32,
    pub args: Vec<u8>,
}

/// The router's answer to a [`CommandRequest`], keyed by correlation id.
#[derive(Debug, Clone)]
pub struct RouterReply {
    pub correlation: Uuid,
    pub outcome: DispatchOutcome,
}

/// Terminal outcome of one dispatched record.
///
/// `Timeout` is never sent by a router; the gateway synthesizes it when the
/// per-dispatch bound elapses without a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Failure(String),
    Timeout,
}

impl DispatchOutcome {
    /// Stable error code reported in status events.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            DispatchOutcome::Success => None,
            DispatchOutcome::Failure(_) => Some("dispatch_failed"),
            DispatchOutcome::Timeout => Some("dispatch_timeout"),
        }
    }
}

/// A resolved dispatch, consumed exactly once by the owning state machine.
#[derive(Debug)]
pub struct DispatchResult {
    pub correlation: Uuid,
    pub record_index: u32,
    pub outcome: DispatchOutcome,
}

// ─── DispatchGateway ──────────────────────────────────────────────────────

/// The engine's side of the command-dispatch interface.
///
/// Submitting a record sends a [`CommandRequest`] down an mpsc channel to
/// the external router and registers a oneshot waiter under a fresh
/// correlation id. A background demux task resolves [`RouterReply`]s back
/// to their waiters; replies whose waiter is gone (sequence cancelled) are
/// dropped. Waiting on a [`PendingDispatch`] is bounded: if the router
/// never answers, the result is a synthetic [`DispatchOutcome::Timeout`].
#[derive(Clone)]
pub struct DispatchGateway {
    requests: mpsc::Sender<CommandRequest>,
    pending: Arc<Mutex<HashMap<Uuid, oneshot::Sender<DispatchOutcome>>>>,
    timeout: Duration,
}

/// The router's end of the channel pair: requests in, replies out.
pub struct RouterChannel {
    pub requests: mpsc::Receiver<CommandRequest>,
    pub replies: mpsc::Sender<RouterReply>,
}

impl DispatchGateway {
    /// Create a gateway plus the channel endpoints the external router
    /// drives.
    pub fn channel(capacity: usize, timeout: Duration) -> (DispatchGateway, RouterChannel) {
        let (req_tx, req_rx) = mpsc::channel(capacity);
        let (rep_tx, mut rep_rx) = mpsc::channel::<RouterReply>(capacity);
        let pending: Arc<Mutex<HashMap<Uuid, oneshot::Sender<DispatchOutcome>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let waiters = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(reply) = rep_rx.recv().await {
                let waiter = waiters
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&reply.correlation);
                match waiter {
                    // The waiter may itself be gone (cancelled sequence);
                    // the failed send is the drop the contract asks for.
                    Some(tx) => {
                        let _ = tx.send(reply.outcome);
                    }
                    None => {
                        tracing::debug!(correlation = %reply.correlation, "dropping unclaimed router reply");
                    }
                }
            }
            // Router hung up: releasing the waiters fails their dispatches
            // instead of leaving them to ride out the timeout.
            waiters.lock().unwrap_or_else(|e| e.into_inner()).clear();
        });

        let gateway = DispatchGateway {
            requests: req_tx,
            pending,
            timeout,
        };
        let router = RouterChannel {
            requests: req_rx,
            replies: rep_tx,
        };
        (gateway, router)
    }

    /// A gateway wired to an in-process router that acknowledges every
    /// request with `Success`. Used by the CLI demo driver and tests.
    pub fn loopback(capacity: usize, timeout: Duration) -> DispatchGateway {
        let (gateway, mut router) = Self::channel(capacity, timeout);
        tokio::spawn(async move {
            while let Some(req) = router.requests.recv().await {
                let reply = RouterReply {
                    correlation: req.correlation,
                    outcome: DispatchOutcome::Success,
                };
                if router.replies.send(reply).await.is_err() {
                    break;
                }
            }
        });
        gateway
    }

    /// Submit one record's command. Exactly one downstream submission per
    /// call; the returned pending handle resolves to exactly one
    /// [`DispatchResult`].
    pub async fn dispatch(
        &self,
        record_index: u32,
        opcode: u32,
        args: Vec<u8>,
    ) -> Result<PendingDispatch> {
        let correlation = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(correlation, tx);

        let request = CommandRequest {
            correlation,
            opcode,
            args,
        };
        if self.requests.send(request).await.is_err() {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&correlation);
            return Err(EngineError::EngineShutdown);
        }

        Ok(PendingDispatch {
            correlation,
            record_index,
            rx,
            expires: Instant::now() + self.timeout,
        })
    }
}

// ─── PendingDispatch ──────────────────────────────────────────────────────

/// An issued command awaiting its router reply.
///
/// Dropping it abandons the correlation: a reply arriving later is
/// discarded by the demux task.
#[derive(Debug)]
pub struct PendingDispatch {
    correlation: Uuid,
    record_index: u32,
    rx: oneshot::Receiver<DispatchOutcome>,
    expires: Instant,
}

impl PendingDispatch {
    pub fn correlation(&self) -> Uuid {
        self.correlation
    }

    pub fn record_index(&self) -> u32 {
        self.record_index
    }

    /// Resolve this dispatch. Cancel-safe: polling can be abandoned and
    /// resumed without losing the reply.
    pub async fn wait(&mut self) -> DispatchResult {
        let outcome = match timeout_at(self.expires, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => DispatchOutcome::Failure("command router closed".to_string()),
            Err(_) => DispatchOutcome::Timeout,
        };
        DispatchResult {
            correlation: self.correlation,
            record_index: self.record_index,
            outcome,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
