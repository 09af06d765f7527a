//! Per-call lifecycle shared by the send and receive halves of one RPC.
use crate::codec::CodecError;
use std::{
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Sending,
    Receiving,
    Completed,
    Failed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Failed | CallState::Cancelled
        )
    }
}

/// Why a call was torn down from the client side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Interruption {
    DeadlineExceeded,
    Cancelled,
    RequestRejected(CodecError),
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    interruption: OnceLock<Interruption>,
    state: Mutex<CallState>,
}

/// Cancellation signal, deadline and state of one call.
///
/// Cloned into every task working on the call. The first interruption recorded wins; later
/// ones only re-trigger the already fired token.
#[derive(Debug, Clone)]
pub(crate) struct CallControl(Arc<Inner>);

impl CallControl {
    pub(crate) fn new(parent: Option<&CancellationToken>, timeout: Option<Duration>) -> Self {
        let token = parent.map_or_else(CancellationToken::new, |p| p.child_token());

        Self(Arc::new(Inner {
            token,
            deadline: timeout.map(|t| Instant::now() + t),
            interruption: OnceLock::new(),
            state: Mutex::new(CallState::Idle),
        }))
    }

    pub(crate) fn interrupt(&self, reason: Interruption) {
        if self.0.interruption.set(reason).is_ok() {
            debug!(reason = ?self.0.interruption.get(), "interrupting call");
        }
        self.0.token.cancel();
    }

    /// Resolves once the call is cancelled or its deadline passes, with the recorded reason.
    pub(crate) async fn interrupted(&self) -> Interruption {
        let deadline = async {
            match self.0.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = self.0.token.cancelled() => self.interrupt(Interruption::Cancelled),
            _ = deadline => self.interrupt(Interruption::DeadlineExceeded),
        }

        self.reason().unwrap_or(Interruption::Cancelled)
    }

    /// The recorded interruption, if any.
    pub(crate) fn reason(&self) -> Option<Interruption> {
        self.0.interruption.get().cloned()
    }

    /// Runs `fut` unless the call is interrupted first.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Interruption> {
        tokio::select! {
            biased;
            reason = self.interrupted() => Err(reason),
            output = fut => Ok(output),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.0.token
    }

    /// Moves to `next` unless a terminal state was already reached.
    pub(crate) fn transition(&self, next: CallState) {
        let mut state = self.0.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() || *state == next {
            return;
        }
        debug!(from = ?*state, to = ?next, "call state transition");
        *state = next;
    }

    pub(crate) fn cancel(&self) {
        self.interrupt(Interruption::Cancelled);
        self.transition(CallState::Cancelled);
    }

    pub(crate) fn state(&self) -> CallState {
        *self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
