//! Single-writer completion cell for a dispatch session.
//!
//! [`PendingCompletion`] is owned by the session and resolved at most once.
//! Any number of [`Completion`] readers can poll it, await it, or block on
//! it from a plain thread.

use crate::error::CompletionError;
use serde_json::Value;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Clone)]
enum State {
    Pending,
    Resolved(Value),
    Failed(CompletionError),
}

impl State {
    fn outcome(&self) -> Option<Result<Value, CompletionError>> {
        match self {
            State::Pending => None,
            State::Resolved(value) => Some(Ok(value.clone())),
            State::Failed(error) => Some(Err(error.clone())),
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, next: State) -> Result<(), CompletionError> {
        let mut state = self.lock();
        if !matches!(*state, State::Pending) {
            return Err(CompletionError::AlreadyCompleted);
        }
        *state = next;
        drop(state);
        self.cond.notify_all();
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Writer half. Dropping it while still pending fails the cell with
/// [`CompletionError::Abandoned`].
#[derive(Debug)]
pub struct PendingCompletion {
    shared: Arc<Shared>,
}

impl Default for PendingCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCompletion {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending),
                cond: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// A reader handle for this cell.
    pub fn completion(&self) -> Completion {
        Completion {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Resolve with a value. Fails if already resolved or failed.
    pub fn resolve(&self, value: Value) -> Result<(), CompletionError> {
        self.shared.settle(State::Resolved(value))
    }

    /// Fail with a message. Fails if already resolved or failed.
    pub fn fail(&self, message: impl Into<String>) -> Result<(), CompletionError> {
        self.shared
            .settle(State::Failed(CompletionError::Failed(message.into())))
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.shared.lock(), State::Pending)
    }
}

impl Drop for PendingCompletion {
    fn drop(&mut self) {
        if self.shared.settle(State::Failed(CompletionError::Abandoned)).is_ok() {
            warn!("completion abandoned before a result was returned");
        }
    }
}

/// Reader half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Completion {
    shared: Arc<Shared>,
}

impl Completion {
    /// Current outcome, or `None` while pending.
    pub fn poll(&self) -> Option<Result<Value, CompletionError>> {
        self.shared.lock().outcome()
    }

    pub fn is_done(&self) -> bool {
        self.poll().is_some()
    }

    /// Wait for the outcome. On timeout nothing is cancelled; the cell can
    /// still be resolved and awaited again.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<Value, CompletionError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.settled())
                .await
                .unwrap_or(Err(CompletionError::Timeout(limit))),
            None => self.settled().await,
        }
    }

    async fn settled(&self) -> Result<Value, CompletionError> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a resolve in between is not missed.
            notified.as_mut().enable();
            if let Some(outcome) = self.poll() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Blocking variant of [`wait`](Self::wait) for non-async callers.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> Result<Value, CompletionError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return outcome;
            }
            state = match deadline {
                None => self
                    .shared
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CompletionError::Timeout(timeout.unwrap_or_default()));
                    }
                    self.shared
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}
