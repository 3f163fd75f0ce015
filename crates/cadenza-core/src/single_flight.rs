//! Single-flight coordinator for overlapping async operations.
//!
//! Serializes a stream of "run" requests so that at most one body is ever
//! executing: admitting a new run cancels the current one (cooperatively,
//! via its [`CancellationToken`]) and waits for it to fully settle before
//! the new body starts. Only the latest run's outcome matters to callers;
//! a superseded run's failure is logged and never propagated.

use crate::cancel::CancellationToken;
use crate::error::{CoreError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// Handle to a run admitted by [`SingleFlight::run`].
///
/// Awaiting it yields the body's outcome. If the body's task is torn down
/// without reporting (runtime shutdown), waiting fails with
/// [`CoreError::Cancelled`].
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Completion<T> {
    /// Wait for the run to settle and take its outcome.
    pub async fn wait(self) -> Result<T> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CoreError::Cancelled),
        }
    }
}

struct Instance {
    id: u64,
    token: CancellationToken,
    /// Resolves when the body has stopped executing; carries a failure
    /// description for the coordinator to log.
    settled: oneshot::Receiver<Option<String>>,
}

#[derive(Default)]
struct State {
    current: Option<Instance>,
    next_id: u64,
}

/// Coordinator guaranteeing at most one in-flight run per instance.
pub struct SingleFlight<T> {
    state: Arc<Mutex<State>>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            _marker: std::marker::PhantomData,
        }
    }

    /// Admit a new run, superseding any current one.
    pub async fn run<F, Fut>(&self, body: F) -> Completion<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.admit(body, None).await
    }

    /// Admit a new run, invoking `on_cancel` before the current run's
    /// token is cancelled (so the callback observes the pre-cancellation
    /// state of whatever the superseded run was driving).
    pub async fn run_with_cancel<F, Fut, C>(&self, body: F, on_cancel: C) -> Completion<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.admit(body, Some(Box::new(on_cancel))).await
    }

    async fn admit<F, Fut>(
        &self,
        body: F,
        on_cancel: Option<Box<dyn FnOnce() + Send>>,
    ) -> Completion<T>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut state = self.state.lock().await;

        if let Some(previous) = state.current.take() {
            if let Some(callback) = on_cancel {
                callback();
            }
            previous.token.cancel();
            debug!(run = previous.id, "superseding in-flight run");

            // The new body must not start until the old one has stopped
            // executing, even if the old one ignores its token.
            match previous.settled.await {
                Ok(Some(failure)) => {
                    warn!(run = previous.id, %failure, "superseded run failed");
                }
                Ok(None) => {}
                Err(_) => {
                    warn!(run = previous.id, "superseded run dropped without settling");
                }
            }
        }

        let id = state.next_id;
        state.next_id += 1;

        let token = CancellationToken::new();
        let (result_tx, result_rx) = oneshot::channel();
        let (settled_tx, settled_rx) = oneshot::channel();

        let task_state = Arc::clone(&self.state);
        let task_token = token.clone();
        tokio::spawn(async move {
            let outcome = body(task_token).await;
            let failure = outcome.as_ref().err().map(|e| e.to_string());

            // Report to the caller first so its completion handle settles
            // before any successor run is admitted past `settled`.
            let _ = result_tx.send(outcome);
            let _ = settled_tx.send(failure);

            let mut state = task_state.lock().await;
            if state.current.as_ref().map(|i| i.id) == Some(id) {
                state.current = None;
            }
        });

        state.current = Some(Instance {
            id,
            token,
            settled: settled_rx,
        });

        Completion { rx: result_rx }
    }

    /// Whether a run is currently recorded as in flight.
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.current.is_some()
    }

    /// Identifier of the run currently recorded as in flight, if any.
    /// Identifiers are minted per coordinator and never reused, so a
    /// changed id means the previous run was superseded.
    pub async fn current_id(&self) -> Option<u64> {
        self.state.lock().await.current.as_ref().map(|i| i.id)
    }
}
