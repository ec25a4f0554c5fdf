//! Start/stop state machine shared by the ingestion loops.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//! ```
//!
//! The state is readable without locking. Only the start and stop
//! transitions are serialized; the background task itself runs unguarded.
//! Every `start` gets a fresh cancellation token, and `stop` waits for the
//! task to finish before reporting `Stopped`.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => State::Starting,
            2 => State::Running,
            3 => State::Stopping,
            _ => State::Stopped,
        }
    }
}

#[derive(Debug)]
struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the background task of one ingestion loop.
#[derive(Debug)]
pub struct Lifecycle {
    name: &'static str,
    state: Arc<AtomicU8>,
    session: Mutex<Option<Session>>,
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(AtomicU8::new(State::Stopped as u8)),
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    /// Spawns `run` as the background task of a new session.
    ///
    /// Fails with [`Error::AlreadyRunning`] unless the state is `Stopped`. If
    /// the task returns on its own, the state falls back to `Stopped` without
    /// a call to [`Self::stop`].
    pub async fn start<F, Fut>(&self, run: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut session = self.session.lock().await;
        if self
            .state
            .compare_exchange(
                State::Stopped as u8,
                State::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        // a session that ended on its own leaves its finished task behind
        if let Some(previous) = session.take() {
            let _ = previous.task.await;
        }

        let cancel = CancellationToken::new();
        let fut = run(cancel.clone());
        let state = Arc::clone(&self.state);
        let name = self.name;
        let task = tokio::spawn(async move {
            fut.await;
            let ended_on_its_own = state
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                    matches!(State::from_u8(s), State::Starting | State::Running)
                        .then_some(State::Stopped as u8)
                })
                .is_ok();
            if ended_on_its_own {
                tracing::debug!(name, "background loop exited without stop request");
            }
        });

        let _ = self.state.compare_exchange(
            State::Starting as u8,
            State::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        *session = Some(Session { cancel, task });
        tracing::debug!(name, "started");
        Ok(())
    }

    /// Cancels the current session and waits for its task to exit.
    ///
    /// A no-op when nothing is running. Must not be awaited from inside the
    /// session's own task, since it waits for that task to finish.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        let transitioned = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                matches!(State::from_u8(s), State::Starting | State::Running)
                    .then_some(State::Stopping as u8)
            })
            .is_ok();

        let Some(current) = session.take() else {
            if transitioned {
                self.state.store(State::Stopped as u8, Ordering::Release);
            }
            return;
        };

        current.cancel.cancel();
        if let Err(e) = current.task.await
            && e.is_panic()
        {
            tracing::error!(name = self.name, error = %e, "background loop panicked");
        }

        if transitioned {
            self.state.store(State::Stopped as u8, Ordering::Release);
            tracing::debug!(name = self.name, "stopped");
        }
    }
}
