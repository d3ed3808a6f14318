//! Session state machine
//!
//! Every piece of lifecycle bookkeeping lives in one structure behind one
//! mutex. The run-completion handler and the release path take the same
//! lock, which is what makes a deferred release impossible to race against
//! an in-flight recognition.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::{OcrError, Result};
use crate::session::BoundInput;

/// Lifecycle of the engine handle owned by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Uninitialized,
    Initialized,
    /// Terminal. Entered the moment release is requested, even when the
    /// engine teardown itself is deferred to the active run's completion.
    Released,
}

/// Bookkeeping for the run in flight
#[derive(Debug)]
pub(crate) struct ActiveRun {
    pub(crate) id: Uuid,
    pub(crate) started_at: Instant,
    pub(crate) stop_requested: bool,
}

/// Move-only witness that the run slot was taken.
///
/// [`SessionState::begin_run`] mints one per run and
/// [`SessionState::complete_run`] consumes it, so only the worker that
/// started a run can finish it, exactly once.
#[derive(Debug)]
pub(crate) struct RunTicket {
    id: Uuid,
}

impl RunTicket {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }
}

/// What the completion handler decided while it held the lock
#[derive(Debug)]
pub(crate) struct RunCompletion {
    /// A stop was requested at some point during the run
    pub(crate) was_stopped: bool,
    /// Wall-clock duration of the run
    pub(crate) duration: Duration,
    /// The pending-release flag was consumed; the engine must be torn down
    /// inside the current critical section
    pub(crate) release_now: bool,
}

/// Shared session state. Guarded by the single session mutex.
pub(crate) struct SessionState {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) run: Option<ActiveRun>,
    pub(crate) release_pending: bool,
    pub(crate) input: Option<BoundInput>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            run: None,
            release_pending: false,
            input: None,
        }
    }

    /// Gate for operations that need an initialized session with no run in
    /// flight
    pub(crate) fn ensure_idle_initialized(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Released => Err(OcrError::AlreadyReleased),
            Lifecycle::Uninitialized => Err(OcrError::NotInitialized),
            Lifecycle::Initialized if self.run.is_some() => Err(OcrError::Busy),
            Lifecycle::Initialized => Ok(()),
        }
    }

    /// Take the run slot.
    ///
    /// Fails with `Busy` while the slot is taken, so a second worker can
    /// never start; the returned ticket is the only way to give the slot
    /// back.
    pub(crate) fn begin_run(&mut self) -> Result<RunTicket> {
        self.ensure_idle_initialized()?;
        if self.input.is_none() {
            return Err(OcrError::NoInput);
        }

        let id = Uuid::new_v4();
        self.run = Some(ActiveRun {
            id,
            started_at: Instant::now(),
            stop_requested: false,
        });
        Ok(RunTicket { id })
    }

    /// Give the run slot back and consume the pending-release flag.
    ///
    /// The caller must perform the engine teardown before dropping the lock
    /// whenever `release_now` comes back true.
    pub(crate) fn complete_run(&mut self, ticket: RunTicket) -> RunCompletion {
        debug_assert_eq!(self.run.as_ref().map(|r| r.id), Some(ticket.id));

        let (was_stopped, duration) = match self.run.take() {
            Some(run) => (run.stop_requested, run.started_at.elapsed()),
            None => (false, Duration::ZERO),
        };
        let release_now = std::mem::take(&mut self.release_pending);

        RunCompletion {
            was_stopped,
            duration,
            release_now,
        }
    }
}
