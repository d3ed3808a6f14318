//! Recognition runs.
//!
//! Each run executes on its own worker thread so the caller never blocks on
//! the engine. The worker binds the input, drives the engine, then settles
//! the run inside one state lock scope where a deferred release, if one was
//! requested mid-run, tears the engine down. The terminal event is published
//! only after that scope ends, so an observer of the outcome sees the
//! session already settled.

use std::sync::Arc;
use std::thread;

use tracing::{error, info};
use uuid::Uuid;

use super::state::{RunCompletion, RunTicket};
use super::{release_engine, BoundInput, InputSource, Session, Shared};
use crate::engine::OcrEngine;
use crate::error::{OcrError, Result};
use crate::progress::{
    progress_channel, ProgressPublisher, ProgressUpdate, RunEvent, RunHandle, RunOutcome,
};

impl Session {
    /// Start a recognition run on the bound input.
    ///
    /// Returns immediately with a handle delivering progress updates and the
    /// terminal outcome. At most one run is in flight per session; a second
    /// `start` fails with `Busy` until the first completes.
    pub fn start(&self) -> Result<RunHandle> {
        let (ticket, input) = {
            let mut state = self.shared.state.lock();
            state.ensure_idle_initialized()?;
            let input = state.input.clone().ok_or(OcrError::NoInput)?;
            let ticket = state.begin_run()?;
            (ticket, input)
        };

        let run_id = ticket.id();
        let (publisher, handle) = progress_channel(run_id);
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || run_worker(shared, ticket, input, publisher));

        info!("Recognition run {} started", run_id);
        Ok(handle)
    }

    /// Start a run and deliver its events through callbacks.
    ///
    /// `on_progress` is called for every update that survives coalescing;
    /// `on_complete` is called exactly once with the outcome. Both run on a
    /// relay thread, never on the caller's.
    pub fn start_with_callbacks(
        &self,
        mut on_progress: impl FnMut(ProgressUpdate) + Send + 'static,
        on_complete: impl FnOnce(RunOutcome) + Send + 'static,
    ) -> Result<Uuid> {
        let handle = self.start()?;
        let run_id = handle.id();

        thread::spawn(move || {
            let mut terminal = None;
            for event in handle.iter() {
                match event {
                    RunEvent::Progress(update) => on_progress(update),
                    RunEvent::Done(outcome) => {
                        terminal = Some(outcome);
                        break;
                    }
                }
            }
            let outcome = terminal.unwrap_or(RunOutcome::Failed {
                message: "progress channel closed before completion".to_string(),
            });
            on_complete(outcome);
        });

        Ok(run_id)
    }
}

fn run_worker(
    shared: Arc<Shared>,
    ticket: RunTicket,
    input: BoundInput,
    publisher: ProgressPublisher,
) {
    let run_id = ticket.id();
    let engine = shared.engine.as_ref();

    let bound = bind_input(engine, &input);

    if bound.is_ok() {
        // Binding resets the engine's stop latch, so a stop that arrived
        // between run start and here would be lost. Re-arm it.
        let state = shared.state.lock();
        if state.run.as_ref().is_some_and(|run| run.stop_requested) {
            engine.stop();
        }
    }

    let engine_result = match bound {
        Ok(()) => engine.recognize(&mut |update| publisher.publish(update)),
        Err(e) => Err(e),
    };

    let outcome = {
        let mut state = shared.state.lock();
        let completion = state.complete_run(ticket);
        if completion.release_now {
            state.input = None;
            release_engine(engine);
            info!("Session released after run {}", run_id);
        }
        run_outcome(engine_result, &completion)
    };

    match &outcome {
        RunOutcome::Completed { duration, .. } => {
            info!("Run {} completed in {:?}", run_id, duration);
        }
        RunOutcome::Stopped => info!("Run {} stopped", run_id),
        RunOutcome::Failed { message } => error!("Run {} failed: {}", run_id, message),
    }

    // Published outside the lock: whoever observes the terminal event sees
    // the run slot free and any deferred release already executed.
    publisher.finish(outcome);
}

fn bind_input(engine: &dyn OcrEngine, input: &BoundInput) -> anyhow::Result<()> {
    match &input.source {
        InputSource::Buffer(buffer) => engine.set_image(buffer)?,
        InputSource::File(path) => engine.set_source_file(path)?,
        InputSource::Region { buffer, .. } => engine.set_image(buffer)?,
    }
    if let Some(region) = input.region {
        engine.set_rectangle(region)?;
    }
    Ok(())
}

fn run_outcome(
    engine_result: anyhow::Result<Option<String>>,
    completion: &RunCompletion,
) -> RunOutcome {
    match engine_result {
        Ok(Some(text)) if !completion.was_stopped => RunOutcome::Completed {
            text,
            duration: completion.duration,
        },
        Ok(_) => RunOutcome::Stopped,
        Err(e) => {
            if completion.was_stopped {
                RunOutcome::Stopped
            } else {
                RunOutcome::Failed {
                    message: format!("{e:#}"),
                }
            }
        }
    }
}
