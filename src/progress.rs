//! Progress delivery from the recognition worker
//!
//! A bounded single-producer channel carries progress events from the worker
//! thread to the caller. The worker never blocks on a slow consumer: when the
//! channel is full the oldest intermediate event is evicted to make room, so
//! the consumer sees a coalesced stream. The terminal event is sent exactly
//! once (sending it consumes the publisher) and is never evicted.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use uuid::Uuid;

use crate::geometry::Rect;

/// Buffered events per run before coalescing kicks in
pub(crate) const PROGRESS_CAPACITY: usize = 32;

/// A periodic progress report from the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Percent complete, 0 to 100
    pub percent: u8,
    /// Area currently being scanned, within the image or active region bounds
    pub scan_rect: Rect,
    /// Bounds of the word currently being decoded, once one is known
    pub word_rect: Option<Rect>,
}

/// How a recognition run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Recognition ran to the end
    Completed {
        /// Recognized text
        text: String,
        /// Wall-clock time the run took
        duration: Duration,
    },
    /// A cooperative stop was honored before recognition finished
    Stopped,
    /// The engine reported an internal failure
    Failed {
        /// Engine-provided description
        message: String,
    },
}

/// One event observed by the consumer of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Intermediate progress; may be coalesced under backpressure
    Progress(ProgressUpdate),
    /// Terminal event, delivered exactly once after all progress events
    Done(RunOutcome),
}

/// Worker-side end of the progress channel
pub(crate) struct ProgressPublisher {
    sender: Sender<RunEvent>,
    // Held so the publisher can evict the oldest buffered event when full;
    // also keeps sends from failing once the consumer goes away.
    evict: Receiver<RunEvent>,
}

impl ProgressPublisher {
    /// Relay one progress update without blocking
    pub(crate) fn publish(&self, update: ProgressUpdate) {
        self.send_evicting(RunEvent::Progress(update));
    }

    /// Deliver the terminal event and close the channel
    pub(crate) fn finish(self, outcome: RunOutcome) {
        self.send_evicting(RunEvent::Done(outcome));
    }

    fn send_evicting(&self, mut event: RunEvent) {
        loop {
            match self.sender.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    // Single producer: dropping one buffered event guarantees
                    // room, and only Progress events can be buffered here.
                    let _ = self.evict.try_recv();
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Consumer-side view of one recognition run
pub struct RunHandle {
    id: Uuid,
    events: Receiver<RunEvent>,
}

impl RunHandle {
    /// Identifier of the run this handle observes
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Take the next event without blocking
    pub fn try_recv(&self) -> Option<RunEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event. Returns `None` once the run is over and all
    /// events have been taken.
    pub fn recv(&self) -> Option<RunEvent> {
        self.events.recv().ok()
    }

    /// Block until the run ends, discarding remaining progress events.
    pub fn wait(self) -> RunOutcome {
        while let Some(event) = self.recv() {
            if let RunEvent::Done(outcome) = event {
                return outcome;
            }
        }
        // The worker always finishes the run; reaching this means it died
        // before it could.
        RunOutcome::Failed {
            message: "progress channel closed before completion".to_string(),
        }
    }

    /// Iterate over events, blocking, until the run is over
    pub fn iter(&self) -> impl Iterator<Item = RunEvent> + '_ {
        self.events.iter()
    }
}

/// Create the channel pair for one run
pub(crate) fn progress_channel(run_id: Uuid) -> (ProgressPublisher, RunHandle) {
    let (sender, receiver) = bounded(PROGRESS_CAPACITY);
    let publisher = ProgressPublisher {
        sender,
        evict: receiver.clone(),
    };
    let handle = RunHandle {
        id: run_id,
        events: receiver,
    };
    (publisher, handle)
}
