//! Engine Session Layer
//!
//! Owns one exclusive recognition engine and serializes every interaction
//! with it: initialization, input binding, recognition runs on a worker
//! thread, cooperative stop and teardown. A release requested while a run is
//! in flight is deferred to the run's completion handler instead of racing
//! the blocking engine call.

mod run;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::ImageBuffer;
use crate::config::{SegmentationMode, SessionConfig};
use crate::engine::{OcrEngine, Word};
use crate::error::{OcrError, Result};
use crate::geometry::Rect;

use state::{Lifecycle, SessionState};

/// Recognition input bound to a session
#[derive(Debug, Clone)]
pub enum InputSource {
    /// An in-memory pixel buffer
    Buffer(ImageBuffer),
    /// A raster file, decoded by the worker when the run starts
    File(PathBuf),
    /// A sub-rectangle of a pixel buffer
    Region {
        /// Buffer holding the pixels
        buffer: ImageBuffer,
        /// Region to recognize, in buffer coordinates
        rect: Rect,
    },
}

/// A validated input plus the region of interest laid over it
#[derive(Debug, Clone)]
pub(crate) struct BoundInput {
    pub(crate) source: InputSource,
    pub(crate) bounds: Rect,
    pub(crate) region: Option<Rect>,
}

#[cfg(test)]
impl BoundInput {
    pub(crate) fn for_tests() -> Self {
        let buffer = ImageBuffer::new(8, 8, 32).unwrap();
        let bounds = buffer.bounds();
        Self {
            source: InputSource::Buffer(buffer),
            bounds,
            region: None,
        }
    }
}

/// State shared between the session handle and its worker threads
pub(crate) struct Shared {
    pub(crate) engine: Box<dyn OcrEngine>,
    pub(crate) state: Mutex<SessionState>,
}

/// A safe, cancellable session around one recognition engine.
///
/// The engine is exclusively owned: all calls into it go through this handle
/// or through the single worker thread of the run in flight. Dropping the
/// session releases the engine, deferring the teardown if a run is active.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create a session owning the given engine
    pub fn new(engine: impl OcrEngine + 'static) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine: Box::new(engine),
                state: Mutex::new(SessionState::new()),
            }),
        }
    }

    /// Initialize (or re-initialize) the engine.
    ///
    /// Validates the config, then lets the engine load its models and apply
    /// variable overrides. On failure the session stays uninitialized and
    /// another `init` may be attempted. A successful re-init resets the
    /// bound input and region of interest.
    pub fn init(&self, config: &SessionConfig) -> Result<()> {
        let mut state = self.shared.state.lock();
        match state.lifecycle {
            Lifecycle::Released => return Err(OcrError::AlreadyReleased),
            _ if state.run.is_some() => return Err(OcrError::Busy),
            _ => {}
        }

        config.validate()?;
        if let Err(e) = self.shared.engine.init(config) {
            warn!("Engine init failed: {:#}", e);
            state.lifecycle = Lifecycle::Uninitialized;
            state.input = None;
            return Err(OcrError::InvalidConfig {
                reason: format!("{e:#}"),
            });
        }

        state.lifecycle = Lifecycle::Initialized;
        state.input = None;
        info!(
            "Session initialized: engine {}",
            self.shared.engine.version()
        );
        Ok(())
    }

    /// Bind the target for the next recognition run.
    ///
    /// Buffers are held as-is (sharing their storage), files are probed for
    /// their dimensions here and decoded by the worker at run start. Binding
    /// replaces any previous input and region of interest.
    pub fn set_input(&self, source: InputSource) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_idle_initialized()?;

        let input = match source {
            InputSource::Buffer(buffer) => {
                let bounds = buffer.bounds();
                BoundInput {
                    source: InputSource::Buffer(buffer),
                    bounds,
                    region: None,
                }
            }
            InputSource::File(path) => {
                let (width, height) =
                    image::image_dimensions(&path).map_err(|e| OcrError::InputRead {
                        reason: e.to_string(),
                    })?;
                BoundInput {
                    source: InputSource::File(path),
                    bounds: Rect::of_size(width, height),
                    region: None,
                }
            }
            InputSource::Region { buffer, rect } => {
                let bounds = buffer.bounds();
                validate_region(&bounds, &rect)?;
                BoundInput {
                    source: InputSource::Buffer(buffer),
                    bounds,
                    region: Some(rect),
                }
            }
        };

        debug!(
            "Input bound: {}x{}, region {:?}",
            input.bounds.width, input.bounds.height, input.region
        );
        state.input = Some(input);
        Ok(())
    }

    /// Restrict the next run to a sub-rectangle of the bound input
    pub fn set_region_of_interest(&self, rect: Rect) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_idle_initialized()?;

        let input = state.input.as_mut().ok_or(OcrError::NoInput)?;
        let bounds = input.bounds;
        validate_region(&bounds, &rect)?;
        input.region = Some(rect);
        Ok(())
    }

    /// Set one engine variable
    pub fn set_variable(&self, key: &str, value: &str) -> Result<()> {
        let state = self.shared.state.lock();
        state.ensure_idle_initialized()?;
        self.shared
            .engine
            .set_variable(key, value)
            .map_err(|e| OcrError::InvalidConfig {
                reason: format!("{e:#}"),
            })
    }

    /// Read one engine variable; `Ok(None)` for keys the engine does not know
    pub fn variable(&self, key: &str) -> Result<Option<String>> {
        let state = self.shared.state.lock();
        state.ensure_idle_initialized()?;
        Ok(self.shared.engine.variable(key))
    }

    /// Select the page segmentation for subsequent runs
    pub fn set_segmentation_mode(&self, mode: SegmentationMode) -> Result<()> {
        let state = self.shared.state.lock();
        state.ensure_idle_initialized()?;
        self.shared.engine.set_segmentation_mode(mode);
        Ok(())
    }

    /// Drop the bound input and any cached recognition results, keeping the
    /// engine initialized. Idempotent.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_idle_initialized()?;
        state.input = None;
        self.shared.engine.clear();
        Ok(())
    }

    /// Ask the run in flight to stop at the engine's next check point.
    ///
    /// Fire-and-forget: never blocks, does nothing when no run is active,
    /// and signals the engine at most once per run.
    pub fn request_stop(&self) {
        let mut state = self.shared.state.lock();
        if let Some(run) = state.run.as_mut() {
            if !run.stop_requested {
                run.stop_requested = true;
                info!("Stop requested for run {}", run.id);
                self.shared.engine.stop();
            }
        }
    }

    /// Release the engine.
    ///
    /// Terminal and idempotent: every later operation fails with
    /// `AlreadyReleased`. When a run is in flight the call returns
    /// immediately, requests a cooperative stop and leaves the engine
    /// teardown to the run's completion handler; the engine is never
    /// destroyed while its blocking call is executing.
    pub fn release(&self) {
        let mut state = self.shared.state.lock();
        if state.lifecycle == Lifecycle::Released {
            return;
        }
        state.lifecycle = Lifecycle::Released;

        if let Some(run) = state.run.as_mut() {
            let run_id = run.id;
            if !run.stop_requested {
                run.stop_requested = true;
                self.shared.engine.stop();
            }
            state.release_pending = true;
            info!("Release deferred until run {} completes", run_id);
        } else {
            state.input = None;
            release_engine(self.shared.engine.as_ref());
            info!("Session released");
        }
    }

    /// Whether `init` has succeeded and the session is still usable
    pub fn is_initialized(&self) -> bool {
        self.shared.state.lock().lifecycle == Lifecycle::Initialized
    }

    /// Whether a recognition run is in flight
    pub fn is_processing(&self) -> bool {
        self.shared.state.lock().run.is_some()
    }

    /// Whether the session has been released
    pub fn is_released(&self) -> bool {
        self.shared.state.lock().lifecycle == Lifecycle::Released
    }

    /// Engine name and version
    pub fn engine_version(&self) -> Result<String> {
        let state = self.shared.state.lock();
        if state.lifecycle == Lifecycle::Released {
            return Err(OcrError::AlreadyReleased);
        }
        Ok(self.shared.engine.version())
    }

    /// Mean word confidence of the last completed run
    pub fn mean_confidence(&self) -> Result<f32> {
        let state = self.shared.state.lock();
        state.ensure_idle_initialized()?;
        Ok(self.shared.engine.mean_confidence())
    }

    /// Per-word confidences of the last completed run
    pub fn word_confidences(&self) -> Result<Vec<f32>> {
        let state = self.shared.state.lock();
        state.ensure_idle_initialized()?;
        Ok(self.shared.engine.word_confidences())
    }

    /// Words of the last completed run, with bounding boxes
    pub fn words(&self) -> Result<Vec<Word>> {
        let state = self.shared.state.lock();
        state.ensure_idle_initialized()?;
        Ok(self.shared.engine.words())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}

fn validate_region(bounds: &Rect, rect: &Rect) -> Result<()> {
    if rect.is_empty() || !bounds.contains_rect(rect) {
        return Err(OcrError::OutOfBounds {
            x: rect.x,
            y: rect.y,
            width: bounds.width,
            height: bounds.height,
        });
    }
    Ok(())
}

/// Tear the engine down, swallowing failures.
///
/// Used on both release paths; a deferred release has no caller left to
/// observe an error, so none is ever surfaced.
pub(crate) fn release_engine(engine: &dyn OcrEngine) {
    if let Err(e) = engine.release() {
        warn!("Engine release failed: {:#}", e);
    }
}
