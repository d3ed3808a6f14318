//! Recognition Engine Boundary
//!
//! The session drives a recognition engine through the [`OcrEngine`] trait.
//! An engine instance is exclusively owned by one session; it is stateful and
//! non-reentrant, so the session serializes every call except `stop`, which
//! must be safe to invoke from another thread while `recognize` blocks.

pub mod synthetic;

pub use synthetic::{stamp_text, text_image, SyntheticEngine};

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::buffer::ImageBuffer;
use crate::config::{SegmentationMode, SessionConfig};
use crate::geometry::Rect;
use crate::progress::ProgressUpdate;

/// A word recognized by the engine, in reading order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    /// Recognized text
    pub text: String,
    /// Bounding box in image coordinates
    pub bounds: Rect,
    /// Confidence score (0.0 - 100.0)
    pub confidence: f32,
}

/// Contract between the session layer and a recognition engine.
///
/// Implementations synchronize internally: all methods take `&self` because
/// [`OcrEngine::stop`] is called from the controller thread while
/// [`OcrEngine::recognize`] is blocking a worker thread. No other two methods
/// are ever invoked concurrently by the session.
pub trait OcrEngine: Send + Sync {
    /// Load models and apply variable overrides for the given config.
    ///
    /// A failure leaves the engine uninitialized; the caller may retry with a
    /// different config. Re-initializing an initialized engine resets bound
    /// input, region and cached results.
    fn init(&self, config: &SessionConfig) -> Result<()>;

    /// Engine name and version string
    fn version(&self) -> String;

    /// Bind a pixel buffer as the next recognition target.
    ///
    /// Clears any previous region, cached result and pending stop request.
    fn set_image(&self, image: &ImageBuffer) -> Result<()>;

    /// Decode a raster file and bind it as the next recognition target
    fn set_source_file(&self, path: &Path) -> Result<()>;

    /// Restrict recognition to a sub-rectangle of the bound image
    fn set_rectangle(&self, rect: Rect) -> Result<()>;

    /// Select the page segmentation applied on the next run
    fn set_segmentation_mode(&self, mode: SegmentationMode);

    /// Set one engine variable
    fn set_variable(&self, key: &str, value: &str) -> Result<()>;

    /// Read one engine variable; `None` for unknown keys
    fn variable(&self, key: &str) -> Option<String>;

    /// Run blocking recognition over the bound image.
    ///
    /// Invokes `sink` with periodic progress while the call is in flight.
    /// Returns the recognized text, or `None` when a stop request was
    /// observed before recognition finished. Only returns `Err` for
    /// engine-internal failures.
    fn recognize(&self, sink: &mut dyn FnMut(ProgressUpdate)) -> Result<Option<String>>;

    /// Ask a recognition in flight to stop at its next check point.
    ///
    /// Advisory and non-blocking; the pending request is discarded when a new
    /// input is bound.
    fn stop(&self);

    /// Mean confidence over the words of the last completed run (0 when none)
    fn mean_confidence(&self) -> f32;

    /// Per-word confidences of the last completed run, in reading order
    fn word_confidences(&self) -> Vec<f32>;

    /// Words of the last completed run, with bounding boxes, in reading order
    fn words(&self) -> Vec<Word>;

    /// Drop bound input and cached results, keeping models and variables
    fn clear(&self);

    /// Free the engine resources. The engine accepts no further calls.
    fn release(&self) -> Result<()>;
}
