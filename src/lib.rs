//! Safe, cancellable session layer around a stateful OCR engine.
//!
//! The engine behind a [`Session`] is exclusive and non-reentrant. The
//! session serializes every call into it, runs recognition on a worker
//! thread, delivers progress without ever blocking the engine, and defers
//! engine teardown when a release lands while a run is in flight.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod progress;
pub mod session;

pub use buffer::{ImageBuffer, SUPPORTED_DEPTHS};
pub use config::{
    default_data_dir, load_config, save_config, EngineMode, SegmentationMode, SessionConfig,
};
pub use engine::{stamp_text, text_image, OcrEngine, SyntheticEngine, Word};
pub use error::{OcrError, Result};
pub use geometry::Rect;
pub use progress::{ProgressUpdate, RunEvent, RunHandle, RunOutcome};
pub use session::{InputSource, Session};
