//! Error types for ocrkit

use thiserror::Error;

/// Result type for ocrkit operations
pub type Result<T> = std::result::Result<T, OcrError>;

/// Error types for session and buffer operations
#[derive(Error, Debug)]
pub enum OcrError {
    /// Configuration rejected before or during engine initialization;
    /// recoverable, the session stays uninitialized and init may be retried
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Operation requires a successful init first
    #[error("Session is not initialized")]
    NotInitialized,

    /// Operation conflicts with a recognition run in flight
    #[error("Session is busy with a recognition run")]
    Busy,

    /// Operation on a session that has been released
    #[error("Session has been released")]
    AlreadyReleased,

    /// Pixel or rectangle access outside the buffer bounds
    #[error("Coordinates ({x}, {y}) out of bounds for {width}x{height} buffer")]
    OutOfBounds { x: u32, y: u32, width: u32, height: u32 },

    /// Buffer construction with a zero dimension
    #[error("Invalid buffer dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Buffer construction with a bit depth the pixel model cannot carry
    #[error("Unsupported bit depth {0} (supported: 1, 8, 32)")]
    UnsupportedDepth(u32),

    /// Starting a run or placing a region with no input bound
    #[error("No input image is bound to the session")]
    NoInput,

    /// Input file could not be read or decoded
    #[error("Failed to read input image: {reason}")]
    InputRead { reason: String },
}
