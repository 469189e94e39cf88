//! Error types for the framesync library.

use std::io;
use thiserror::Error;

/// The main error type for framesync operations.
///
/// This enum represents all possible errors that can occur when using the
/// framesync library. Timing anomalies (clock jumps, jitter, stale buffers)
/// are deliberately absent: the synchronization core recovers from those
/// internally and they are never surfaced to callers.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration parameters are invalid.
    ///
    /// This can occur when builder validation fails or when an output is
    /// opened with zero dimensions or a zero frame-rate term.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Frame data is invalid or does not match its declared layout.
    #[error("Invalid frame data: {0}")]
    InvalidFrame(String),

    /// No scaler is available for the requested format conversion.
    ///
    /// Returned by [`crate::VideoOutput::connect`] when a subscriber asks
    /// for a shape the configured [`crate::ScalerFactory`] cannot produce.
    #[error("No scaler available: {0}")]
    ScalerUnavailable(String),

    /// The subscriber handle is already registered with this output.
    #[error("Subscriber is already connected to this output")]
    AlreadyConnected,

    /// The operation targeted an output whose pacing thread has stopped.
    ///
    /// Returned by [`crate::VideoOutput::connect`] once
    /// [`crate::VideoOutput::stop`] or `close` has been called.
    #[error("Video output has been stopped")]
    Stopped,

    /// The pacing thread could not be spawned.
    #[error("Failed to start pacing thread: {0}")]
    ThreadStartFailed(io::Error),

    /// Frame snapshot encoding failed.
    #[cfg(feature = "image-encoding")]
    #[error("Failed to encode frame: {0}")]
    Encoding(String),

    /// I/O operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
