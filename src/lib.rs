//! Timestamp synchronization and paced delivery for real-time A/V pipelines.
//!
//! This crate is the timing core of a capture-and-render engine. Producers
//! push audio packets and video frames stamped in their own clock domains;
//! the crate reconciles those stamps onto one monotonic timeline, absorbs
//! jitter and clock jumps, bounds buffering, and serves media downstream at
//! a strictly periodic cadence even when production stalls or bursts.
//!
//! # Quick Start
//!
//! ```
//! use framesync::{clock, AudioPacket, Engine, EngineOptions, VideoFrame};
//!
//! # fn main() -> framesync::Result<()> {
//! let engine = Engine::new(EngineOptions::builder().build()?)?;
//! let source = engine.create_source("capture card")?;
//!
//! // Producer side: feed media stamped with the producer's own clock.
//! let packet = AudioPacket::builder()
//!     .sample_rate(engine.sample_rate())
//!     .channels(engine.channels())
//!     .frames(1024)
//!     .timestamp(clock::now_ns())
//!     .build()?;
//! source.push_audio(&packet);
//!
//! let frame = VideoFrame::builder()
//!     .resolution(1280, 720)
//!     .timestamp(clock::now_ns())
//!     .build()?;
//! source.push_video(&frame);
//!
//! // Render side: advance the source clock and take the current frame.
//! source.video_tick(clock::now_ns());
//! if let Some(frame) = source.get_frame() {
//!     println!("showing frame captured at {}", frame.timestamp);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Core Concepts
//!
//! ## The engine context
//!
//! The [`Engine`] owns video outputs and the audio parameters every source
//! is created with. There are no process-wide singletons; independent
//! pipelines coexist by creating independent engines.
//!
//! ## Sources
//!
//! A [`Source`] is one producer's entry point. Audio is reconciled onto
//! the engine clock and buffered in per-channel rings;
//! [`Source::render_audio`] consumes it in fixed windows, applying volume,
//! mute, and push-to-talk actions sample-accurately. Video is copied into
//! a recycling [`pool::FramePool`] and selected per render tick by
//! timestamp, with unbuffered and decoupled modes for latency-sensitive
//! producers. Handles are cheap to clone and every method takes `&self`.
//!
//! ## Paced outputs
//!
//! A [`VideoOutput`] owns a fixed ring of frame slots between one producer
//! and a pacing thread. Producers borrow slots with
//! [`VideoOutput::lock_frame`]; registered [`Subscriber`]s receive each
//! frame in registration order. When consumers lag, rejected frames are
//! charged to the newest pending slot and repeated downstream so the
//! cadence never breaks, with the loss counted and logged.
//!
//! ## The converter seam
//!
//! The crate never touches pixel math. Subscribers asking for a non-native
//! shape are served through a [`FrameScaler`] built by the output's
//! [`ScalerFactory`]; applications plug in swscale, libyuv, or a GPU path
//! by implementing two small traits.
//!
//! # Thread Safety
//!
//! [`Source`], [`VideoOutput`], and [`Engine`] are `Send + Sync`; producer,
//! render, and control threads each hold their own handle. The only thread
//! the crate spawns is one pacing thread per open video output, and the
//! producer-facing hot path blocks only on a counting semaphore.
//!
//! # Optional features
//!
//! - `image-encoding`: PNG/JPEG snapshot export and data-URL encoding on
//!   [`VideoFrame`] for preview and diagnostics surfaces.

#![allow(clippy::wildcard_imports)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

// Internal modules
mod error;
mod ring;

// Public modules
pub mod actions;
pub mod clock;
pub mod convert;
pub mod drift;
pub mod engine;
pub mod frames;
pub mod output;
pub mod pool;
pub mod semaphore;
pub mod source;

// Re-exports
pub use {
    actions::{Action, ActionKind, ActionQueue, VolumeState},
    convert::{FrameScaler, NoScalerFactory, ScaleInfo, ScalerFactory},
    drift::{DriftCompensator, DriftFilter},
    engine::{Engine, EngineOptions, EngineOptionsBuilder},
    error::*,
    frames::{
        AudioPacket, AudioPacketBuilder, ColorRange, ColorSpace, PixelFormat, VideoFrame,
        VideoFrameBuilder,
    },
    output::{
        FrameLock, SubscribeOptions, SubscribeOptionsBuilder, Subscriber, SubscriberId,
        VideoOutput, VideoOutputOptions, VideoOutputOptionsBuilder,
    },
    pool::{Acquired, FrameId, FramePool},
    semaphore::{Semaphore, WaitOutcome},
    source::{AudioOutputBuffer, AudioRenderOutcome, FrameRef, Source},
};

#[cfg(feature = "image-encoding")]
pub use frames::ImageFormat;

/// Alias for Result with our Error type
pub type Result<T> = std::result::Result<T, crate::error::Error>;
