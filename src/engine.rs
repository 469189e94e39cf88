//! The engine context: owns video outputs and the audio parameters every
//! source is created with.
//!
//! There is no process-wide state. An application creates one [`Engine`]
//! per pipeline (several can coexist), opens named video outputs on it,
//! and creates sources bound to its sample rate and channel count.
//! Dropping the engine closes every output it still owns.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::{
    frames::MAX_AUDIO_CHANNELS,
    output::{VideoOutput, VideoOutputOptions},
    source::Source,
    Error, Result,
};

/// Sample rate used when none is configured.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Channel count used when none is configured.
pub const DEFAULT_CHANNELS: usize = 2;

/// Static parameters of an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub name: String,
    /// Sample rate every source's audio arrives and renders at.
    pub sample_rate: u32,
    /// Channel count for every source's audio path.
    pub channels: usize,
}

impl EngineOptions {
    /// Create a builder for configuring the engine.
    pub fn builder() -> EngineOptionsBuilder {
        EngineOptionsBuilder::new()
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfiguration(
                "Engine sample rate must be non-zero".to_string(),
            ));
        }
        if self.channels == 0 || self.channels > MAX_AUDIO_CHANNELS {
            return Err(Error::InvalidConfiguration(format!(
                "Engine channel count must be 1..={MAX_AUDIO_CHANNELS}, got {}",
                self.channels
            )));
        }
        Ok(())
    }
}

impl Default for EngineOptions {
    /// A 48 kHz stereo engine named "engine".
    fn default() -> Self {
        Self {
            name: "engine".to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

/// Builder for [`EngineOptions`] with ergonomic method chaining.
#[derive(Debug, Clone)]
pub struct EngineOptionsBuilder {
    name: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<usize>,
}

impl EngineOptionsBuilder {
    /// Create a new builder with no fields set.
    pub fn new() -> Self {
        Self {
            name: None,
            sample_rate: None,
            channels: None,
        }
    }

    /// Set the engine name used in log messages.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the audio sample rate in Hz.
    #[must_use]
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Set the audio channel count.
    #[must_use]
    pub fn channels(mut self, channels: usize) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Build the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for a zero sample rate or a
    /// channel count outside `1..=`[`MAX_AUDIO_CHANNELS`].
    pub fn build(self) -> Result<EngineOptions> {
        let options = EngineOptions {
            name: self.name.unwrap_or_else(|| "engine".to_string()),
            sample_rate: self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
            channels: self.channels.unwrap_or(DEFAULT_CHANNELS),
        };
        options.validate()?;
        Ok(options)
    }
}

impl Default for EngineOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Context object tying sources and outputs to one set of parameters.
///
/// # Example
///
/// ```
/// use framesync::{Engine, EngineOptions, VideoOutputOptions};
///
/// # fn main() -> framesync::Result<()> {
/// let engine = Engine::new(EngineOptions::builder().build()?)?;
/// let output = engine.open_video(
///     VideoOutputOptions::builder()
///         .name("program")
///         .resolution(1280, 720)
///         .frame_rate(30, 1)
///         .build()?,
/// )?;
/// let camera = engine.create_source("camera")?;
/// assert_eq!(camera.sample_rate(), engine.sample_rate());
///
/// if let Some(mut frame) = output.lock_frame(1, 0) {
///     frame.plane_mut(0).fill(16);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    options: EngineOptions,
    outputs: Mutex<Vec<Arc<VideoOutput>>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.options.name)
            .field("sample_rate", &self.options.sample_rate)
            .field("channels", &self.options.channels)
            .finish()
    }
}

impl Engine {
    /// Creates an engine with the given audio parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] when `options` carry a zero
    /// sample rate or an out-of-range channel count.
    pub fn new(options: EngineOptions) -> Result<Engine> {
        options.validate()?;
        debug!(
            "Engine '{}' up: {} Hz, {} channels",
            options.name, options.sample_rate, options.channels
        );
        Ok(Engine {
            options,
            outputs: Mutex::new(Vec::new()),
        })
    }

    fn lock_outputs(&self) -> MutexGuard<'_, Vec<Arc<VideoOutput>>> {
        self.outputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a named video output owned by this engine.
    ///
    /// The returned handle is shared: the engine keeps one reference so it
    /// can close the output on shutdown; callers keep theirs for as long
    /// as they need it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] when an output with the
    /// same name is already open, plus everything [`VideoOutput::open`]
    /// can return.
    pub fn open_video(&self, options: VideoOutputOptions) -> Result<Arc<VideoOutput>> {
        let mut outputs = self.lock_outputs();
        if outputs.iter().any(|output| output.name() == options.name) {
            return Err(Error::InvalidConfiguration(format!(
                "A video output named '{}' is already open",
                options.name
            )));
        }

        let output = Arc::new(VideoOutput::open(options)?);
        outputs.push(Arc::clone(&output));
        Ok(output)
    }

    /// Looks up an open output by name.
    pub fn video(&self, name: &str) -> Option<Arc<VideoOutput>> {
        self.lock_outputs()
            .iter()
            .find(|output| output.name() == name)
            .cloned()
    }

    /// Closes a named output and releases the engine's reference to it.
    ///
    /// Returns whether an output with that name was open. Handles other
    /// callers still hold stay valid; the output is stopped underneath
    /// them.
    pub fn close_video(&self, name: &str) -> bool {
        let removed = {
            let mut outputs = self.lock_outputs();
            let index = outputs.iter().position(|output| output.name() == name);
            index.map(|index| outputs.remove(index))
        };

        match removed {
            Some(output) => {
                output.close();
                true
            }
            None => false,
        }
    }

    /// Creates a source bound to this engine's audio parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] when the engine parameters
    /// are out of range for a source; a validated engine never hits this.
    pub fn create_source(&self, name: impl Into<String>) -> Result<Source> {
        Source::new(name, self.options.sample_rate, self.options.channels)
    }

    /// Engine name.
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Sample rate sources are created with.
    pub fn sample_rate(&self) -> u32 {
        self.options.sample_rate
    }

    /// Channel count sources are created with.
    pub fn channels(&self) -> usize {
        self.options.channels
    }

    /// Number of outputs currently open.
    pub fn open_outputs(&self) -> usize {
        self.lock_outputs().len()
    }

    /// Closes every output the engine still owns.
    ///
    /// Runs automatically on drop.
    pub fn shutdown(&self) {
        let outputs = std::mem::take(&mut *self.lock_outputs());
        if outputs.is_empty() {
            return;
        }
        for output in &outputs {
            output.close();
        }
        debug!(
            "Engine '{}' shut down, closed {} outputs",
            self.options.name,
            outputs.len()
        );
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineOptions::builder().name("test engine").build().unwrap()).unwrap()
    }

    fn video_options(name: &str) -> VideoOutputOptions {
        VideoOutputOptions::builder()
            .name(name)
            .resolution(64, 64)
            .frame_rate(60, 1)
            .cache_size(3)
            .build()
            .unwrap()
    }

    #[test]
    fn rejects_degenerate_audio_parameters() {
        assert!(matches!(
            EngineOptions::builder().sample_rate(0).build(),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            EngineOptions::builder().channels(0).build(),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            EngineOptions::builder().channels(MAX_AUDIO_CHANNELS + 1).build(),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn defaults_are_usable() {
        let options = EngineOptions::builder().build().unwrap();
        assert_eq!(options.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(options.channels, DEFAULT_CHANNELS);
        assert_eq!(options.name, "engine");

        let engine = Engine::new(options).unwrap();
        assert_eq!(engine.open_outputs(), 0);
    }

    #[test]
    fn duplicate_output_names_are_refused() {
        let engine = engine();
        engine.open_video(video_options("program")).unwrap();

        assert!(matches!(
            engine.open_video(video_options("program")),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(engine.open_video(video_options("preview")).is_ok());
        assert_eq!(engine.open_outputs(), 2);
    }

    #[test]
    fn outputs_are_shared_handles() {
        let engine = engine();
        let opened = engine.open_video(video_options("program")).unwrap();

        let looked_up = engine.video("program").unwrap();
        assert!(Arc::ptr_eq(&opened, &looked_up));
        assert!(engine.video("missing").is_none());
    }

    #[test]
    fn close_video_stops_the_output_and_frees_the_name() {
        let engine = engine();
        let retained = engine.open_video(video_options("program")).unwrap();

        assert!(engine.close_video("program"));
        assert!(retained.stopped());
        assert!(!engine.close_video("program"));

        assert!(engine.open_video(video_options("program")).is_ok());
    }

    #[test]
    fn sources_inherit_engine_audio_parameters() {
        let engine = Engine::new(
            EngineOptions::builder()
                .sample_rate(44_100)
                .channels(6)
                .build()
                .unwrap(),
        )
        .unwrap();

        let source = engine.create_source("deck").unwrap();
        assert_eq!(source.sample_rate(), 44_100);
        assert_eq!(source.channels(), 6);
    }

    #[test]
    fn shutdown_closes_every_output() {
        let engine = engine();
        let program = engine.open_video(video_options("program")).unwrap();
        let preview = engine.open_video(video_options("preview")).unwrap();

        engine.shutdown();

        assert!(program.stopped());
        assert!(preview.stopped());
        assert_eq!(engine.open_outputs(), 0);
    }
}
