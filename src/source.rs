//! Per-source timestamp synchronization.
//!
//! A [`Source`] is the meeting point of three clock domains: the producer's
//! own timestamps (a capture card, a decoder, a network stream), the
//! engine's monotonic wall clock, and the output cadence that finally
//! consumes the media. Producers push timestamped [`AudioPacket`]s and
//! [`VideoFrame`]s at whatever rate and phase they run at; the source
//! reconciles those timestamps onto the engine clock, absorbing jitter,
//! recovering from discontinuities, and bounding how much it buffers.
//!
//! Audio lands in per-channel sample rings and is consumed in fixed windows
//! of [`AUDIO_OUTPUT_FRAMES`] frames by [`Source::render_audio`], which also
//! applies deferred volume and mute controls sample-accurately. Video lands
//! in a [`FramePool`]-backed queue; [`Source::video_tick`] advances a
//! running presentation timestamp by real elapsed time and picks the frame
//! closest behind it, retiring frames the consumer can no longer show.
//!
//! A source handle is cheap to clone and every method takes `&self`, so
//! producer, render, and control threads can each hold their own copy.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use crate::{
    actions::{ActionKind, ActionQueue, VolumeState},
    clock,
    drift::DriftCompensator,
    frames::{AudioPacket, VideoFrame, MAX_AUDIO_CHANNELS},
    pool::{Acquired, FrameId, FramePool},
    ring::SampleRing,
    Error, Result,
};

/// Frames per audio render window.
pub const AUDIO_OUTPUT_FRAMES: usize = 1024;

/// Number of independent output buses audio is rendered to.
pub const MAX_AUDIO_MIXES: usize = 6;

/// Upper bound on buffered samples per channel (about 21 s at 48 kHz).
///
/// Placements or appends that would exceed this are dropped whole rather
/// than growing the ring.
pub const MAX_BUFFERED_SAMPLES: usize = 1000 * AUDIO_OUTPUT_FRAMES;

/// Window around the wall clock within which a packet's timestamp is taken
/// as authoritative, and beyond which a timestamp step counts as a hard
/// discontinuity.
pub const DIRECT_TS_TOLERANCE_NS: u64 = 2_000_000_000;

/// Timestamp error absorbed silently by snapping to the predicted value.
pub const TS_SMOOTHING_THRESHOLD_NS: u64 = 70_000_000;

/// Minimum advance past a queued frame before it is retired in favor of the
/// next one. Keeps near-simultaneous frames from causing needless drops.
pub const DUPLICATE_THRESHOLD_NS: u64 = 2_000_000;

#[inline]
fn ts_out_of_bounds(reference: u64, ts: u64) -> bool {
    reference.abs_diff(ts) > DIRECT_TS_TOLERANCE_NS
}

/// Result of one [`Source::render_audio`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRenderOutcome {
    /// A full window was produced; `timestamp` is the window's start on the
    /// engine clock.
    Rendered { timestamp: u64 },
    /// Less than a full window is buffered; nothing was consumed.
    Pending,
}

/// Planar render target for [`Source::render_audio`].
///
/// Holds [`AUDIO_OUTPUT_FRAMES`] samples for every channel of every output
/// bus. Allocate once and reuse across windows; the render call overwrites
/// all of it.
pub struct AudioOutputBuffer {
    data: Vec<f32>,
}

impl fmt::Debug for AudioOutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioOutputBuffer")
            .field("mixes", &MAX_AUDIO_MIXES)
            .field("channels", &MAX_AUDIO_CHANNELS)
            .field("frames", &AUDIO_OUTPUT_FRAMES)
            .finish()
    }
}

impl AudioOutputBuffer {
    #[must_use]
    pub fn new() -> AudioOutputBuffer {
        AudioOutputBuffer {
            data: vec![0.0; MAX_AUDIO_MIXES * MAX_AUDIO_CHANNELS * AUDIO_OUTPUT_FRAMES],
        }
    }

    /// Samples rendered for one channel of one bus.
    ///
    /// Returns an empty slice for an out-of-range index.
    #[must_use]
    pub fn plane(&self, mix: usize, channel: usize) -> &[f32] {
        if mix >= MAX_AUDIO_MIXES || channel >= MAX_AUDIO_CHANNELS {
            return &[];
        }
        let start = (mix * MAX_AUDIO_CHANNELS + channel) * AUDIO_OUTPUT_FRAMES;
        &self.data[start..start + AUDIO_OUTPUT_FRAMES]
    }

    fn plane_mut(&mut self, mix: usize, channel: usize) -> &mut [f32] {
        let start = (mix * MAX_AUDIO_CHANNELS + channel) * AUDIO_OUTPUT_FRAMES;
        &mut self.data[start..start + AUDIO_OUTPUT_FRAMES]
    }

    fn block_start(mix: usize) -> usize {
        mix * MAX_AUDIO_CHANNELS * AUDIO_OUTPUT_FRAMES
    }

    fn zero_block(&mut self, mix: usize) {
        let start = Self::block_start(mix);
        let len = MAX_AUDIO_CHANNELS * AUDIO_OUTPUT_FRAMES;
        self.data[start..start + len].fill(0.0);
    }

    fn copy_block_from_first(&mut self, mix: usize) {
        let len = MAX_AUDIO_CHANNELS * AUDIO_OUTPUT_FRAMES;
        self.data.copy_within(0..len, Self::block_start(mix));
    }

    fn apply_gain(&mut self, mix: usize, channels: usize, gain: f32) {
        for ch in 0..channels {
            for sample in self.plane_mut(mix, ch) {
                *sample *= gain;
            }
        }
    }

    fn apply_curve(&mut self, mix: usize, channels: usize, curve: &[f32]) {
        for ch in 0..channels {
            for (sample, gain) in self.plane_mut(mix, ch).iter_mut().zip(curve) {
                *sample *= gain;
            }
        }
    }

    fn zero_all(&mut self) {
        self.data.fill(0.0);
    }
}

impl Default for AudioOutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// One delivered video frame, held by a consumer.
///
/// The pooled entry behind it cannot be overwritten while the reference is
/// alive; dropping it returns the entry for recycling. Dereferences to the
/// underlying [`VideoFrame`].
pub struct FrameRef {
    shared: Arc<SourceShared>,
    id: FrameId,
    frame: Arc<VideoFrame>,
}

impl Deref for FrameRef {
    type Target = VideoFrame;

    fn deref(&self) -> &VideoFrame {
        &self.frame
    }
}

impl fmt::Debug for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRef")
            .field("id", &self.id)
            .field("timestamp", &self.frame.timestamp)
            .finish()
    }
}

impl Drop for FrameRef {
    fn drop(&mut self) {
        let mut video = self.shared.lock_video();
        video.pool.release(self.id);
        video.pool.mark_unused(self.id);
    }
}

struct AudioState {
    rings: Vec<SampleRing>,
    /// False until the first packet (or after a forced restart) seeds the
    /// clock-domain offset.
    timing_set: bool,
    /// Wall clock minus producer clock, wrapping. Added to producer
    /// timestamps to map them onto the engine clock.
    timing_adjust: u64,
    /// Predicted producer-domain timestamp of the next packet.
    next_audio_ts_min: u64,
    /// Predicted engine-domain timestamp of the next packet.
    next_audio_sys_ts_min: u64,
    /// Engine-domain timestamp of the front of the rings; 0 when unseeded.
    audio_ts: u64,
    /// Ring length at the previous insufficient render, for stall detection.
    last_input_len: usize,
    pending_stop: bool,
    sync_offset: i64,
    last_sync_offset: i64,
    resample_offset: u64,
    drift: DriftCompensator,
}

impl AudioState {
    fn new(channels: usize) -> AudioState {
        AudioState {
            rings: (0..channels).map(|_| SampleRing::new()).collect(),
            timing_set: false,
            timing_adjust: 0,
            next_audio_ts_min: 0,
            next_audio_sys_ts_min: 0,
            audio_ts: 0,
            last_input_len: 0,
            pending_stop: false,
            sync_offset: 0,
            last_sync_offset: 0,
            resample_offset: 0,
            drift: DriftCompensator::new(),
        }
    }

    fn reset_timing(&mut self, timestamp: u64, os_time: u64) {
        self.timing_set = true;
        self.timing_adjust = os_time.wrapping_sub(timestamp);
    }

    fn reset_data(&mut self, os_time: u64) {
        for ring in &mut self.rings {
            ring.clear();
        }
        self.last_input_len = 0;
        self.audio_ts = os_time;
        self.next_audio_sys_ts_min = os_time;
    }

    fn buffered(&self) -> usize {
        self.rings.first().map_or(0, SampleRing::len)
    }
}

struct VideoState {
    pool: FramePool,
    queue: VecDeque<FrameId>,
    cur_frame: Option<FrameId>,
    /// Running presentation timestamp; 0 selects the next frame
    /// unconditionally.
    last_frame_ts: u64,
    /// Wall clock of the previous tick, for elapsed-time advancement.
    last_sys_time: u64,
    active: bool,
}

impl VideoState {
    fn new() -> VideoState {
        VideoState {
            pool: FramePool::new(),
            queue: VecDeque::new(),
            cur_frame: None,
            last_frame_ts: 0,
            last_sys_time: 0,
            active: false,
        }
    }

    fn queued_ts(&self, index: usize) -> Option<u64> {
        let id = *self.queue.get(index)?;
        self.pool.get(id).map(|frame| frame.timestamp)
    }
}

struct ControlState {
    queue: ActionQueue,
    /// Render-side gating state; trails the requested values until the
    /// queued actions are consumed.
    render: VolumeState,
    user_volume: f32,
    user_muted: bool,
}

impl ControlState {
    fn new() -> ControlState {
        ControlState {
            queue: ActionQueue::new(),
            render: VolumeState::default(),
            user_volume: 1.0,
            user_muted: false,
        }
    }
}

/// Lock order where more than one is taken: `audio` before `controls`.
/// `video` is never held together with the other two.
struct SourceShared {
    name: String,
    sample_rate: u32,
    channels: usize,
    unbuffered: AtomicBool,
    decoupled: AtomicBool,
    mixer_mask: AtomicU32, // buses this source feeds
    audio: Mutex<AudioState>,
    video: Mutex<VideoState>,
    controls: Mutex<ControlState>,
}

impl SourceShared {
    fn lock_audio(&self) -> MutexGuard<'_, AudioState> {
        self.audio
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_video(&self) -> MutexGuard<'_, VideoState> {
        self.video
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_controls(&self) -> MutexGuard<'_, ControlState> {
        self.controls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to one synchronized media source.
///
/// # Examples
///
/// ```
/// use framesync::{Source, VideoFrame, PixelFormat, clock};
///
/// let source = Source::new("camera", 48_000, 2)?;
/// let staging = VideoFrame::builder()
///     .format(PixelFormat::Nv12)
///     .resolution(1280, 720)
///     .timestamp(clock::now_ns())
///     .build()?;
///
/// source.push_video(&staging);
/// source.video_tick(clock::now_ns());
/// if let Some(frame) = source.get_frame() {
///     assert_eq!(frame.width, 1280);
/// }
/// # Ok::<(), framesync::Error>(())
/// ```
#[derive(Clone)]
pub struct Source {
    shared: Arc<SourceShared>,
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.shared.name)
            .field("sample_rate", &self.shared.sample_rate)
            .field("channels", &self.shared.channels)
            .finish()
    }
}

impl Source {
    /// Creates a source delivering audio at the given engine rate and
    /// channel count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for a zero sample rate or a
    /// channel count outside `1..=`[`MAX_AUDIO_CHANNELS`].
    pub fn new(name: impl Into<String>, sample_rate: u32, channels: usize) -> Result<Source> {
        if sample_rate == 0 {
            return Err(Error::InvalidConfiguration(
                "Sample rate must be non-zero".to_string(),
            ));
        }
        if channels == 0 || channels > MAX_AUDIO_CHANNELS {
            return Err(Error::InvalidConfiguration(format!(
                "Channel count must be 1..={MAX_AUDIO_CHANNELS}, got {channels}"
            )));
        }

        Ok(Source {
            shared: Arc::new(SourceShared {
                name: name.into(),
                sample_rate,
                channels,
                unbuffered: AtomicBool::new(false),
                decoupled: AtomicBool::new(false),
                mixer_mask: AtomicU32::new((1 << MAX_AUDIO_MIXES) - 1),
                audio: Mutex::new(AudioState::new(channels)),
                video: Mutex::new(VideoState::new()),
                controls: Mutex::new(ControlState::new()),
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    // ---- audio ----------------------------------------------------------

    /// Feeds one packet of engine-rate audio.
    ///
    /// The packet's timestamp is reconciled onto the engine clock and the
    /// samples are appended to, or placed at an absolute position in, the
    /// per-channel rings. Packets whose channel count does not match the
    /// source are dropped.
    pub fn push_audio(&self, packet: &AudioPacket) {
        if packet.channels != self.shared.channels {
            warn!(
                "Dropping audio for '{}': packet has {} channels, source expects {}",
                self.shared.name, packet.channels, self.shared.channels
            );
            return;
        }

        let os_time = clock::now_ns();
        let mut audio = self.shared.lock_audio();
        self.shared.reconcile_audio(&mut audio, packet, os_time);
    }

    /// Renders the next window of [`AUDIO_OUTPUT_FRAMES`] frames into `out`.
    ///
    /// `mixers` selects which buses receive audio this call; buses outside
    /// the source's own mask (see [`Source::set_mixer_mask`]) are zeroed.
    /// Deferred volume and mute actions that land inside the window are
    /// applied on their exact sample.
    ///
    /// Returns [`AudioRenderOutcome::Pending`] without consuming anything
    /// when less than a full window is buffered. A source that stays
    /// pending with an unchanging buffer is treated as stopped and its
    /// remaining samples are discarded.
    pub fn render_audio(&self, mixers: u32, out: &mut AudioOutputBuffer) -> AudioRenderOutcome {
        let mut audio = self.shared.lock_audio();
        self.shared.render_audio_window(&mut audio, mixers, out)
    }

    /// Samples currently buffered per channel.
    #[must_use]
    pub fn buffered_samples(&self) -> usize {
        self.shared.lock_audio().buffered()
    }

    /// Sets the user A/V sync adjustment in nanoseconds.
    pub fn set_sync_offset(&self, offset_ns: i64) {
        self.shared.lock_audio().sync_offset = offset_ns;
    }

    #[must_use]
    pub fn sync_offset(&self) -> i64 {
        self.shared.lock_audio().sync_offset
    }

    /// Reports the external resampler's current output delay.
    pub fn set_resample_offset(&self, offset_ns: u64) {
        self.shared.lock_audio().resample_offset = offset_ns;
    }

    #[must_use]
    pub fn resample_offset(&self) -> u64 {
        self.shared.lock_audio().resample_offset
    }

    /// Enables or disables the drift-compensation loop.
    ///
    /// Any transition resets the filter, so re-enabling starts from a
    /// neutral ratio.
    pub fn set_drift_compensation(&self, enabled: bool) {
        self.shared.lock_audio().drift.set_enabled(enabled);
    }

    #[must_use]
    pub fn drift_compensation(&self) -> bool {
        self.shared.lock_audio().drift.enabled()
    }

    /// Current resampler bias in parts per 65536, 0 when compensation is
    /// off.
    #[must_use]
    pub fn drift_ratio_parts(&self) -> i32 {
        self.shared.lock_audio().drift.ratio_parts()
    }

    // ---- video ----------------------------------------------------------

    /// Feeds one decoded video frame.
    ///
    /// The frame is copied into a pooled buffer and queued for selection;
    /// the caller keeps `frame` and may reuse it for the next push. A frame
    /// that cannot be pooled (allocation failure, or a producer running so
    /// far ahead that the pool resets) is dropped.
    pub fn push_video(&self, frame: &VideoFrame) {
        let mut video = self.shared.lock_video();

        // A shape change empties the pool, so the handles pointing into it
        // go stale with it.
        let shape = (frame.format, frame.width, frame.height);
        if video.pool.shape().is_some_and(|current| current != shape) {
            video.queue.clear();
            video.cur_frame = None;
        }

        match video.pool.acquire(frame.format, frame.width, frame.height) {
            Acquired::Frame(id) => {
                if video.pool.copy_into(id, frame) {
                    video.queue.push_back(id);
                    video.active = true;
                } else {
                    video.pool.mark_unused(id);
                }
            }
            Acquired::Reset => {
                debug!(
                    "Source '{}' dropped its queued video after hitting the frame cap",
                    self.shared.name
                );
                video.queue.clear();
                video.cur_frame = None;
                video.last_frame_ts = 0;
            }
            Acquired::Failed => {}
        }
    }

    /// Drops all queued video and marks the source video-inactive.
    ///
    /// The next pushed frame starts selection from scratch.
    pub fn clear_video(&self) {
        let mut video = self.shared.lock_video();
        video.active = false;
        video.last_frame_ts = 0;
        video.queue.clear();
        video.cur_frame = None;
        video.pool.clear();
    }

    /// Advances frame selection to `sys_time_ns` on the engine clock.
    ///
    /// Call once per output tick, passing the tick's frame time. A current
    /// frame the consumer never collected is recycled here.
    pub fn video_tick(&self, sys_time_ns: u64) {
        let mut video = self.shared.lock_video();

        if let Some(cur) = video.cur_frame.take() {
            video.pool.mark_unused(cur);
        }
        let selected = self.shared.select_frame(&mut video, sys_time_ns);
        video.cur_frame = selected;
        video.last_sys_time = sys_time_ns;
    }

    /// Takes the frame selected by the last [`Source::video_tick`].
    ///
    /// `None` means no new frame is due; the consumer keeps showing what it
    /// already has. Dropping the returned [`FrameRef`] recycles the frame.
    #[must_use]
    pub fn get_frame(&self) -> Option<FrameRef> {
        let mut video = self.shared.lock_video();
        let id = video.cur_frame.take()?;
        let frame = video.pool.retain(id)?;
        Some(FrameRef {
            shared: Arc::clone(&self.shared),
            id,
            frame,
        })
    }

    /// Frames queued and not yet selected.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.shared.lock_video().queue.len()
    }

    /// Whether the source has delivered video since the last clear.
    #[must_use]
    pub fn video_active(&self) -> bool {
        self.shared.lock_video().active
    }

    /// In unbuffered mode every tick discards all queued frames but the
    /// newest, trading smoothness for latency.
    pub fn set_unbuffered(&self, unbuffered: bool) {
        self.shared.unbuffered.store(unbuffered, Ordering::Release);
    }

    #[must_use]
    pub fn unbuffered(&self) -> bool {
        self.shared.unbuffered.load(Ordering::Acquire)
    }

    /// Decouples audio timing from the producer's timestamps.
    ///
    /// Enabling discards buffered audio and restarts timing from the next
    /// packet's arrival time.
    pub fn set_decoupled(&self, decoupled: bool) {
        self.shared.decoupled.store(decoupled, Ordering::Release);
        if decoupled {
            let mut audio = self.shared.lock_audio();
            audio.timing_set = false;
            audio.reset_data(0);
        }
    }

    #[must_use]
    pub fn decoupled(&self) -> bool {
        self.shared.decoupled.load(Ordering::Acquire)
    }

    // ---- controls -------------------------------------------------------

    /// Requests a volume change, applied sample-accurately by the render
    /// path.
    pub fn set_volume(&self, volume: f32) {
        let mut controls = self.shared.lock_controls();
        controls.user_volume = volume;
        controls.queue.push_now(ActionKind::SetVolume(volume));
    }

    /// The requested volume. The render path may not have reached it yet.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.shared.lock_controls().user_volume
    }

    /// Requests a mute change, applied sample-accurately by the render
    /// path.
    pub fn set_muted(&self, muted: bool) {
        let mut controls = self.shared.lock_controls();
        controls.user_muted = muted;
        controls.queue.push_now(ActionKind::SetMuted(muted));
    }

    #[must_use]
    pub fn muted(&self) -> bool {
        self.shared.lock_controls().user_muted
    }

    /// Enables or disables the source outright; a disabled source renders
    /// silence immediately.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.lock_controls().render.enabled = enabled;
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.shared.lock_controls().render.enabled
    }

    pub fn enable_push_to_talk(&self, enabled: bool) {
        self.shared.lock_controls().render.push_to_talk_enabled = enabled;
    }

    /// How long the talk gate stays open after the key is released,
    /// in milliseconds.
    pub fn set_push_to_talk_delay(&self, delay_ms: u64) {
        self.shared.lock_controls().render.push_to_talk_delay_ns = delay_ms * 1_000_000;
    }

    /// Reports the push-to-talk key state, applied sample-accurately.
    pub fn set_push_to_talk_pressed(&self, pressed: bool) {
        self.shared
            .lock_controls()
            .queue
            .push_now(ActionKind::PushToTalk(pressed));
    }

    pub fn enable_push_to_mute(&self, enabled: bool) {
        self.shared.lock_controls().render.push_to_mute_enabled = enabled;
    }

    /// How long the mute gate stays closed after the key is released,
    /// in milliseconds.
    pub fn set_push_to_mute_delay(&self, delay_ms: u64) {
        self.shared.lock_controls().render.push_to_mute_delay_ns = delay_ms * 1_000_000;
    }

    /// Reports the push-to-mute key state, applied sample-accurately.
    pub fn set_push_to_mute_pressed(&self, pressed: bool) {
        self.shared
            .lock_controls()
            .queue
            .push_now(ActionKind::PushToMute(pressed));
    }

    /// Selects which output buses this source feeds.
    pub fn set_mixer_mask(&self, mask: u32) {
        self.shared.mixer_mask.store(mask, Ordering::Release);
    }

    #[must_use]
    pub fn mixer_mask(&self) -> u32 {
        self.shared.mixer_mask.load(Ordering::Acquire)
    }
}

impl SourceShared {
    /// Maps one packet onto the engine clock and stores its samples.
    fn reconcile_audio(&self, state: &mut AudioState, packet: &AudioPacket, os_time: u64) {
        let original_ts = packet.timestamp;
        let mut timestamp = packet.timestamp;
        let mut using_direct_ts = false;
        let mut push_back = false;

        // A timestamp already near the wall clock is authoritative.
        if timestamp.abs_diff(os_time) < DIRECT_TS_TOLERANCE_NS {
            state.timing_adjust = 0;
            state.timing_set = true;
            using_direct_ts = true;
        }

        if !state.timing_set {
            state.reset_timing(timestamp, os_time);
        } else if state.next_audio_ts_min != 0 {
            let diff = state.next_audio_ts_min.abs_diff(timestamp);

            if diff > DIRECT_TS_TOLERANCE_NS && !using_direct_ts {
                debug!(
                    "Timestamp for source '{}' jumped by {diff} ns, expected {}, input {}",
                    self.name, state.next_audio_ts_min, timestamp
                );
                state.reset_timing(timestamp, os_time);
                state.reset_data(os_time);
            } else if diff < TS_SMOOTHING_THRESHOLD_NS {
                if self.unbuffered.load(Ordering::Acquire) && self.decoupled.load(Ordering::Acquire)
                {
                    state.timing_adjust = os_time.wrapping_sub(timestamp);
                }
                timestamp = state.next_audio_ts_min;
            } else {
                debug!(
                    "Audio timestamp for '{}' exceeded the smoothing threshold, diff={diff} ns, \
                     expected {}, input {}",
                    self.name, state.next_audio_ts_min, timestamp
                );
            }
        }

        state.next_audio_ts_min =
            timestamp.wrapping_add(clock::frames_to_ns(packet.frames as u64, self.sample_rate));

        timestamp = timestamp.wrapping_add(state.timing_adjust);

        if state.next_audio_sys_ts_min == timestamp {
            push_back = true;
        } else if state.next_audio_sys_ts_min != 0 {
            let diff = state.next_audio_sys_ts_min.abs_diff(timestamp);

            if diff < TS_SMOOTHING_THRESHOLD_NS {
                push_back = true;
            } else if diff > DIRECT_TS_TOLERANCE_NS {
                // Audio and video jump in quick succession when a producer's
                // clock steps; realign with the raw timestamp instead of
                // chasing the intermediate values.
                state.reset_timing(original_ts, os_time);
                timestamp = original_ts.wrapping_add(state.timing_adjust);
            }
        }

        if state.drift.enabled() {
            let error_ns = timestamp.wrapping_sub(os_time) as i64;
            state.drift.update(self.sample_rate, packet.frames, error_ns);
        }

        let sync_offset = state.sync_offset;
        timestamp = timestamp.wrapping_add_signed(sync_offset);
        timestamp = timestamp.wrapping_sub(state.resample_offset);

        state.next_audio_sys_ts_min = state.next_audio_ts_min.wrapping_add(state.timing_adjust);

        if state.last_sync_offset != sync_offset {
            // Force one absolute placement so the new offset takes effect.
            if state.last_sync_offset != 0 {
                push_back = false;
            }
            state.last_sync_offset = sync_offset;
        }

        if push_back && state.audio_ts != 0 {
            self.audio_push_back(state, packet);
        } else {
            self.audio_place(state, packet, timestamp);
        }
    }

    fn audio_push_back(&self, state: &mut AudioState, packet: &AudioPacket) {
        if state.buffered() + packet.frames > MAX_BUFFERED_SAMPLES {
            debug!(
                "Dropping {} audio frames for '{}': ring full",
                packet.frames, self.name
            );
            return;
        }

        for (ch, ring) in state.rings.iter_mut().enumerate() {
            if let Some(samples) = packet.plane(ch) {
                ring.push_back(samples);
            }
        }
        state.last_input_len = 0;
    }

    fn audio_place(&self, state: &mut AudioState, packet: &AudioPacket, timestamp: u64) {
        if state.audio_ts == 0 || timestamp < state.audio_ts {
            state.reset_data(timestamp);
        }

        let offset_ns = timestamp.wrapping_sub(state.audio_ts);
        let position = clock::ns_to_frames(offset_ns, self.sample_rate) as usize;

        if position.saturating_add(packet.frames) > MAX_BUFFERED_SAMPLES {
            debug!(
                "Dropping {} audio frames for '{}': placement past the ring bound",
                packet.frames, self.name
            );
            return;
        }

        for (ch, ring) in state.rings.iter_mut().enumerate() {
            if let Some(samples) = packet.plane(ch) {
                ring.place(position, samples);
            }
        }
        state.last_input_len = 0;
    }

    fn render_audio_window(
        &self,
        state: &mut AudioState,
        mixers: u32,
        out: &mut AudioOutputBuffer,
    ) -> AudioRenderOutcome {
        if state.audio_ts == 0 {
            return AudioRenderOutcome::Pending;
        }

        let buffered = state.buffered();
        if buffered < AUDIO_OUTPUT_FRAMES {
            // A ring that stops filling belongs to a stopped producer;
            // two consecutive stalled renders flush it.
            if buffered != 0 && state.last_input_len == buffered {
                if state.pending_stop {
                    debug!("Audio for '{}' appears to have stopped, clearing", self.name);
                    for ring in &mut state.rings {
                        ring.clear();
                    }
                    state.pending_stop = false;
                    state.audio_ts = 0;
                    state.last_input_len = 0;
                } else {
                    state.pending_stop = true;
                }
            } else {
                state.last_input_len = buffered;
            }
            return AudioRenderOutcome::Pending;
        }

        let window_start = state.audio_ts;
        let window_ns = clock::frames_to_ns(AUDIO_OUTPUT_FRAMES as u64, self.sample_rate);
        let channels = self.channels;

        for (ch, ring) in state.rings.iter_mut().enumerate() {
            ring.pop_front_into(out.plane_mut(0, ch));
        }
        for ch in channels..MAX_AUDIO_CHANNELS {
            out.plane_mut(0, ch).fill(0.0);
        }

        let enabled = self.mixer_mask.load(Ordering::Acquire) & mixers;
        for mix in 1..MAX_AUDIO_MIXES {
            if enabled & (1 << mix) != 0 {
                out.copy_block_from_first(mix);
            } else {
                out.zero_block(mix);
            }
        }
        if enabled & 1 == 0 {
            out.zero_block(0);
        }

        self.apply_volume(mixers, enabled, window_start, window_ns, out);

        state.audio_ts = window_start.wrapping_add(window_ns);
        state.pending_stop = false;
        state.last_input_len = 0;

        AudioRenderOutcome::Rendered {
            timestamp: window_start,
        }
    }

    fn apply_volume(
        &self,
        mixers: u32,
        enabled: u32,
        window_start: u64,
        window_ns: u64,
        out: &mut AudioOutputBuffer,
    ) {
        let mut controls = self.lock_controls();
        let channels = self.channels;

        if controls.queue.has_action_before(window_start.wrapping_add(window_ns)) {
            let mut curve = [0.0f32; AUDIO_OUTPUT_FRAMES];
            let controls = &mut *controls;
            controls.queue.fill_gain_curve(
                &mut controls.render,
                window_start,
                self.sample_rate,
                &mut curve,
            );
            for mix in 0..MAX_AUDIO_MIXES {
                if enabled & (1 << mix) != 0 {
                    out.apply_curve(mix, channels, &curve);
                }
            }
            return;
        }

        let gain = controls.render.current_gain(window_start);
        if gain == 1.0 {
            return;
        }
        if gain == 0.0 || mixers == 0 {
            out.zero_all();
            return;
        }
        for mix in 0..MAX_AUDIO_MIXES {
            if enabled & (1 << mix) != 0 {
                out.apply_gain(mix, channels, gain);
            }
        }
    }

    /// Picks the frame to show for a tick at `sys_time`, or `None` to keep
    /// showing the previous one.
    fn select_frame(&self, video: &mut VideoState, sys_time: u64) -> Option<FrameId> {
        if video.queue.is_empty() {
            return None;
        }

        if video.last_frame_ts == 0 || self.frame_ready(video, sys_time) {
            let id = video.queue.pop_front()?;
            if video.last_frame_ts == 0 {
                if let Some(frame) = video.pool.get(id) {
                    video.last_frame_ts = frame.timestamp;
                }
            }
            return Some(id);
        }

        None
    }

    /// Advances the running timestamp and retires frames it has passed.
    ///
    /// On return `true` the head of the queue is the frame to show. The
    /// queue must be non-empty.
    fn frame_ready(&self, video: &mut VideoState, sys_time: u64) -> bool {
        let Some(head_ts) = video.queued_ts(0) else {
            return false;
        };

        if self.unbuffered.load(Ordering::Acquire) {
            while video.queue.len() > 1 {
                if let Some(id) = video.queue.pop_front() {
                    video.pool.mark_unused(id);
                }
            }
            if let Some(ts) = video.queued_ts(0) {
                video.last_frame_ts = ts;
            }
            return true;
        }

        let sys_offset = sys_time.saturating_sub(video.last_sys_time);
        let mut frame_time = head_ts;
        let mut frame_offset;

        if ts_out_of_bounds(video.last_frame_ts, frame_time) {
            debug!(
                "Video timestamp for '{}' jumped to {frame_time} (running {})",
                self.name, video.last_frame_ts
            );
            video.last_frame_ts = frame_time;
            return true;
        }
        frame_offset = frame_time.wrapping_sub(video.last_frame_ts);
        video.last_frame_ts = video.last_frame_ts.wrapping_add(sys_offset);

        let mut have_candidate = false;
        loop {
            let next_index = usize::from(have_candidate);
            let Some(next_ts) = video.queued_ts(next_index) else {
                break;
            };
            if video.last_frame_ts <= next_ts {
                break;
            }
            // Within the duplicate threshold the candidate is close enough;
            // retiring further would just drop frames.
            if have_candidate && video.last_frame_ts - next_ts < DUPLICATE_THRESHOLD_NS {
                break;
            }

            if have_candidate {
                if let Some(id) = video.queue.pop_front() {
                    video.pool.mark_unused(id);
                }
            }
            if video.queue.len() == 1 {
                // The last queued frame is held and reused until a newer one
                // arrives.
                return true;
            }
            have_candidate = true;

            let Some(second_ts) = video.queued_ts(1) else {
                break;
            };
            if second_ts.wrapping_sub(frame_time) > DIRECT_TS_TOLERANCE_NS {
                video.last_frame_ts = second_ts.wrapping_sub(frame_offset);
            }
            frame_time = second_ts;
            frame_offset = frame_time.wrapping_sub(video.last_frame_ts);
        }

        have_candidate
    }
}
