//! Paced frame delivery from one producer to registered subscribers.
//!
//! A [`VideoOutput`] owns a fixed ring of preallocated frame slots. The
//! producer borrows the newest free slot with [`VideoOutput::lock_frame`],
//! writes pixels through the [`FrameLock`] guard, and dropping the guard
//! publishes the slot to a pacing thread that serves it to every
//! registered [`Subscriber`] in registration order.
//!
//! When consumers fall behind, the ring fills and `lock_frame` starts
//! failing. The deliveries the rejected frames were worth are charged to
//! the newest pending slot, which is then served that many extra times
//! with its timestamp advancing by one frame interval per pass. Downstream
//! consumers see an unbroken cadence, and the output counts the repeats
//! as skipped frames so the loss shows up in the logs.
//!
//! Conversion to subscriber-requested shapes happens on the pacing thread
//! through the [`ScalerFactory`] seam; see [`crate::convert`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use log::{info, warn};

use crate::{
    clock,
    convert::{FrameScaler, NoScalerFactory, ScaleInfo, ScalerFactory},
    frames::{ColorRange, ColorSpace, PixelFormat, VideoFrame},
    semaphore::Semaphore,
    Error, Result,
};

/// Upper bound on the slot ring; larger requests are clamped.
pub const MAX_CACHE_SIZE: usize = 16;

/// Slot count used when the producer does not ask for one.
pub const DEFAULT_CACHE_SIZE: usize = 6;

/// Conversion targets rotated per subscriber, so a slow consumer can still
/// read the previous scaled frame while the next one is produced.
pub const SCRATCH_FRAMES: usize = 3;

/// Receives paced frames from a [`VideoOutput`].
///
/// `deliver` runs on the output's pacing thread; a slow implementation
/// delays every subscriber behind it and eventually backs up the producer.
pub trait Subscriber: Send {
    /// Called once per frame served to this subscriber.
    ///
    /// The frame borrow ends with the call; implementations keeping the
    /// content copy it out.
    fn deliver(&mut self, frame: &VideoFrame);
}

/// Identifies one registration on a [`VideoOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// How a subscriber wants its frames served.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Requested frame shape; `None` means the output's native shape.
    /// Zero dimensions inside a request also fall back to native.
    pub conversion: Option<ScaleInfo>,
    /// Serve only every Nth frame. 1 serves everything.
    pub frame_rate_divisor: u32,
}

impl SubscribeOptions {
    /// Native shape, every frame.
    pub fn new() -> Self {
        Self {
            conversion: None,
            frame_rate_divisor: 1,
        }
    }

    /// Create a builder for configuring the subscription.
    pub fn builder() -> SubscribeOptionsBuilder {
        SubscribeOptionsBuilder::new()
    }

    fn validate(&self) -> Result<()> {
        if self.frame_rate_divisor == 0 {
            return Err(Error::InvalidConfiguration(
                "Frame rate divisor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`SubscribeOptions`] with ergonomic method chaining.
#[derive(Debug, Clone)]
pub struct SubscribeOptionsBuilder {
    conversion: Option<ScaleInfo>,
    frame_rate_divisor: Option<u32>,
}

impl SubscribeOptionsBuilder {
    /// Create a new builder with no fields set.
    pub fn new() -> Self {
        Self {
            conversion: None,
            frame_rate_divisor: None,
        }
    }

    /// Request frames converted to the given shape.
    #[must_use]
    pub fn conversion(mut self, conversion: ScaleInfo) -> Self {
        self.conversion = Some(conversion);
        self
    }

    /// Serve only every Nth frame.
    #[must_use]
    pub fn frame_rate_divisor(mut self, divisor: u32) -> Self {
        self.frame_rate_divisor = Some(divisor);
        self
    }

    /// Build the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for a zero divisor.
    pub fn build(self) -> Result<SubscribeOptions> {
        let options = SubscribeOptions {
            conversion: self.conversion,
            frame_rate_divisor: self.frame_rate_divisor.unwrap_or(1),
        };
        options.validate()?;
        Ok(options)
    }
}

impl Default for SubscribeOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Static parameters of a [`VideoOutput`].
#[derive(Clone)]
pub struct VideoOutputOptions {
    pub name: String,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Frame rate numerator; 30000/1001 gives NTSC 29.97.
    pub fps_num: u32,
    pub fps_den: u32,
    /// Slot ring depth, clamped to [`MAX_CACHE_SIZE`] on open.
    pub cache_size: usize,
    pub range: ColorRange,
    pub colorspace: ColorSpace,
    /// Builds per-subscriber converters; the default refuses every
    /// conversion, so only native-shape subscribers can connect.
    pub scaler_factory: Arc<dyn ScalerFactory>,
}

impl VideoOutputOptions {
    /// Create a builder for configuring the output.
    pub fn builder() -> VideoOutputOptionsBuilder {
        VideoOutputOptionsBuilder::new()
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "Video resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fps_num == 0 || self.fps_den == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "Frame rate must be non-zero, got {}/{}",
                self.fps_num, self.fps_den
            )));
        }
        if self.cache_size == 0 {
            return Err(Error::InvalidConfiguration(
                "Video cache needs at least one slot".to_string(),
            ));
        }
        Ok(())
    }

    fn native_scale_info(&self) -> ScaleInfo {
        ScaleInfo {
            format: self.format,
            width: self.width,
            height: self.height,
            range: self.range,
            colorspace: self.colorspace,
        }
    }
}

impl fmt::Debug for VideoOutputOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoOutputOptions")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("fps_num", &self.fps_num)
            .field("fps_den", &self.fps_den)
            .field("cache_size", &self.cache_size)
            .field("range", &self.range)
            .field("colorspace", &self.colorspace)
            .finish_non_exhaustive()
    }
}

/// Builder for [`VideoOutputOptions`] with ergonomic method chaining.
#[derive(Clone)]
pub struct VideoOutputOptionsBuilder {
    name: Option<String>,
    format: Option<PixelFormat>,
    width: Option<u32>,
    height: Option<u32>,
    fps_num: Option<u32>,
    fps_den: Option<u32>,
    cache_size: Option<usize>,
    range: Option<ColorRange>,
    colorspace: Option<ColorSpace>,
    scaler_factory: Option<Arc<dyn ScalerFactory>>,
}

impl VideoOutputOptionsBuilder {
    /// Create a new builder with no fields set.
    pub fn new() -> Self {
        Self {
            name: None,
            format: None,
            width: None,
            height: None,
            fps_num: None,
            fps_den: None,
            cache_size: None,
            range: None,
            colorspace: None,
            scaler_factory: None,
        }
    }

    /// Set the output name used in log messages and thread names.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the native pixel format.
    #[must_use]
    pub fn format(mut self, format: PixelFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set the native resolution.
    #[must_use]
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Set the frame rate as a rational.
    #[must_use]
    pub fn frame_rate(mut self, fps_num: u32, fps_den: u32) -> Self {
        self.fps_num = Some(fps_num);
        self.fps_den = Some(fps_den);
        self
    }

    /// Set the slot ring depth.
    #[must_use]
    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = Some(cache_size);
        self
    }

    /// Set the native quantization range.
    #[must_use]
    pub fn range(mut self, range: ColorRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Set the native color space.
    #[must_use]
    pub fn colorspace(mut self, colorspace: ColorSpace) -> Self {
        self.colorspace = Some(colorspace);
        self
    }

    /// Set the factory that builds per-subscriber converters.
    #[must_use]
    pub fn scaler_factory(mut self, factory: Arc<dyn ScalerFactory>) -> Self {
        self.scaler_factory = Some(factory);
        self
    }

    /// Build the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for a zero resolution,
    /// frame rate term, or cache size.
    pub fn build(self) -> Result<VideoOutputOptions> {
        let options = VideoOutputOptions {
            name: self.name.unwrap_or_else(|| "video".to_string()),
            format: self.format.unwrap_or(PixelFormat::Bgra),
            width: self.width.unwrap_or(1920),
            height: self.height.unwrap_or(1080),
            fps_num: self.fps_num.unwrap_or(30),
            fps_den: self.fps_den.unwrap_or(1),
            cache_size: self.cache_size.unwrap_or(DEFAULT_CACHE_SIZE),
            range: self.range.unwrap_or(ColorRange::Default),
            colorspace: self.colorspace.unwrap_or(ColorSpace::Default),
            scaler_factory: self
                .scaler_factory
                .unwrap_or_else(|| Arc::new(NoScalerFactory)),
        };
        options.validate()?;
        Ok(options)
    }
}

impl Default for VideoOutputOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write access to one cache slot, held by the producer while filling it.
///
/// Dereferences to the slot's [`VideoFrame`]. Dropping the guard publishes
/// the slot: the pacing thread wakes and serves it to every subscriber.
#[must_use = "dropping the guard immediately publishes the unmodified slot"]
pub struct FrameLock<'a> {
    shared: &'a OutputShared,
    guard: MutexGuard<'a, VideoFrame>,
}

impl Deref for FrameLock<'_> {
    type Target = VideoFrame;

    fn deref(&self) -> &VideoFrame {
        &self.guard
    }
}

impl DerefMut for FrameLock<'_> {
    fn deref_mut(&mut self) -> &mut VideoFrame {
        &mut self.guard
    }
}

impl fmt::Debug for FrameLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLock")
            .field("width", &self.guard.width)
            .field("height", &self.guard.height)
            .field("timestamp", &self.guard.timestamp)
            .finish()
    }
}

impl Drop for FrameLock<'_> {
    fn drop(&mut self) {
        self.shared.updates.post();
    }
}

#[derive(Clone, Copy)]
struct SlotMeta {
    /// Paced deliveries still owed for this slot.
    count: usize,
    /// How many of those deliveries stand in for rejected frames.
    skipped: usize,
}

struct CacheState {
    meta: Vec<SlotMeta>,
    /// Slots not currently owed to the pacing thread.
    available: usize,
    first_added: usize,
    last_added: usize,
}

struct ConversionState {
    scaler: Box<dyn FrameScaler>,
    scratch: Vec<VideoFrame>,
    cur: usize,
}

struct DeliveryState {
    divisor_counter: u32,
    conversion: Option<ConversionState>,
}

struct SubscriberEntry {
    id: SubscriberId,
    handle: Arc<Mutex<dyn Subscriber>>,
    divisor: u32,
    state: Mutex<DeliveryState>,
}

struct Registry {
    entries: Vec<Arc<SubscriberEntry>>,
    next_id: u64,
}

/// State shared between the producer-facing handle and the pacing thread.
///
/// Lock discipline: no path holds `cache` or `registry` while taking a
/// slot payload. Delivery alone nests locks, a slot payload around the
/// per-subscriber state and handle.
struct OutputShared {
    options: VideoOutputOptions,
    frame_time: u64,
    slots: Vec<Mutex<VideoFrame>>,
    cache: Mutex<CacheState>,
    registry: Mutex<Registry>,
    updates: Semaphore,
    stop: AtomicBool,
    raw_active: AtomicBool,
    texture_consumers: AtomicUsize,
    total_frames: AtomicU64,
    skipped_frames: AtomicU64,
}

impl OutputShared {
    fn lock_cache(&self) -> MutexGuard<'_, CacheState> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_slot(&self, index: usize) -> MutexGuard<'_, VideoFrame> {
        self.slots[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reset_counters(&self) {
        self.skipped_frames.store(0, Ordering::Relaxed);
        self.total_frames.store(0, Ordering::Relaxed);
    }

    fn log_skipped(&self) {
        let skipped = self.skipped_frames.load(Ordering::Relaxed);
        if skipped == 0 {
            return;
        }
        let total = self.total_frames.load(Ordering::Relaxed).max(1);
        let percentage = skipped as f64 / total as f64 * 100.0;
        info!(
            "Video output '{}' stopped, number of skipped frames due to encoding lag: {}/{} ({:.1}%)",
            self.options.name, skipped, total, percentage
        );
    }

    fn pacing_loop(&self) {
        loop {
            self.updates.wait();
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            while !self.stop.load(Ordering::Acquire) && !self.deliver_oldest() {
                self.total_frames.fetch_add(1, Ordering::Relaxed);
            }
            self.total_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Serves the oldest pending slot to every subscriber and retires one
    /// owed delivery. Returns whether the slot completed.
    fn deliver_oldest(&self) -> bool {
        let slot = self.lock_cache().first_added;

        let entries: Vec<Arc<SubscriberEntry>> = self.lock_registry().entries.clone();

        {
            let mut frame = self.lock_slot(slot);

            for entry in &entries {
                let mut state = entry
                    .state
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());

                // An explicit counter rather than a remainder, so
                // subscribers connected on the same frame keep serving
                // the same frames.
                let skip = state.divisor_counter != 0;
                state.divisor_counter += 1;
                if state.divisor_counter == entry.divisor {
                    state.divisor_counter = 0;
                }
                if skip {
                    continue;
                }

                match &mut state.conversion {
                    None => {
                        entry
                            .handle
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .deliver(&frame);
                    }
                    Some(conversion) => {
                        conversion.cur += 1;
                        if conversion.cur == SCRATCH_FRAMES {
                            conversion.cur = 0;
                        }
                        let ConversionState { scaler, scratch, cur } = conversion;
                        let scaled = &mut scratch[*cur];
                        if scaler.scale(&frame, scaled) {
                            scaled.timestamp = frame.timestamp;
                            entry
                                .handle
                                .lock()
                                .unwrap_or_else(|poisoned| poisoned.into_inner())
                                .deliver(scaled);
                        } else {
                            warn!(
                                "Video output '{}': could not scale frame for subscriber {:?}",
                                self.options.name, entry.id
                            );
                        }
                    }
                }
            }

            // Repeat deliveries of the same slot advance by one interval,
            // so subscribers see an unbroken timeline.
            frame.timestamp = frame.timestamp.wrapping_add(self.frame_time);
        }

        let mut cache = self.lock_cache();
        let (complete, skipped) = {
            let meta = &mut cache.meta[slot];
            meta.count = meta.count.saturating_sub(1);
            (meta.count == 0, meta.skipped > 0)
        };

        if complete {
            cache.first_added = (cache.first_added + 1) % self.options.cache_size;
            cache.available += 1;
            if cache.available == self.options.cache_size {
                cache.last_added = cache.first_added;
            }
        } else if skipped {
            cache.meta[slot].skipped -= 1;
            self.skipped_frames.fetch_add(1, Ordering::Relaxed);
        }

        complete
    }
}

/// A paced video output: producer-facing slot ring plus delivery thread.
///
/// # Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use framesync::{SubscribeOptions, Subscriber, VideoFrame, VideoOutput, VideoOutputOptions};
///
/// struct Printer;
///
/// impl Subscriber for Printer {
///     fn deliver(&mut self, frame: &VideoFrame) {
///         println!("frame at {}", frame.timestamp);
///     }
/// }
///
/// # fn main() -> framesync::Result<()> {
/// let output = VideoOutput::open(
///     VideoOutputOptions::builder()
///         .name("program")
///         .resolution(1280, 720)
///         .frame_rate(60, 1)
///         .build()?,
/// )?;
/// let id = output.connect(SubscribeOptions::new(), Arc::new(Mutex::new(Printer)))?;
///
/// if let Some(mut frame) = output.lock_frame(1, 0) {
///     frame.plane_mut(0).fill(0);
/// }
///
/// output.disconnect(id);
/// output.close();
/// # Ok(())
/// # }
/// ```
pub struct VideoOutput {
    shared: Arc<OutputShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VideoOutput {
    /// Opens a video output and starts its pacing thread.
    ///
    /// The slot ring is preallocated at the native shape,
    /// `options.cache_size` deep, clamped to [`MAX_CACHE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for a zero resolution,
    /// frame rate term, or cache size, [`Error::InvalidFrame`] when the
    /// native shape cannot be allocated, and [`Error::ThreadStartFailed`]
    /// when the OS refuses the thread.
    pub fn open(mut options: VideoOutputOptions) -> Result<VideoOutput> {
        options.validate()?;
        if options.cache_size > MAX_CACHE_SIZE {
            options.cache_size = MAX_CACHE_SIZE;
        }

        let frame_time = clock::mul_div64(
            clock::NS_PER_SEC,
            u64::from(options.fps_den),
            u64::from(options.fps_num),
        );

        let mut slots = Vec::with_capacity(options.cache_size);
        for _ in 0..options.cache_size {
            slots.push(Mutex::new(VideoFrame::alloc(
                options.format,
                options.width,
                options.height,
            )?));
        }

        let cache = CacheState {
            meta: vec![SlotMeta { count: 0, skipped: 0 }; options.cache_size],
            available: options.cache_size,
            first_added: 0,
            last_added: 0,
        };

        let shared = Arc::new(OutputShared {
            frame_time,
            slots,
            cache: Mutex::new(cache),
            registry: Mutex::new(Registry {
                entries: Vec::new(),
                next_id: 0,
            }),
            updates: Semaphore::new(0),
            stop: AtomicBool::new(false),
            raw_active: AtomicBool::new(false),
            texture_consumers: AtomicUsize::new(0),
            total_frames: AtomicU64::new(0),
            skipped_frames: AtomicU64::new(0),
            options,
        });

        let pacing = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("video output: {}", shared.options.name))
            .spawn(move || pacing.pacing_loop())
            .map_err(Error::ThreadStartFailed)?;

        Ok(VideoOutput {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Borrows the newest cache slot for the producer to fill.
    ///
    /// `count` is how many paced deliveries the frame is worth; a producer
    /// compensating for upstream lag passes `1 + lagged_frames` so the
    /// output cadence stays continuous. Zero is treated as one.
    /// `timestamp` is stamped on the slot before it is returned.
    ///
    /// Returns `None` when every slot is still pending delivery; the
    /// `count` is then charged to the newest pending slot, which will be
    /// served that many extra times and counted under
    /// [`VideoOutput::skipped_frames`].
    pub fn lock_frame(&self, count: usize, timestamp: u64) -> Option<FrameLock<'_>> {
        let shared = &*self.shared;
        let count = count.max(1);

        let slot = {
            let mut cache = shared.lock_cache();

            if cache.available == 0 {
                let newest = cache.last_added;
                let meta = &mut cache.meta[newest];
                meta.count = meta.count.saturating_add(count);
                meta.skipped = meta.skipped.saturating_add(count);
                return None;
            }

            if cache.available != shared.options.cache_size {
                cache.last_added = (cache.last_added + 1) % shared.options.cache_size;
            }
            cache.available -= 1;

            let slot = cache.last_added;
            cache.meta[slot] = SlotMeta { count, skipped: 0 };
            slot
        };

        let mut guard = shared.lock_slot(slot);
        guard.timestamp = timestamp;

        Some(FrameLock { shared, guard })
    }

    /// Registers a subscriber for paced frames.
    ///
    /// Subscribers are served in registration order from the output's
    /// pacing thread. When `options` asks for a shape other than the
    /// output's native one, the [`ScalerFactory`] builds a converter for
    /// this subscriber and frames pass through it before delivery.
    ///
    /// The handle doubles as the subscriber's identity: connecting a
    /// handle that is already registered fails, and cloning the `Arc`
    /// does not make it a new subscriber.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] for a zero
    /// `frame_rate_divisor`, [`Error::Stopped`] when the pacing thread has
    /// been stopped (nothing would ever be delivered),
    /// [`Error::AlreadyConnected`] for a duplicate handle, and whatever
    /// the factory returns for an unsupported conversion.
    pub fn connect(
        &self,
        options: SubscribeOptions,
        handle: Arc<Mutex<dyn Subscriber>>,
    ) -> Result<SubscriberId> {
        options.validate()?;
        let shared = &*self.shared;

        // Checked under the registry lock: close() drains the registry
        // after raising the flag, so a subscriber cannot slip in between.
        let mut registry = shared.lock_registry();
        if shared.stop.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        if registry
            .entries
            .iter()
            .any(|entry| Arc::ptr_eq(&entry.handle, &handle))
        {
            return Err(Error::AlreadyConnected);
        }

        let native = shared.options.native_scale_info();
        let conversion = match options.conversion {
            Some(requested) => {
                let target = requested.normalized_against(&native);
                if target.scale_required(&native) {
                    let scaler = shared.options.scaler_factory.create(&native, &target)?;
                    let mut scratch = Vec::with_capacity(SCRATCH_FRAMES);
                    for _ in 0..SCRATCH_FRAMES {
                        scratch.push(VideoFrame::alloc(
                            target.format,
                            target.width,
                            target.height,
                        )?);
                    }
                    Some(ConversionState {
                        scaler,
                        scratch,
                        cur: 0,
                    })
                } else {
                    None
                }
            }
            None => None,
        };

        if registry.entries.is_empty() {
            if shared.texture_consumers.load(Ordering::Acquire) == 0 {
                shared.reset_counters();
            }
            shared.raw_active.store(true, Ordering::Release);
        }

        let id = SubscriberId(registry.next_id);
        registry.next_id += 1;
        registry.entries.push(Arc::new(SubscriberEntry {
            id,
            handle,
            divisor: options.frame_rate_divisor,
            state: Mutex::new(DeliveryState {
                divisor_counter: 0,
                conversion,
            }),
        }));

        Ok(id)
    }

    /// Removes a subscriber. Returns whether it was registered.
    ///
    /// When the last subscriber leaves and no texture consumers are
    /// attached, the skip ratio accumulated since it connected is logged.
    pub fn disconnect(&self, id: SubscriberId) -> bool {
        let shared = &*self.shared;
        let mut registry = shared.lock_registry();

        let Some(index) = registry.entries.iter().position(|entry| entry.id == id) else {
            return false;
        };

        let entry = registry.entries.remove(index);
        if registry.entries.is_empty() {
            shared.raw_active.store(false, Ordering::Release);
            if shared.texture_consumers.load(Ordering::Acquire) == 0 {
                shared.log_skipped();
            }
        }

        drop(registry);
        // An in-flight delivery may still hold a clone of the entry; its
        // converter is freed once that delivery finishes.
        drop(entry);
        true
    }

    /// Whether any subscriber is currently registered.
    pub fn active(&self) -> bool {
        self.shared.raw_active.load(Ordering::Acquire)
    }

    /// Asks the pacing thread to exit after the current delivery.
    ///
    /// Producers may keep locking frames afterwards; nothing drains them.
    pub fn stop(&self) {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            self.shared.updates.post();
        }
    }

    /// Whether [`VideoOutput::stop`] has been called.
    pub fn stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// Stops the pacing thread, waits for it to exit, and detaches every
    /// subscriber, logging the skip ratio for any still attached.
    ///
    /// Runs automatically on drop. Must not be called from a subscriber's
    /// `deliver`, which executes on the thread being joined.
    pub fn close(&self) {
        self.stop();

        let thread = {
            let mut slot = self
                .thread
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.take()
        };
        if let Some(thread) = thread {
            let _ = thread.join();
        }

        let entries = {
            let mut registry = self.shared.lock_registry();
            std::mem::take(&mut registry.entries)
        };
        if !entries.is_empty() {
            self.shared.raw_active.store(false, Ordering::Release);
            if self.shared.texture_consumers.load(Ordering::Acquire) == 0 {
                self.shared.log_skipped();
            }
        }
    }

    /// Notes a consumer taking frames outside the cache path (a GPU
    /// encoder). The first one resets the frame counters when no
    /// subscriber is active, so its skip ratio starts clean.
    pub fn add_texture_consumer(&self) {
        if self.shared.texture_consumers.fetch_add(1, Ordering::AcqRel) == 0
            && !self.shared.raw_active.load(Ordering::Acquire)
        {
            self.shared.reset_counters();
        }
    }

    /// Removes a texture consumer; the last one leaving logs the skip
    /// ratio when no subscriber is active.
    pub fn remove_texture_consumer(&self) {
        let previous = self.shared.texture_consumers.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |count| count.checked_sub(1),
        );
        if previous == Ok(1) && !self.shared.raw_active.load(Ordering::Acquire) {
            self.shared.log_skipped();
        }
    }

    /// Counts one frame consumed outside the cache path.
    pub fn record_texture_frame(&self) {
        self.shared.total_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one frame dropped outside the cache path.
    pub fn record_texture_skip(&self) {
        self.shared.skipped_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Output name.
    pub fn name(&self) -> &str {
        &self.shared.options.name
    }

    /// Native frame width in pixels.
    pub fn width(&self) -> u32 {
        self.shared.options.width
    }

    /// Native frame height in pixels.
    pub fn height(&self) -> u32 {
        self.shared.options.height
    }

    /// Native pixel format.
    pub fn format(&self) -> PixelFormat {
        self.shared.options.format
    }

    /// Frame rate as a float, numerator over denominator.
    pub fn frame_rate(&self) -> f64 {
        f64::from(self.shared.options.fps_num) / f64::from(self.shared.options.fps_den)
    }

    /// Nanoseconds between paced frames.
    pub fn frame_time_ns(&self) -> u64 {
        self.shared.frame_time
    }

    /// Slot ring depth after clamping.
    pub fn cache_size(&self) -> usize {
        self.shared.options.cache_size
    }

    /// Frames served since the counters were last reset.
    pub fn total_frames(&self) -> u64 {
        self.shared.total_frames.load(Ordering::Relaxed)
    }

    /// Deliveries that stood in for rejected frames.
    pub fn skipped_frames(&self) -> u64 {
        self.shared.skipped_frames.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for VideoOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoOutput")
            .field("name", &self.shared.options.name)
            .field("width", &self.shared.options.width)
            .field("height", &self.shared.options.height)
            .field("format", &self.shared.options.format)
            .finish()
    }
}

impl Drop for VideoOutput {
    fn drop(&mut self) {
        self.close();
    }
}
