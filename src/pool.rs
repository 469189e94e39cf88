//! Recycling arena for decoded video frames.
//!
//! Decoded frames arrive at capture rate and leave at render rate, so the
//! engine would otherwise allocate and free a multi-megabyte buffer per
//! frame. [`FramePool`] keeps a small arena of same-shape frames and hands
//! out stable [`FrameId`] handles instead of pointers. An entry cycles
//! through three states:
//!
//! * **in use** after [`FramePool::acquire`], meaning it is queued for or
//!   held as the current display frame,
//! * **idle** after [`FramePool::mark_unused`], eligible for reuse by the
//!   next acquire of the same shape,
//! * **removed** once it has sat idle for [`MAX_UNUSED_FRAME_AGE`]
//!   consecutive acquires, which bounds memory to recent peak demand.
//!
//! Consumers that need the pixels past the pool's bookkeeping take a
//! shared handle with [`FramePool::retain`]; the pool will not overwrite
//! an entry while any such handle is alive.

use std::sync::Arc;

use log::{debug, error};

use crate::frames::{PixelFormat, VideoFrame};

/// Hard cap on frames acquired but never marked unused.
///
/// Hitting the cap means the consumer stopped draining; the pool discards
/// everything and reports [`Acquired::Reset`] so the owner can restart its
/// timing from scratch.
pub const MAX_POOLED_FRAMES: usize = 30;

/// Number of consecutive acquires an idle entry survives before its
/// backing buffer is freed.
pub const MAX_UNUSED_FRAME_AGE: u32 = 5;

/// Stable handle to one pooled frame.
///
/// Ids are never reused, so a stale handle held across a pool reset simply
/// stops resolving instead of aliasing a newer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

/// Outcome of [`FramePool::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// An entry was reserved; fill it with [`FramePool::copy_into`].
    Frame(FrameId),
    /// The pool hit [`MAX_POOLED_FRAMES`] outstanding entries and discarded
    /// them all. The caller must drop its queued handles and re-seed its
    /// frame timing.
    Reset,
    /// The frame could not be allocated; the caller drops this frame only.
    Failed,
}

#[derive(Debug)]
struct PoolEntry {
    id: FrameId,
    frame: Arc<VideoFrame>,
    /// Reserved by `acquire`, returned by `mark_unused`.
    used: bool,
    /// Outstanding `retain` handles. An entry is recycled only at zero.
    refs: u32,
    /// Consecutive acquires spent idle.
    unused_count: u32,
}

/// Arena of recycled [`VideoFrame`] buffers sharing one shape.
///
/// The pool holds a single shape at a time: a shape change (resolution or
/// pixel format) discards every entry, since buffers of the old shape can
/// never be reused for the new one.
///
/// # Examples
///
/// ```
/// use framesync::{Acquired, FramePool, PixelFormat};
///
/// let mut pool = FramePool::new();
/// if let Acquired::Frame(id) = pool.acquire(PixelFormat::Bgra, 640, 360) {
///     // Hand the pixels to a consumer, then give the entry back.
///     let shared = pool.retain(id).unwrap();
///     assert_eq!(shared.width, 640);
///     drop(shared);
///     pool.release(id);
///     pool.mark_unused(id);
/// }
/// assert_eq!(pool.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct FramePool {
    entries: Vec<PoolEntry>,
    shape: Option<(PixelFormat, u32, u32)>,
    next_id: u64,
}

impl FramePool {
    /// Creates an empty pool. The shape is fixed by the first acquire.
    #[must_use]
    pub fn new() -> FramePool {
        FramePool::default()
    }

    /// Number of entries currently backed by an allocation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries reserved and not yet marked unused.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.entries.iter().filter(|e| e.used).count()
    }

    /// Shape served by the pool, once an acquire has fixed it.
    #[must_use]
    pub fn shape(&self) -> Option<(PixelFormat, u32, u32)> {
        self.shape
    }

    /// Reserves a frame of the given shape, recycling an idle entry when
    /// one exists.
    ///
    /// Every call also ages idle entries and frees the ones that reach
    /// [`MAX_UNUSED_FRAME_AGE`], so steady acquire traffic is what drains
    /// the pool after a demand spike.
    pub fn acquire(&mut self, format: PixelFormat, width: u32, height: u32) -> Acquired {
        if self.in_use() >= MAX_POOLED_FRAMES {
            debug!(
                "Frame pool hit {MAX_POOLED_FRAMES} outstanding frames, discarding all entries"
            );
            self.entries.clear();
            return Acquired::Reset;
        }

        let shape = (format, width, height);
        if self.shape != Some(shape) {
            self.entries.clear();
            self.shape = Some(shape);
        }

        let mut reused = None;
        for entry in &mut self.entries {
            if !entry.used && entry.refs == 0 && Arc::strong_count(&entry.frame) == 1 {
                entry.used = true;
                entry.unused_count = 0;
                reused = Some(entry.id);
                break;
            }
        }

        // Age the entries that stayed idle through this acquire.
        self.entries.retain_mut(|entry| {
            if entry.used {
                return true;
            }
            entry.unused_count += 1;
            entry.unused_count < MAX_UNUSED_FRAME_AGE
        });

        if let Some(id) = reused {
            return Acquired::Frame(id);
        }

        let frame = match VideoFrame::alloc(format, width, height) {
            Ok(frame) => frame,
            Err(err) => {
                error!("Failed to allocate {format:?} {width}x{height} frame: {err}");
                return Acquired::Failed;
            }
        };

        let id = FrameId(self.next_id);
        self.next_id += 1;
        self.entries.push(PoolEntry {
            id,
            frame: Arc::new(frame),
            used: true,
            refs: 0,
            unused_count: 0,
        });
        Acquired::Frame(id)
    }

    /// Copies `src`'s pixels and timestamp into the entry for `id`.
    ///
    /// Returns `false` when the handle no longer resolves, when a shared
    /// handle from [`FramePool::retain`] is still alive, or when `src` does
    /// not match the entry's shape. The entry's bookkeeping is untouched
    /// either way; a caller that cannot fill the frame normally returns it
    /// with [`FramePool::mark_unused`].
    pub fn copy_into(&mut self, id: FrameId, src: &VideoFrame) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        match Arc::get_mut(&mut entry.frame) {
            Some(frame) => frame.copy_content_from(src).is_ok(),
            None => false,
        }
    }

    /// Borrows the frame for `id` without affecting its refcount.
    #[must_use]
    pub fn get(&self, id: FrameId) -> Option<&VideoFrame> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.frame.as_ref())
    }

    /// Takes a shared handle to the pixels of `id`, pinning the entry
    /// against recycling until [`FramePool::release`] is called.
    ///
    /// Returns `None` when the handle no longer resolves, which happens
    /// after a shape change or cap reset discarded the entry.
    pub fn retain(&mut self, id: FrameId) -> Option<Arc<VideoFrame>> {
        let entry = self.entries.iter_mut().find(|e| e.id == id)?;
        entry.refs += 1;
        Some(Arc::clone(&entry.frame))
    }

    /// Returns one [`FramePool::retain`] handle's claim on `id`.
    ///
    /// The caller is expected to drop the shared handle first. A release
    /// for a discarded entry is a no-op; the pixels stay alive through the
    /// consumer's own handle for as long as it keeps one.
    pub fn release(&mut self, id: FrameId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.refs = entry.refs.saturating_sub(1);
        }
    }

    /// Marks `id` idle so a later acquire may recycle it.
    ///
    /// The buffer contents are kept; only the reservation is dropped.
    pub fn mark_unused(&mut self, id: FrameId) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.used = false;
        }
    }

    /// Discards every entry.
    ///
    /// Consumers holding shared handles keep their pixels; the pool merely
    /// forgets the entries, and their handles stop resolving.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
