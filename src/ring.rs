//! Per-channel audio sample buffer.
//!
//! Each source keeps one [`SampleRing`] per channel. Steady playback appends
//! to the tail; timing corrections write at an absolute sample position
//! instead, which zero-fills any gap between the current tail and the write
//! position and discards anything that was queued beyond the written range.
//! The render path consumes fixed windows from the front.

use std::collections::VecDeque;

/// A FIFO of `f32` samples for one channel.
#[derive(Debug, Default)]
pub(crate) struct SampleRing {
    samples: VecDeque<f32>,
}

impl SampleRing {
    pub(crate) fn new() -> Self {
        Self {
            samples: VecDeque::new(),
        }
    }

    /// Number of buffered samples.
    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Appends samples at the tail.
    pub(crate) fn push_back(&mut self, data: &[f32]) {
        self.samples.extend(data.iter().copied());
    }

    /// Writes samples at absolute position `pos` from the front.
    ///
    /// A gap between the current tail and `pos` is zero-filled (silence);
    /// samples previously queued past `pos + data.len()` are dropped. After
    /// the call the ring ends exactly at `pos + data.len()`.
    pub(crate) fn place(&mut self, pos: usize, data: &[f32]) {
        if self.samples.len() < pos {
            self.samples.resize(pos, 0.0);
        }

        let end = pos + data.len();
        self.samples.truncate(end);
        let overlap = self.samples.len() - pos;
        for (slot, &sample) in self.samples.range_mut(pos..).zip(data.iter()) {
            *slot = sample;
        }
        self.samples.extend(data[overlap..].iter().copied());
    }

    /// Pops up to `out.len()` samples from the front into `out`.
    ///
    /// The tail of `out` beyond what was available is zero-filled. Returns
    /// the number of real samples written.
    pub(crate) fn pop_front_into(&mut self, out: &mut [f32]) -> usize {
        let take = out.len().min(self.samples.len());
        for slot in out[..take].iter_mut() {
            // take is bounded by len above
            *slot = self.samples.pop_front().unwrap_or(0.0);
        }
        out[take..].fill(0.0);
        take
    }

    /// Drops all buffered samples.
    pub(crate) fn clear(&mut self) {
        self.samples.clear();
    }
}
