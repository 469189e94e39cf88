//! Property tests over the deterministic parts of the crate: the drift
//! loop, the gain-curve builder, frame layout math, and the audio render
//! cadence.

use framesync::{
    clock,
    drift::{DriftCompensator, DriftFilter, MAX_RATIO_PARTS},
    source::{AudioOutputBuffer, AudioRenderOutcome, AUDIO_OUTPUT_FRAMES},
    Action, ActionKind, ActionQueue, AudioPacket, PixelFormat, Source, VideoFrame, VolumeState,
};
use proptest::prelude::*;

proptest! {
    /// Replaying any error sequence into a fresh filter lands on the same
    /// state, so a source restart reproduces its compensation exactly.
    #[test]
    fn drift_filter_replays_identically(
        sequence in prop::collection::vec(
            (8_000u32..192_000, 1usize..4096, -50_000_000i64..50_000_000),
            0..100,
        ),
    ) {
        let mut a = DriftFilter::new();
        let mut b = DriftFilter::new();
        for &(rate, frames, err) in &sequence {
            a.update(rate, frames, err);
        }
        for &(rate, frames, err) in &sequence {
            b.update(rate, frames, err);
        }
        prop_assert_eq!(a.drift_seconds(), b.drift_seconds());
        prop_assert_eq!(a.last_error_ns(), b.last_error_ns());
    }

    /// No error sequence, however absurd, can drive the reported ratio
    /// outside the resampler-safe clamp.
    #[test]
    fn ratio_parts_never_exceed_the_clamp(
        sequence in prop::collection::vec((1usize..4096, prop::num::i64::ANY), 0..200),
    ) {
        let mut comp = DriftCompensator::new();
        comp.set_enabled(true);
        for &(frames, err) in &sequence {
            comp.update(48_000, frames, err);
        }
        prop_assert!(comp.ratio_parts().abs() <= MAX_RATIO_PARTS);
    }

    /// The gain curve consumes exactly the actions landing inside the
    /// window, leaves the rest queued, and never produces a gain outside
    /// the volume range.
    #[test]
    fn gain_curve_consumes_exactly_the_window(
        actions in prop::collection::vec((-21_000_000i64..64_000_000, 0.0f32..=1.0), 0..12),
    ) {
        const START: u64 = 1_000_000_000;

        let mut queue = ActionQueue::new();
        for &(offset_ns, volume) in &actions {
            queue.push(Action {
                timestamp: START.wrapping_add_signed(offset_ns),
                kind: ActionKind::SetVolume(volume),
            });
        }
        let total = queue.len();

        let in_window = |offset_ns: i64| {
            let ts = START.wrapping_add_signed(offset_ns).max(START);
            (clock::ns_to_frames(ts - START, 48_000) as usize) < AUDIO_OUTPUT_FRAMES
        };
        let expected = actions.iter().filter(|&&(off, _)| in_window(off)).count();

        let mut state = VolumeState::default();
        let mut curve = [f32::NAN; AUDIO_OUTPUT_FRAMES];
        let consumed = queue.fill_gain_curve(&mut state, START, 48_000, &mut curve);

        prop_assert_eq!(consumed, expected);
        prop_assert_eq!(queue.len(), total - consumed);
        prop_assert!(curve.iter().all(|g| (0.0..=1.0).contains(g)));

        // Samples ahead of the earliest consumed action keep the prior
        // unity gain.
        let first = actions
            .iter()
            .filter(|&&(off, _)| in_window(off))
            .map(|&(off, _)| {
                let ts = START.wrapping_add_signed(off).max(START);
                clock::ns_to_frames(ts - START, 48_000) as usize
            })
            .min();
        if let Some(first) = first {
            prop_assert!(curve[..first].iter().all(|&g| g == 1.0));
        }
    }

    /// Every format/size combination allocates a frame whose public layout
    /// accessors agree with each other.
    #[test]
    fn frame_layout_is_consistent(
        format in prop::sample::select(vec![
            PixelFormat::Uyvy,
            PixelFormat::Nv12,
            PixelFormat::I420,
            PixelFormat::I444,
            PixelFormat::Bgra,
            PixelFormat::Bgrx,
            PixelFormat::Rgba,
        ]),
        width in 1u32..512,
        height in 1u32..512,
    ) {
        let frame = VideoFrame::alloc(format, width, height).unwrap();
        prop_assert_eq!(frame.plane_count(), format.plane_count());

        let expected_linesize = match format {
            PixelFormat::Uyvy => width as usize * 2,
            f if f.is_packed_rgb() => width as usize * 4,
            _ => width as usize,
        };
        prop_assert_eq!(frame.linesize(0), expected_linesize);

        // Planes tile the allocation apart from alignment padding.
        let planes: usize = (0..frame.plane_count()).map(|i| frame.plane(i).len()).sum();
        prop_assert!(planes <= frame.data().len());
    }

    /// Any number of contiguous windows renders back on an exact cadence
    /// with nothing left over.
    #[test]
    fn contiguous_windows_render_on_cadence(count in 1u64..6) {
        let source = Source::new("producer", 48_000, 2).unwrap();
        let window_ns = clock::frames_to_ns(AUDIO_OUTPUT_FRAMES as u64, 48_000);
        let base = clock::now_ns();

        for i in 0..count {
            let packet = AudioPacket::builder()
                .sample_rate(48_000)
                .channels(2)
                .frames(AUDIO_OUTPUT_FRAMES)
                .timestamp(base + i * window_ns)
                .data(vec![0.5; AUDIO_OUTPUT_FRAMES * 2])
                .build()
                .unwrap();
            source.push_audio(&packet);
        }

        let mut out = AudioOutputBuffer::new();
        for i in 0..count {
            match source.render_audio(u32::MAX, &mut out) {
                AudioRenderOutcome::Rendered { timestamp } => {
                    prop_assert_eq!(timestamp, base + i * window_ns);
                }
                AudioRenderOutcome::Pending => prop_assert!(false, "window {} missing", i),
            }
        }
        prop_assert_eq!(source.buffered_samples(), 0);
    }
}
