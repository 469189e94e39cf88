//! End-to-end pacing tests driving [`framesync::VideoOutput`] through its
//! public API, with real subscribers on the real delivery thread.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use framesync::{
    clock, PixelFormat, SubscribeOptions, Subscriber, VideoFrame, VideoOutput, VideoOutputOptions,
};

fn options(name: &str, cache_size: usize) -> VideoOutputOptions {
    VideoOutputOptions::builder()
        .name(name)
        .format(PixelFormat::Bgra)
        .resolution(64, 64)
        .frame_rate(60, 1)
        .cache_size(cache_size)
        .build()
        .unwrap()
}

/// Polls `cond` for up to two seconds.
fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Locks the newest slot, stamps it, and immediately publishes it.
fn produce(output: &VideoOutput, timestamp: u64) {
    let lock = output
        .lock_frame(1, timestamp)
        .expect("a slot should be free");
    drop(lock);
}

#[derive(Default)]
struct Recorder {
    seen: Vec<u64>,
}

impl Subscriber for Recorder {
    fn deliver(&mut self, frame: &VideoFrame) {
        self.seen.push(frame.timestamp);
    }
}

fn seen(recorder: &Arc<Mutex<Recorder>>) -> Vec<u64> {
    recorder.lock().unwrap().seen.clone()
}

/// A subscriber that parks inside `deliver` until released, so a test can
/// hold the delivery thread at a known point.
struct Gated {
    open: Arc<AtomicBool>,
    entered: Arc<AtomicUsize>,
    seen: Vec<u64>,
}

impl Subscriber for Gated {
    fn deliver(&mut self, frame: &VideoFrame) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        while !self.open.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        self.seen.push(frame.timestamp);
    }
}

/// A producer that overruns a stalled consumer is charged to the newest
/// pending slot, and the owed repeats play out once the consumer recovers.
///
/// This verifies:
/// - Overrun lock attempts fail instead of blocking the producer
/// - The owed deliveries repeat the newest frame with advancing timestamps
/// - `total_frames`/`skipped_frames` account for every owed delivery
#[test]
fn test_overrun_is_charged_and_repaid() {
    let output = VideoOutput::open(options("program", 3)).unwrap();
    let open = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicUsize::new(0));
    let gated = Arc::new(Mutex::new(Gated {
        open: open.clone(),
        entered: entered.clone(),
        seen: Vec::new(),
    }));
    output
        .connect(SubscribeOptions::new(), gated.clone() as Arc<Mutex<dyn Subscriber>>)
        .unwrap();

    // Park the delivery thread inside the first frame's delivery.
    produce(&output, 1_000);
    assert!(wait_until(|| entered.load(Ordering::SeqCst) == 1));

    // Fill the remaining slots, then overrun twice.
    produce(&output, 2_000);
    produce(&output, 3_000);
    assert!(output.lock_frame(1, 4_000).is_none());
    assert!(output.lock_frame(1, 5_000).is_none());

    open.store(true, Ordering::SeqCst);
    assert!(wait_until(|| {
        output.total_frames() == 5 && output.skipped_frames() == 2
    }));

    // The newest frame was served three times, each repeat one display
    // interval later.
    let frame_time = output.frame_time_ns();
    assert_eq!(
        gated.lock().unwrap().seen,
        vec![
            1_000,
            2_000,
            3_000,
            3_000 + frame_time,
            3_000 + 2 * frame_time
        ]
    );

    // Draining the owed deliveries freed the whole cache again.
    produce(&output, 6_000);
    produce(&output, 7_000);
    produce(&output, 8_000);

    output.close();
}

/// A frame-rate divisor thins a live feed without disturbing a full-rate
/// subscriber on the same output.
#[test]
fn test_divisor_thins_a_live_feed() {
    let output = VideoOutput::open(options("preview", 16)).unwrap();

    let full = Arc::new(Mutex::new(Recorder::default()));
    let divided = Arc::new(Mutex::new(Recorder::default()));
    output
        .connect(SubscribeOptions::new(), full.clone() as Arc<Mutex<dyn Subscriber>>)
        .unwrap();
    output
        .connect(
            SubscribeOptions::builder().frame_rate_divisor(3).build().unwrap(),
            divided.clone() as Arc<Mutex<dyn Subscriber>>,
        )
        .unwrap();

    // Lock-step production: never more than one frame in flight, so no
    // frame is ever skipped and the divisor pattern is exact.
    for i in 1..=9u64 {
        produce(&output, i * 1_000);
        assert!(wait_until(|| seen(&full).len() == i as usize));
    }

    assert_eq!(seen(&full), (1..=9).map(|i| i * 1_000).collect::<Vec<_>>());
    assert_eq!(seen(&divided), vec![1_000, 4_000, 7_000]);

    output.close();
}

/// Every charged delivery is eventually served exactly once, whatever mix
/// of fresh slots and overrun charges a fast producer generates.
#[test]
fn test_charges_and_deliveries_balance() {
    let output = VideoOutput::open(options("program", 4)).unwrap();
    let recorder = Arc::new(Mutex::new(Recorder::default()));
    output
        .connect(SubscribeOptions::new(), recorder.clone() as Arc<Mutex<dyn Subscriber>>)
        .unwrap();

    let mut locked = 0u64;
    for i in 0..120u64 {
        if let Some(lock) = output.lock_frame(1, i) {
            locked += 1;
            drop(lock);
        }
    }

    assert!(wait_until(|| output.total_frames() == 120));
    assert_eq!(seen(&recorder).len(), 120);
    assert_eq!(output.skipped_frames(), 120 - locked);

    output.close();
}

/// Closing an output under a live producer joins the delivery thread
/// without wedging either side.
#[test]
fn test_close_under_a_live_producer() {
    let output = Arc::new(VideoOutput::open(options("live", 6)).unwrap());
    let recorder = Arc::new(Mutex::new(Recorder::default()));
    output
        .connect(SubscribeOptions::new(), recorder.clone() as Arc<Mutex<dyn Subscriber>>)
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let producer = thread::spawn({
        let output = Arc::clone(&output);
        let stop = Arc::clone(&stop);
        move || {
            let mut produced = 0u64;
            while !stop.load(Ordering::SeqCst) {
                if let Some(mut frame) = output.lock_frame(1, clock::now_ns()) {
                    frame.plane_mut(0).fill(0x11);
                    produced += 1;
                }
                thread::sleep(Duration::from_micros(200));
            }
            produced
        }
    });

    assert!(wait_until(|| !seen(&recorder).is_empty()));
    thread::sleep(Duration::from_millis(10));

    // Close while the producer is still pumping; it keeps locking slots
    // and is simply never drained again.
    output.close();
    assert!(output.stopped());

    stop.store(true, Ordering::SeqCst);
    let produced = producer.join().unwrap();
    assert!(produced > 0);
    assert!(!seen(&recorder).is_empty());

    // A second close is a no-op.
    output.close();
}
