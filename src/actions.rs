//! Deferred, sample-accurate control actions.
//!
//! Volume and mute controls are called from UI or scripting threads, but
//! applying them at an audio buffer boundary produces an audible click. Each
//! control call instead appends an [`Action`] stamped with the wall-clock
//! time of the call; the audio render path converts those timestamps into
//! sample offsets inside the window being rendered and builds a per-sample
//! gain curve, so the change lands on the exact sample it was requested.

use crate::clock;

fn close_float(a: f32, b: f32, epsilon: f32) -> bool {
    (a - b).abs() <= epsilon
}

/// What a deferred control change does when it is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActionKind {
    SetVolume(f32),
    SetMuted(bool),
    PushToTalk(bool),
    PushToMute(bool),
}

/// One deferred control change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Action {
    /// Wall-clock time of the originating call, nanoseconds.
    pub timestamp: u64,
    pub kind: ActionKind,
}

/// The gating state the gain computation runs against.
///
/// `volume`/`muted` here are the *render-side* values; they trail the
/// immediately-readable requested values on the source until the queue
/// catches up.
#[derive(Debug, Clone)]
pub struct VolumeState {
    pub volume: f32,
    pub muted: bool,
    /// A disabled source renders silence regardless of volume.
    pub enabled: bool,
    pub push_to_talk_enabled: bool,
    pub push_to_talk_pressed: bool,
    pub push_to_talk_delay_ns: u64,
    push_to_talk_stop_time: u64,
    pub push_to_mute_enabled: bool,
    pub push_to_mute_pressed: bool,
    pub push_to_mute_delay_ns: u64,
    push_to_mute_stop_time: u64,
}

impl Default for VolumeState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
            enabled: true,
            push_to_talk_enabled: false,
            push_to_talk_pressed: false,
            push_to_talk_delay_ns: 0,
            push_to_talk_stop_time: 0,
            push_to_mute_enabled: false,
            push_to_mute_pressed: false,
            push_to_mute_delay_ns: 0,
            push_to_mute_stop_time: 0,
        }
    }
}

impl VolumeState {
    /// The scalar gain at time `at_ns`.
    ///
    /// While a push-to-talk or push-to-mute key is held this also refreshes
    /// its release deadline, so the gate stays open for the configured
    /// delay after the key goes up.
    pub fn current_gain(&mut self, at_ns: u64) -> f32 {
        if self.push_to_mute_enabled && self.push_to_mute_pressed {
            self.push_to_mute_stop_time = at_ns + self.push_to_mute_delay_ns;
        }
        if self.push_to_talk_enabled && self.push_to_talk_pressed {
            self.push_to_talk_stop_time = at_ns + self.push_to_talk_delay_ns;
        }

        let push_to_mute_active = self.push_to_mute_pressed || at_ns < self.push_to_mute_stop_time;
        let push_to_talk_active = self.push_to_talk_pressed || at_ns < self.push_to_talk_stop_time;

        let muted = !self.enabled
            || self.muted
            || (self.push_to_mute_enabled && push_to_mute_active)
            || (self.push_to_talk_enabled && !push_to_talk_active);

        if muted || close_float(self.volume, 0.0, 0.0001) {
            return 0.0;
        }
        if close_float(self.volume, 1.0, 0.0001) {
            return 1.0;
        }
        self.volume
    }

    /// Applies one action's state change.
    pub fn apply(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::SetVolume(vol) => self.volume = vol,
            ActionKind::SetMuted(muted) => self.muted = muted,
            ActionKind::PushToTalk(pressed) => self.push_to_talk_pressed = pressed,
            ActionKind::PushToMute(pressed) => self.push_to_mute_pressed = pressed,
        }
    }
}

/// Timestamp-ordered queue of pending control actions.
#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: Vec<Action>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an action stamped now.
    pub fn push_now(&mut self, kind: ActionKind) {
        self.push(Action {
            timestamp: clock::now_ns(),
            kind,
        });
    }

    /// Inserts an action in timestamp order.
    ///
    /// Calls arrive pre-sorted in practice (the wall clock is monotonic),
    /// but racing control threads may interleave; equal timestamps keep
    /// arrival order.
    pub fn push(&mut self, action: Action) {
        let at = self
            .actions
            .partition_point(|queued| queued.timestamp <= action.timestamp);
        self.actions.insert(at, action);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Whether any queued action lands inside the given window.
    #[must_use]
    pub fn has_action_before(&self, deadline_ns: u64) -> bool {
        self.actions
            .first()
            .is_some_and(|action| action.timestamp < deadline_ns)
    }

    /// Discards all pending actions.
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Builds the per-sample gain curve for one render window.
    ///
    /// `curve.len()` is the window size in frames. Every queued action whose
    /// offset lands inside the window is consumed exactly once: samples
    /// before its offset keep the previous gain, samples from the offset on
    /// use the updated gain. Actions stamped before the window start clamp
    /// to offset 0; actions beyond the window stay queued for a later
    /// window. Returns the number of actions consumed.
    pub fn fill_gain_curve(
        &mut self,
        state: &mut VolumeState,
        window_start_ns: u64,
        sample_rate: u32,
        curve: &mut [f32],
    ) -> usize {
        let mut cur_gain = state.current_gain(window_start_ns);
        let mut frame = 0usize;
        let mut consumed = 0usize;

        while let Some(action) = self.actions.first().copied() {
            let timestamp = action.timestamp.max(window_start_ns);
            let offset = clock::ns_to_frames(timestamp - window_start_ns, sample_rate) as usize;
            if offset >= curve.len() {
                break;
            }

            self.actions.remove(0);
            consumed += 1;

            while frame < offset {
                curve[frame] = cur_gain;
                frame += 1;
            }

            state.apply(action.kind);
            cur_gain = state.current_gain(timestamp);
        }

        while frame < curve.len() {
            curve[frame] = cur_gain;
            frame += 1;
        }

        consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48_000;

    fn ts_of_frame(window_start: u64, frame: u64) -> u64 {
        window_start + clock::frames_to_ns(frame, RATE)
    }

    #[test]
    fn empty_queue_fills_constant_gain() {
        let mut queue = ActionQueue::new();
        let mut state = VolumeState {
            volume: 0.5,
            ..VolumeState::default()
        };
        let mut curve = [0.0f32; 64];
        let consumed = queue.fill_gain_curve(&mut state, 1_000, RATE, &mut curve);
        assert_eq!(consumed, 0);
        assert!(curve.iter().all(|&g| g == 0.5));
    }

    #[test]
    fn single_action_splits_window_at_offset() {
        let window_start = 5_000_000;
        let mut queue = ActionQueue::new();
        queue.push(Action {
            timestamp: ts_of_frame(window_start, 50),
            kind: ActionKind::SetMuted(true),
        });

        let mut state = VolumeState::default();
        let mut curve = [f32::NAN; 100];
        let consumed = queue.fill_gain_curve(&mut state, window_start, RATE, &mut curve);

        assert_eq!(consumed, 1);
        assert!(curve[..50].iter().all(|&g| g == 1.0));
        assert!(curve[50..].iter().all(|&g| g == 0.0));
        assert!(queue.is_empty());
    }

    #[test]
    fn action_before_window_clamps_to_start() {
        let window_start = 10_000_000;
        let mut queue = ActionQueue::new();
        queue.push(Action {
            timestamp: window_start - 3_000,
            kind: ActionKind::SetVolume(0.25),
        });

        let mut state = VolumeState::default();
        let mut curve = [0.0f32; 32];
        queue.fill_gain_curve(&mut state, window_start, RATE, &mut curve);
        assert!(curve.iter().all(|&g| g == 0.25));
    }

    #[test]
    fn action_past_window_stays_queued() {
        let window_start = 0;
        let mut queue = ActionQueue::new();
        queue.push(Action {
            timestamp: ts_of_frame(window_start, 200),
            kind: ActionKind::SetMuted(true),
        });

        let mut state = VolumeState::default();
        let mut curve = [0.0f32; 100];
        let consumed = queue.fill_gain_curve(&mut state, window_start, RATE, &mut curve);
        assert_eq!(consumed, 0);
        assert_eq!(queue.len(), 1);
        assert!(curve.iter().all(|&g| g == 1.0));
    }

    #[test]
    fn multiple_actions_apply_in_timestamp_order() {
        let window_start = 0;
        let mut queue = ActionQueue::new();
        // Inserted out of order on purpose.
        queue.push(Action {
            timestamp: ts_of_frame(window_start, 60),
            kind: ActionKind::SetVolume(0.2),
        });
        queue.push(Action {
            timestamp: ts_of_frame(window_start, 20),
            kind: ActionKind::SetVolume(0.8),
        });

        let mut state = VolumeState::default();
        let mut curve = [0.0f32; 100];
        queue.fill_gain_curve(&mut state, window_start, RATE, &mut curve);

        assert!(curve[..20].iter().all(|&g| g == 1.0));
        assert!(curve[20..60].iter().all(|&g| g == 0.8));
        assert!(curve[60..].iter().all(|&g| g == 0.2));
    }

    #[test]
    fn push_to_talk_gates_until_pressed() {
        let mut state = VolumeState {
            push_to_talk_enabled: true,
            ..VolumeState::default()
        };
        assert_eq!(state.current_gain(1_000), 0.0);

        state.push_to_talk_pressed = true;
        assert_eq!(state.current_gain(2_000), 1.0);
    }

    #[test]
    fn push_to_talk_release_holds_for_delay() {
        let mut state = VolumeState {
            push_to_talk_enabled: true,
            push_to_talk_pressed: true,
            push_to_talk_delay_ns: 500,
            ..VolumeState::default()
        };
        // Pressed at t=1000 arms the release deadline at 1500.
        assert_eq!(state.current_gain(1_000), 1.0);

        state.push_to_talk_pressed = false;
        assert_eq!(state.current_gain(1_400), 1.0);
        assert_eq!(state.current_gain(1_600), 0.0);
    }

    #[test]
    fn near_zero_and_near_unity_volumes_snap() {
        let mut state = VolumeState {
            volume: 0.00005,
            ..VolumeState::default()
        };
        assert_eq!(state.current_gain(0), 0.0);

        state.volume = 0.99995;
        assert_eq!(state.current_gain(0), 1.0);

        state.volume = 0.5;
        assert_eq!(state.current_gain(0), 0.5);
    }

    #[test]
    fn disabled_source_renders_silent() {
        let mut state = VolumeState {
            enabled: false,
            ..VolumeState::default()
        };
        assert_eq!(state.current_gain(0), 0.0);
    }
}
