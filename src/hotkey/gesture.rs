//! Edge-driven gesture recognizer.
//!
//! Turns keydown/keyup edges and timer expirations into trigger modes:
//!
//! ```text
//! Idle --keydown--> Pressed (arm long-press timer)
//!   Pressed --long-press timer--> Pressed, emit trigger(dictation)
//!   Pressed --keyup, short--> WaitingSecondPress (arm double-press timer)
//!   Pressed --keyup, long--> Idle, emit release
//!   WaitingSecondPress --keydown--> Idle, emit trigger(agent)
//!   WaitingSecondPress --double-press timer--> Idle, emit trigger(command)
//! ```
//!
//! The machine never sleeps or spawns. Callers pass the current instant in and
//! receive a [`Step`] describing which timer to cancel, which to arm and what
//! to emit. Timer ids are part of the state, so an expiration for a timer that
//! has since been replaced or cancelled is ignored.

use std::time::{Duration, Instant};

use voxagent_core::TriggerMode;

use super::HotkeyEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HotkeyState {
    #[default]
    Idle,
    Pressed,
    WaitingSecondPress,
}

/// Identifies one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    LongPress,
    DoublePress,
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    id: TimerId,
    kind: TimerKind,
}

/// Timing thresholds for gesture recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Holding at least this long is a long press
    pub long_press: Duration,
    /// A second press must land within this window after release
    pub double_press: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            long_press: Duration::from_millis(300),
            double_press: Duration::from_millis(300),
        }
    }
}

/// Side effects requested by one input to the machine.
#[derive(Debug, Default, PartialEq)]
pub struct Step {
    /// Timer to cancel before anything else
    pub cancel: Option<TimerId>,
    /// Timer to arm, with its delay
    pub arm: Option<(TimerId, Duration)>,
    /// Events to emit, in order
    pub events: Vec<HotkeyEvent>,
}

impl Step {
    fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
pub struct GestureMachine {
    thresholds: Thresholds,
    state: HotkeyState,
    /// Physical key state, used to swallow auto-repeat keydowns
    held: bool,
    pressed_at: Option<Instant>,
    dictation_emitted: bool,
    timer: Option<PendingTimer>,
    next_timer: u64,
}

impl GestureMachine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: HotkeyState::Idle,
            held: false,
            pressed_at: None,
            dictation_emitted: false,
            timer: None,
            next_timer: 0,
        }
    }

    pub fn state(&self) -> HotkeyState {
        self.state
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// The currently armed timer, if any.
    pub fn pending_timer(&self) -> Option<TimerId> {
        self.timer.map(|t| t.id)
    }

    pub fn key_down(&mut self, now: Instant) -> Step {
        if self.held {
            return Step::none();
        }
        self.held = true;

        match self.state {
            HotkeyState::Idle => {
                let mut step = Step::none();
                self.state = HotkeyState::Pressed;
                self.pressed_at = Some(now);
                self.dictation_emitted = false;
                self.arm(&mut step, TimerKind::LongPress, self.thresholds.long_press);
                step
            }
            HotkeyState::WaitingSecondPress => {
                let mut step = Step {
                    cancel: self.take_timer(),
                    ..Step::none()
                };
                self.state = HotkeyState::Idle;
                step.events.push(HotkeyEvent::Trigger(TriggerMode::Agent));
                step
            }
            // A keydown without a keyup in between
            HotkeyState::Pressed => Step::none(),
        }
    }

    pub fn key_up(&mut self, now: Instant) -> Step {
        self.held = false;

        if self.state != HotkeyState::Pressed {
            return Step::none();
        }

        let mut step = Step {
            cancel: self.take_timer(),
            ..Step::none()
        };
        let held_for = self
            .pressed_at
            .take()
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();

        if held_for < self.thresholds.long_press && !self.dictation_emitted {
            self.state = HotkeyState::WaitingSecondPress;
            self.arm(
                &mut step,
                TimerKind::DoublePress,
                self.thresholds.double_press,
            );
        } else {
            // The long-press timer may not have been serviced yet.
            if !self.dictation_emitted {
                step.events.push(HotkeyEvent::Trigger(TriggerMode::Dictation));
            }
            self.state = HotkeyState::Idle;
            self.dictation_emitted = false;
            step.events.push(HotkeyEvent::Release);
        }

        step
    }

    pub fn timer_fired(&mut self, id: TimerId) -> Step {
        let Some(timer) = self.timer.filter(|t| t.id == id) else {
            return Step::none();
        };
        self.timer = None;

        let mut step = Step::none();
        match (timer.kind, self.state) {
            (TimerKind::LongPress, HotkeyState::Pressed) => {
                self.dictation_emitted = true;
                step.events.push(HotkeyEvent::Trigger(TriggerMode::Dictation));
            }
            (TimerKind::DoublePress, HotkeyState::WaitingSecondPress) => {
                self.state = HotkeyState::Idle;
                step.events.push(HotkeyEvent::Trigger(TriggerMode::Command));
            }
            _ => {}
        }
        step
    }

    /// Forget any gesture in progress. Returns the timer that must be
    /// cancelled, if one was armed.
    pub fn reset(&mut self) -> Option<TimerId> {
        self.state = HotkeyState::Idle;
        self.held = false;
        self.pressed_at = None;
        self.dictation_emitted = false;
        self.take_timer()
    }

    fn arm(&mut self, step: &mut Step, kind: TimerKind, after: Duration) {
        if let Some(previous) = self.take_timer() {
            step.cancel.get_or_insert(previous);
        }
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        self.timer = Some(PendingTimer { id, kind });
        step.arm = Some((id, after));
    }

    fn take_timer(&mut self) -> Option<TimerId> {
        self.timer.take().map(|t| t.id)
    }
}

impl Default for GestureMachine {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn triggers(steps: &[&Step]) -> Vec<HotkeyEvent> {
        steps.iter().flat_map(|s| s.events.iter().copied()).collect()
    }

    #[test]
    fn test_long_press_is_dictation_then_release() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();

        let down = m.key_down(t0);
        let (timer, after) = down.arm.unwrap();
        assert_eq!(after, ms(300));
        assert_eq!(m.state(), HotkeyState::Pressed);

        let fired = m.timer_fired(timer);
        assert_eq!(m.state(), HotkeyState::Pressed);

        let up = m.key_up(t0 + ms(800));
        assert_eq!(up.arm, None);
        assert_eq!(m.state(), HotkeyState::Idle);
        assert_eq!(m.pending_timer(), None);

        assert_eq!(
            triggers(&[&down, &fired, &up]),
            vec![
                HotkeyEvent::Trigger(TriggerMode::Dictation),
                HotkeyEvent::Release
            ]
        );
    }

    #[test]
    fn test_short_press_is_command_after_window() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();

        let down = m.key_down(t0);
        let long_timer = down.arm.unwrap().0;
        let up = m.key_up(t0 + ms(100));
        assert_eq!(up.cancel, Some(long_timer));
        assert_eq!(m.state(), HotkeyState::WaitingSecondPress);

        let (dbl_timer, after) = up.arm.unwrap();
        assert_eq!(after, ms(300));

        let fired = m.timer_fired(dbl_timer);
        assert_eq!(m.state(), HotkeyState::Idle);
        assert_eq!(
            triggers(&[&down, &up, &fired]),
            vec![HotkeyEvent::Trigger(TriggerMode::Command)]
        );
    }

    #[test]
    fn test_double_press_is_agent() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();

        let first = m.key_down(t0);
        let up = m.key_up(t0 + ms(80));
        let dbl_timer = up.arm.unwrap().0;
        let second = m.key_down(t0 + ms(200));

        assert_eq!(second.cancel, Some(dbl_timer));
        assert_eq!(m.state(), HotkeyState::Idle);
        assert_eq!(m.pending_timer(), None);

        // The cancelled timer firing late must not emit anything.
        let late = m.timer_fired(dbl_timer);
        let release = m.key_up(t0 + ms(260));

        assert_eq!(
            triggers(&[&first, &up, &second, &late, &release]),
            vec![HotkeyEvent::Trigger(TriggerMode::Agent)]
        );
        assert_eq!(m.state(), HotkeyState::Idle);
    }

    #[test]
    fn test_stale_long_press_timer_is_ignored() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();

        let down = m.key_down(t0);
        let long_timer = down.arm.unwrap().0;
        m.key_up(t0 + ms(50));

        assert!(m.timer_fired(long_timer).events.is_empty());
        assert_eq!(m.state(), HotkeyState::WaitingSecondPress);
    }

    #[test]
    fn test_late_keyup_without_timer_still_triggers_once() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();

        m.key_down(t0);
        let up = m.key_up(t0 + ms(500));

        assert_eq!(
            up.events,
            vec![
                HotkeyEvent::Trigger(TriggerMode::Dictation),
                HotkeyEvent::Release
            ]
        );
        assert_eq!(m.state(), HotkeyState::Idle);
    }

    #[test]
    fn test_auto_repeat_keydown_is_ignored() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();

        m.key_down(t0);
        let repeat = m.key_down(t0 + ms(30));
        assert_eq!(repeat, Step::default());
        assert_eq!(m.state(), HotkeyState::Pressed);
    }

    #[test]
    fn test_stray_keyup_is_ignored() {
        let mut m = GestureMachine::default();
        assert_eq!(m.key_up(Instant::now()), Step::default());
        assert_eq!(m.state(), HotkeyState::Idle);
    }

    #[test]
    fn test_reset_cancels_pending_timer() {
        let mut m = GestureMachine::default();
        let t0 = Instant::now();

        let timer = m.key_down(t0).arm.unwrap().0;
        assert_eq!(m.reset(), Some(timer));
        assert_eq!(m.state(), HotkeyState::Idle);
        assert!(m.timer_fired(timer).events.is_empty());
        assert_eq!(m.reset(), None);
    }

    #[test]
    fn test_every_gesture_shape_triggers_once_and_returns_to_idle() {
        // (hold ms, gap ms before optional second press, second press)
        let shapes: [(u64, Option<u64>); 6] = [
            (10, None),
            (299, None),
            (300, None),
            (1200, None),
            (50, Some(10)),
            (50, Some(299)),
        ];

        for (hold, second) in shapes {
            let mut m = GestureMachine::default();
            let t0 = Instant::now();
            let mut events = Vec::new();

            let down = m.key_down(t0);
            let long_timer = down.arm.unwrap().0;
            if hold >= 300 {
                events.extend(m.timer_fired(long_timer).events);
            }
            let up = m.key_up(t0 + ms(hold));
            events.extend(up.events.iter().copied());

            match (second, up.arm) {
                (Some(gap), Some(_)) => {
                    let t = t0 + ms(hold + gap);
                    events.extend(m.key_down(t).events);
                    events.extend(m.key_up(t + ms(40)).events);
                }
                (None, Some((dbl_timer, _))) => events.extend(m.timer_fired(dbl_timer).events),
                _ => {}
            }

            let trigger_count = events
                .iter()
                .filter(|e| matches!(e, HotkeyEvent::Trigger(_)))
                .count();
            assert_eq!(trigger_count, 1, "hold {hold} second {second:?}: {events:?}");
            assert_eq!(m.state(), HotkeyState::Idle, "hold {hold} second {second:?}");
        }
    }
}
