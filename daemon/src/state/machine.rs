//! Tap/hold disambiguation
//!
//! The target key already sends Super at the layout level, so holding it
//! needs nothing from us. This machine only decides when a press/release
//! of the target looked like a tap and the original character must be
//! typed as well: released within the timeout, with no other key, button
//! or modifier involved while it was down. Modifiers are tracked in every
//! phase, so one held before the target also blocks the tap.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::keyboard::{EventKind, InputEvent, KeyCode, Role, RoleSet};

/// Phase of the target key, derived from `held`/`interrupted`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Target is up
    Idle,
    /// Target is down and nothing else happened yet
    Armed,
    /// Target is down and is being used as a modifier
    Combo,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Armed => write!(f, "Armed"),
            Phase::Combo => write!(f, "Combo"),
        }
    }
}

/// Transient state of the target key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TapState {
    /// Target is down
    pub held: bool,
    /// Set exactly while `held`
    pub pressed_at: Option<Instant>,
    /// Something else happened since the press; sticky until release
    pub interrupted: bool,
    /// Some modifier key is currently down
    pub modifier_active: bool,
}

impl TapState {
    pub fn phase(&self) -> Phase {
        match (self.held, self.interrupted) {
            (false, _) => Phase::Idle,
            (true, false) => Phase::Armed,
            (true, true) => Phase::Combo,
        }
    }
}

/// What the caller has to do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Type the original character through the tap key
    InjectTap,
}

/// The disambiguation state machine. Total over every phase and event.
pub struct TapMachine {
    roles: RoleSet,
    timeout_ms: u64,
    /// Fire the tap as soon as Super is pressed while armed
    eager_super: bool,
    state: TapState,
    /// Modifier keys currently down, by keycode
    modifiers_down: [bool; 256],
}

impl TapMachine {
    pub fn new(roles: RoleSet, timeout: Duration, eager_super: bool) -> Self {
        Self {
            roles,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            eager_super,
            state: TapState::default(),
            modifiers_down: [false; 256],
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Process one classified event
    pub fn process(&mut self, event: &InputEvent) -> Option<Action> {
        let role = match event.kind {
            EventKind::PointerDown => None,
            EventKind::KeyDown | EventKind::KeyUp => Some(self.roles.role(event.code)),
        };
        let before = self.state;

        let action = match (event.kind, role) {
            (EventKind::KeyDown, Some(role)) => self.on_key_down(role, event.code, event.at),
            (EventKind::KeyUp, Some(role)) => self.on_key_up(role, event.code, event.at),
            _ => self.on_pointer_down(),
        };

        debug!(
            kind = %event.kind,
            code = event.code,
            role = %role.map_or_else(|| "Pointer".to_string(), |r| r.to_string()),
            from = %before.phase(),
            to = %self.state.phase(),
            modifier = self.state.modifier_active,
            "event processed"
        );

        action
    }

    fn on_key_down(&mut self, role: Role, code: KeyCode, at: Instant) -> Option<Action> {
        match (self.phase(), role) {
            (_, Role::Modifier) => {
                self.set_modifier(code, true);
                None
            }
            (Phase::Idle, Role::Target) => {
                self.state = TapState {
                    held: true,
                    pressed_at: Some(at),
                    interrupted: false,
                    modifier_active: self.state.modifier_active,
                };
                None
            }
            // Nothing armed to interrupt; a repeated target press keeps
            // the first press time.
            (Phase::Idle, _) | (_, Role::Target) => None,
            (Phase::Armed, Role::Super) if self.eager_super => {
                self.state.interrupted = true;
                debug!("super pressed while armed, firing tap now");
                Some(Action::InjectTap)
            }
            (_, Role::Super | Role::Other) => {
                self.state.interrupted = true;
                None
            }
        }
    }

    fn on_key_up(&mut self, role: Role, code: KeyCode, at: Instant) -> Option<Action> {
        match role {
            // A modifier released during the hold was co-held with the
            // target; its release must not re-arm the tap.
            Role::Modifier => {
                self.set_modifier(code, false);
                if self.state.held {
                    self.state.interrupted = true;
                }
                None
            }
            Role::Target if self.state.held => {
                let tap = self.phase() == Phase::Armed
                    && !self.state.modifier_active
                    && self.released_in_time(at);
                self.state = TapState {
                    modifier_active: self.state.modifier_active,
                    ..TapState::default()
                };
                tap.then_some(Action::InjectTap)
            }
            Role::Target | Role::Super | Role::Other => None,
        }
    }

    fn set_modifier(&mut self, code: KeyCode, down: bool) {
        self.modifiers_down[usize::from(code)] = down;
        self.state.modifier_active = self.modifiers_down.contains(&true);
    }

    fn on_pointer_down(&mut self) -> Option<Action> {
        if self.state.held {
            self.state.interrupted = true;
        }
        None
    }

    /// Held duration is within the timeout, inclusive, in whole milliseconds.
    /// A release that precedes the press counts as too late.
    fn released_in_time(&self, released_at: Instant) -> bool {
        let Some(pressed_at) = self.state.pressed_at else {
            return false;
        };
        match released_at.checked_duration_since(pressed_at) {
            Some(held) => {
                let held_ms = held.as_millis();
                debug!(held_ms = %held_ms, limit_ms = self.timeout_ms, "target released alone");
                held_ms <= u128::from(self.timeout_ms)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: u8 = 65;
    const SHIFT: u8 = 50;
    const CTRL: u8 = 37;
    const SUPER: u8 = 133;
    const LETTER: u8 = 38;

    fn roles() -> RoleSet {
        RoleSet::classify(TARGET, 8..=255, |code| match code {
            SHIFT => 0xffe1,
            CTRL => 0xffe3,
            SUPER => 0xffeb,
            TARGET => 0xffeb,
            LETTER => 0x0061,
            _ => 0,
        })
    }

    fn create_machine() -> TapMachine {
        TapMachine::new(roles(), Duration::from_millis(500), true)
    }

    fn ms(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    /// Feed events and count requested taps
    fn run(machine: &mut TapMachine, events: &[InputEvent]) -> usize {
        events
            .iter()
            .filter_map(|event| machine.process(event))
            .filter(|action| *action == Action::InjectTap)
            .count()
    }

    #[test]
    fn test_initial_state() {
        let sm = create_machine();
        assert_eq!(sm.phase(), Phase::Idle);
        assert_eq!(sm.state, TapState::default());
    }

    #[test]
    fn test_tap_within_timeout() {
        let t0 = Instant::now();
        for d in [0, 1, 250, 499, 500] {
            let mut sm = create_machine();
            let taps = run(
                &mut sm,
                &[InputEvent::key_down(TARGET, t0), InputEvent::key_up(TARGET, ms(t0, d))],
            );
            assert_eq!(taps, 1, "hold of {d} ms should tap");
            assert_eq!(sm.phase(), Phase::Idle);
        }
    }

    #[test]
    fn test_timeout_counts_whole_milliseconds() {
        let t0 = Instant::now();
        let mut sm = create_machine();
        let release = t0 + Duration::from_micros(500_900);
        let taps = run(
            &mut sm,
            &[InputEvent::key_down(TARGET, t0), InputEvent::key_up(TARGET, release)],
        );
        assert_eq!(taps, 1);
    }

    #[test]
    fn test_no_tap_after_timeout() {
        let t0 = Instant::now();
        for d in [501, 600, 5_000] {
            let mut sm = create_machine();
            let taps = run(
                &mut sm,
                &[InputEvent::key_down(TARGET, t0), InputEvent::key_up(TARGET, ms(t0, d))],
            );
            assert_eq!(taps, 0, "hold of {d} ms should not tap");
            assert_eq!(sm.phase(), Phase::Idle);
        }
    }

    #[test]
    fn test_interruption_is_sticky() {
        let t0 = Instant::now();
        let mut sm = create_machine();

        sm.process(&InputEvent::key_down(TARGET, t0));
        assert_eq!(sm.phase(), Phase::Armed);

        sm.process(&InputEvent::key_down(LETTER, ms(t0, 10)));
        assert_eq!(sm.phase(), Phase::Combo);

        sm.process(&InputEvent::key_up(LETTER, ms(t0, 20)));
        assert_eq!(sm.phase(), Phase::Combo);

        assert_eq!(sm.process(&InputEvent::key_up(TARGET, ms(t0, 30))), None);
        assert_eq!(sm.phase(), Phase::Idle);
    }

    #[test]
    fn test_pointer_press_interrupts() {
        let t0 = Instant::now();
        let mut sm = create_machine();
        let taps = run(
            &mut sm,
            &[
                InputEvent::key_down(TARGET, t0),
                InputEvent::pointer_down(1, ms(t0, 50)),
                InputEvent::key_up(TARGET, ms(t0, 100)),
            ],
        );
        assert_eq!(taps, 0);
    }

    #[test]
    fn test_modifier_suppresses_tap() {
        let t0 = Instant::now();
        let mut sm = create_machine();

        sm.process(&InputEvent::key_down(TARGET, t0));
        sm.process(&InputEvent::key_down(SHIFT, ms(t0, 10)));
        assert_eq!(sm.phase(), Phase::Armed);
        assert!(sm.state.modifier_active);

        assert_eq!(sm.process(&InputEvent::key_up(TARGET, ms(t0, 20))), None);
        assert_eq!(sm.phase(), Phase::Idle);
        assert!(sm.state.modifier_active);

        sm.process(&InputEvent::key_up(SHIFT, ms(t0, 30)));
        assert_eq!(sm.state, TapState::default());
    }

    #[test]
    fn test_modifier_release_does_not_rearm() {
        let t0 = Instant::now();
        let mut sm = create_machine();

        sm.process(&InputEvent::key_down(TARGET, t0));
        sm.process(&InputEvent::key_down(SHIFT, ms(t0, 10)));
        sm.process(&InputEvent::key_up(SHIFT, ms(t0, 20)));
        assert!(!sm.state.modifier_active);
        assert_eq!(sm.phase(), Phase::Combo);

        assert_eq!(sm.process(&InputEvent::key_up(TARGET, ms(t0, 30))), None);
        assert_eq!(sm.state, TapState::default());
    }

    #[test]
    fn test_modifier_held_before_target_blocks_tap() {
        let t0 = Instant::now();
        let mut sm = create_machine();

        sm.process(&InputEvent::key_down(CTRL, t0));
        assert!(sm.state.modifier_active);
        assert_eq!(sm.phase(), Phase::Idle);

        sm.process(&InputEvent::key_down(TARGET, ms(t0, 10)));
        assert_eq!(sm.phase(), Phase::Armed);
        assert_eq!(sm.process(&InputEvent::key_up(TARGET, ms(t0, 60))), None);

        // Once the modifier is up, taps work again
        sm.process(&InputEvent::key_up(CTRL, ms(t0, 100)));
        assert_eq!(sm.state, TapState::default());
        let taps = run(
            &mut sm,
            &[
                InputEvent::key_down(TARGET, ms(t0, 200)),
                InputEvent::key_up(TARGET, ms(t0, 250)),
            ],
        );
        assert_eq!(taps, 1);
    }

    #[test]
    fn test_modifier_tracked_per_keycode() {
        let t0 = Instant::now();
        let mut sm = create_machine();
        let taps = run(
            &mut sm,
            &[
                InputEvent::key_down(SHIFT, t0),
                InputEvent::key_down(CTRL, t0),
                // Autorepeat of a held modifier
                InputEvent::key_down(SHIFT, ms(t0, 5)),
                InputEvent::key_up(SHIFT, ms(t0, 10)),
                InputEvent::key_down(TARGET, ms(t0, 20)),
                InputEvent::key_up(TARGET, ms(t0, 40)),
            ],
        );
        assert_eq!(taps, 0);
        assert!(sm.state.modifier_active);

        sm.process(&InputEvent::key_up(CTRL, ms(t0, 50)));
        assert!(!sm.state.modifier_active);
    }

    #[test]
    fn test_super_release_during_hold_is_ignored() {
        // Super held before the target, released while the target is down
        let t0 = Instant::now();
        let mut sm = create_machine();
        let taps = run(
            &mut sm,
            &[
                InputEvent::key_down(SUPER, t0),
                InputEvent::key_down(TARGET, ms(t0, 10)),
                InputEvent::key_up(SUPER, ms(t0, 20)),
                InputEvent::key_up(TARGET, ms(t0, 30)),
            ],
        );
        assert_eq!(taps, 1);
    }

    #[test]
    fn test_modifier_down_then_other_never_taps() {
        // A modifier co-held and an interrupting key both count.
        let t0 = Instant::now();
        let mut sm = create_machine();
        let taps = run(
            &mut sm,
            &[
                InputEvent::key_down(TARGET, t0),
                InputEvent::key_down(SHIFT, ms(t0, 5)),
                InputEvent::key_down(LETTER, ms(t0, 10)),
                InputEvent::key_up(LETTER, ms(t0, 15)),
                InputEvent::key_up(SHIFT, ms(t0, 20)),
                InputEvent::key_up(TARGET, ms(t0, 25)),
            ],
        );
        assert_eq!(taps, 0);
    }

    #[test]
    fn test_eager_super_fires_once() {
        let t0 = Instant::now();
        let mut sm = create_machine();

        sm.process(&InputEvent::key_down(TARGET, t0));
        assert_eq!(
            sm.process(&InputEvent::key_down(SUPER, ms(t0, 10))),
            Some(Action::InjectTap)
        );
        assert_eq!(sm.phase(), Phase::Combo);

        // Already in combo: no second fire, no tap on release
        assert_eq!(sm.process(&InputEvent::key_down(SUPER, ms(t0, 20))), None);
        assert_eq!(sm.process(&InputEvent::key_up(TARGET, ms(t0, 30))), None);
    }

    #[test]
    fn test_super_interrupts_when_not_eager() {
        let t0 = Instant::now();
        let mut sm = TapMachine::new(roles(), Duration::from_millis(500), false);
        let taps = run(
            &mut sm,
            &[
                InputEvent::key_down(TARGET, t0),
                InputEvent::key_down(SUPER, ms(t0, 10)),
                InputEvent::key_up(SUPER, ms(t0, 20)),
                InputEvent::key_up(TARGET, ms(t0, 30)),
            ],
        );
        assert_eq!(taps, 0);
    }

    #[test]
    fn test_idle_ignores_other_activity() {
        let t0 = Instant::now();
        let mut sm = create_machine();
        let taps = run(
            &mut sm,
            &[
                InputEvent::key_down(LETTER, t0),
                InputEvent::key_down(SHIFT, t0),
                InputEvent::key_down(SUPER, t0),
                InputEvent::pointer_down(3, t0),
                InputEvent::key_up(LETTER, t0),
                InputEvent::key_up(SHIFT, t0),
            ],
        );
        assert_eq!(taps, 0);
        assert_eq!(sm.state, TapState::default());
    }

    #[test]
    fn test_spurious_release_is_noop() {
        let t0 = Instant::now();
        let mut sm = create_machine();
        assert_eq!(sm.process(&InputEvent::key_up(TARGET, t0)), None);
        assert_eq!(sm.state, TapState::default());
    }

    #[test]
    fn test_release_before_press_counts_as_timeout() {
        let t0 = Instant::now();
        let mut sm = create_machine();
        sm.process(&InputEvent::key_down(TARGET, ms(t0, 100)));
        assert_eq!(sm.process(&InputEvent::key_up(TARGET, t0)), None);
        assert_eq!(sm.phase(), Phase::Idle);
    }

    #[test]
    fn test_autorepeat_keeps_first_press_time() {
        let t0 = Instant::now();
        let mut sm = create_machine();
        let taps = run(
            &mut sm,
            &[
                InputEvent::key_down(TARGET, t0),
                InputEvent::key_down(TARGET, ms(t0, 400)),
                InputEvent::key_down(TARGET, ms(t0, 450)),
                InputEvent::key_up(TARGET, ms(t0, 700)),
            ],
        );
        assert_eq!(taps, 0);
        assert_eq!(sm.state.pressed_at, None);
    }

    #[test]
    fn test_cycles_are_idempotent() {
        let t0 = Instant::now();
        let mut sm = create_machine();
        let idle = sm.state;

        let taps = run(
            &mut sm,
            &[
                InputEvent::key_down(TARGET, t0),
                InputEvent::key_up(TARGET, ms(t0, 100)),
                InputEvent::key_down(TARGET, ms(t0, 200)),
                InputEvent::key_down(LETTER, ms(t0, 210)),
                InputEvent::key_up(TARGET, ms(t0, 220)),
                InputEvent::key_down(TARGET, ms(t0, 300)),
                InputEvent::key_down(SHIFT, ms(t0, 310)),
                InputEvent::key_up(TARGET, ms(t0, 320)),
                InputEvent::key_up(SHIFT, ms(t0, 330)),
                InputEvent::key_down(TARGET, ms(t0, 400)),
                InputEvent::key_up(TARGET, ms(t0, 450)),
            ],
        );

        assert_eq!(taps, 2);
        assert_eq!(sm.state, idle);
    }
}
