//! Presence state machine.
//!
//! Consumes one "employee detected" bit per frame and debounces absences:
//! an absence is confirmed only after it has lasted at least the configured
//! threshold, and is reported once per absence.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresencePhase {
    /// No frame classified yet in this session.
    Unobserved,
    Present,
    /// Absent, threshold not reached.
    AbsentPending,
    /// Absent, absence event already emitted.
    AbsentConfirmed,
}

impl PresencePhase {
    pub fn is_absent(self) -> bool {
        matches!(self, PresencePhase::AbsentPending | PresencePhase::AbsentConfirmed)
    }
}

/// Discrete transitions worth journaling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceEvent {
    Returned { after: Duration },
    AbsenceConfirmed { elapsed: Duration },
}

impl fmt::Display for PresenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceEvent::Returned { after } => write!(
                f,
                "Employee returned after {:.1} seconds",
                after.as_secs_f64()
            ),
            PresenceEvent::AbsenceConfirmed { .. } => f.write_str("Employee absence detected"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PresenceStateMachine {
    threshold: Duration,
    phase: PresencePhase,
    absence_started: Option<Instant>,
    last_present: Option<Instant>,
}

impl PresenceStateMachine {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            phase: PresencePhase::Unobserved,
            absence_started: None,
            last_present: None,
        }
    }

    /// Advance with the classifier output for the frame captured at `now`.
    pub fn observe(&mut self, detected: bool, now: Instant) -> Option<PresenceEvent> {
        if detected {
            self.last_present = Some(now);
            let event = match (self.phase, self.absence_started) {
                (phase, Some(started)) if phase.is_absent() => Some(PresenceEvent::Returned {
                    after: now.saturating_duration_since(started),
                }),
                _ => None,
            };
            self.phase = PresencePhase::Present;
            self.absence_started = None;
            return event;
        }

        match self.phase {
            // The absence clock only runs once the employee has been seen.
            PresencePhase::Unobserved => None,
            PresencePhase::Present => {
                self.phase = PresencePhase::AbsentPending;
                self.absence_started = Some(now);
                None
            }
            PresencePhase::AbsentPending => {
                let elapsed = self.absence_duration(now).unwrap_or_default();
                if elapsed >= self.threshold {
                    self.phase = PresencePhase::AbsentConfirmed;
                    Some(PresenceEvent::AbsenceConfirmed { elapsed })
                } else {
                    None
                }
            }
            PresencePhase::AbsentConfirmed => None,
        }
    }

    pub fn phase(&self) -> PresencePhase {
        self.phase
    }

    pub fn is_present(&self) -> bool {
        self.phase == PresencePhase::Present
    }

    pub fn absence_confirmed(&self) -> bool {
        self.phase == PresencePhase::AbsentConfirmed
    }

    /// Time since the current absence began, if absent.
    pub fn absence_duration(&self, now: Instant) -> Option<Duration> {
        self.absence_started
            .map(|started| now.saturating_duration_since(started))
    }

    /// When the current absence began, if absent.
    pub fn absence_started(&self) -> Option<Instant> {
        self.absence_started
    }

    pub fn last_present(&self) -> Option<Instant> {
        self.last_present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(inputs: &[bool], threshold_secs: u64) -> Vec<(usize, PresenceEvent)> {
        let base = Instant::now();
        let mut machine = PresenceStateMachine::new(Duration::from_secs(threshold_secs));
        inputs
            .iter()
            .enumerate()
            .filter_map(|(i, &detected)| {
                machine
                    .observe(detected, base + Duration::from_secs(i as u64))
                    .map(|event| (i, event))
            })
            .collect()
    }

    #[test]
    fn absence_confirmed_once_then_return_reported() {
        let events = run(&[true, true, false, false, false, false, true], 3);
        assert_eq!(
            events,
            vec![
                (
                    5,
                    PresenceEvent::AbsenceConfirmed {
                        elapsed: Duration::from_secs(3)
                    }
                ),
                (
                    6,
                    PresenceEvent::Returned {
                        after: Duration::from_secs(4)
                    }
                ),
            ]
        );
    }

    #[test]
    fn confirmation_is_not_repeated() {
        let events = run(&[true, false, false, false, false, false, false, false], 2);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], (3, PresenceEvent::AbsenceConfirmed { .. })));
    }

    #[test]
    fn short_absence_returns_without_confirmation() {
        let events = run(&[true, false, true], 5);
        assert_eq!(
            events,
            vec![(
                2,
                PresenceEvent::Returned {
                    after: Duration::from_secs(1)
                }
            )]
        );
    }

    #[test]
    fn empty_desk_before_first_sighting_is_not_an_absence() {
        assert_eq!(run(&[false, false, false, false, false, true], 3), vec![]);

        let base = Instant::now();
        let mut machine = PresenceStateMachine::new(Duration::from_secs(2));
        assert_eq!(machine.observe(false, base), None);
        assert_eq!(machine.observe(false, base + Duration::from_secs(5)), None);
        assert_eq!(machine.phase(), PresencePhase::Unobserved);
        assert_eq!(machine.absence_duration(base + Duration::from_secs(5)), None);
        assert!(!machine.is_present());
    }

    #[test]
    fn absence_clock_starts_after_first_sighting() {
        let base = Instant::now();
        let mut machine = PresenceStateMachine::new(Duration::from_secs(2));
        machine.observe(false, base);
        machine.observe(true, base + Duration::from_secs(1));
        assert_eq!(machine.observe(false, base + Duration::from_secs(2)), None);
        assert_eq!(machine.phase(), PresencePhase::AbsentPending);
        assert_eq!(
            machine.absence_duration(base + Duration::from_millis(3500)),
            Some(Duration::from_millis(1500))
        );
        let event = machine.observe(false, base + Duration::from_secs(4));
        assert!(matches!(event, Some(PresenceEvent::AbsenceConfirmed { .. })));
        assert!(machine.absence_confirmed());
    }

    #[test]
    fn first_present_frame_emits_nothing() {
        let base = Instant::now();
        let mut machine = PresenceStateMachine::new(Duration::from_secs(2));
        assert_eq!(machine.observe(true, base), None);
        assert!(machine.is_present());
        assert_eq!(machine.absence_duration(base), None);
        assert_eq!(machine.last_present(), Some(base));
    }

    #[test]
    fn duration_keeps_growing_after_confirmation() {
        let base = Instant::now();
        let mut machine = PresenceStateMachine::new(Duration::from_secs(1));
        machine.observe(true, base);
        machine.observe(false, base);
        machine.observe(false, base + Duration::from_secs(1));
        machine.observe(false, base + Duration::from_secs(10));
        assert_eq!(
            machine.absence_duration(base + Duration::from_secs(10)),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn event_messages_match_journal_format() {
        let returned = PresenceEvent::Returned {
            after: Duration::from_millis(4300),
        };
        assert_eq!(returned.to_string(), "Employee returned after 4.3 seconds");
        let absent = PresenceEvent::AbsenceConfirmed {
            elapsed: Duration::from_secs(3),
        };
        assert_eq!(absent.to_string(), "Employee absence detected");
    }
}
