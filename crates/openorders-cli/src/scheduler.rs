//! Time-of-day trigger loop
//!
//! The scheduler computes the next due trigger, sleeps until it (waking on
//! heartbeat boundaries to log progress) and hands the trigger to the
//! pipeline. It returns after the terminal trigger has run.
//!
//! ## Missed triggers
//!
//! A trigger is on time when the scheduler observes it at most `grace_secs`
//! whole seconds after its due instant; the sub-second overshoot of a real
//! sleep never counts. A later observation (host suspended, clock jump,
//! a long previous run) is a miss:
//!
//! - `skip`: the trigger moves to the next day
//! - `catch-up`: the trigger fires late, with the late instant as its as-of
//!
//! At startup, a trigger whose time has already passed today (beyond the
//! grace window) is simply due tomorrow; it is not a miss.

use chrono::{Duration, Local, NaiveDateTime, NaiveTime, Timelike};
use openorders_core::{MissedPolicy, RunContext, ScheduleConfig, TriggerConfig};
use tracing::{debug, info, warn};

// ============================================================================
// Clock
// ============================================================================

/// Source of wall-clock time
pub trait Clock {
    fn now(&self) -> NaiveDateTime;

    /// Block until `instant` (returns immediately if it has passed)
    fn sleep_until(&self, instant: NaiveDateTime);
}

/// Local wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep_until(&self, instant: NaiveDateTime) {
        if let Ok(wait) = (instant - self.now()).to_std() {
            std::thread::sleep(wait);
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Counters of one scheduler run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fired: usize,
    pub missed: usize,
    pub heartbeats: usize,
}

pub struct Scheduler<'a, C> {
    schedule: &'a ScheduleConfig,
    clock: C,
}

impl<'a, C: Clock> Scheduler<'a, C> {
    pub fn new(schedule: &'a ScheduleConfig, clock: C) -> Self {
        Self { schedule, clock }
    }

    /// Run until the terminal trigger has fired, or until `fire` fails.
    ///
    /// `fire` receives each due trigger with the run context captured at the
    /// moment it fired.
    pub fn run<F, E>(&self, mut fire: F) -> Result<RunSummary, E>
    where
        F: FnMut(&TriggerConfig, RunContext) -> Result<(), E>,
    {
        let mut summary = RunSummary::default();
        let start = self.clock.now();
        let mut due: Vec<NaiveDateTime> = self
            .schedule
            .triggers
            .iter()
            .map(|t| self.first_due(t, start))
            .collect();

        debug!("Scheduler started at {start}");

        loop {
            let Some(idx) = next_index(&due) else {
                return Ok(summary);
            };
            let trigger = &self.schedule.triggers[idx];
            let at = due[idx];

            summary.heartbeats += self.wait_until(at);

            let now = self.clock.now();
            let late_by = now - at;
            if self.is_late(late_by) {
                summary.missed += 1;
                match self.schedule.missed {
                    MissedPolicy::Skip => {
                        warn!(
                            "Trigger '{}' due at {at} missed by {}s, skipping until tomorrow",
                            trigger.label,
                            late_by.num_seconds()
                        );
                        due[idx] = at + Duration::days(1);
                        continue;
                    }
                    MissedPolicy::CatchUp => {
                        warn!(
                            "Trigger '{}' due at {at} missed by {}s, running now",
                            trigger.label,
                            late_by.num_seconds()
                        );
                    }
                }
            }

            info!("Running trigger '{}' for {}", trigger.label, trigger.segments.join(", "));
            fire(trigger, RunContext::new(now))?;
            summary.fired += 1;

            if trigger.terminal {
                info!("Terminal trigger '{}' finished, exiting", trigger.label);
                return Ok(summary);
            }
            due[idx] = at + Duration::days(1);
        }
    }

    /// Today's instant of `trigger` unless it already passed beyond grace
    fn first_due(&self, trigger: &TriggerConfig, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(trigger.at);
        if self.is_late(now - today) {
            today + Duration::days(1)
        } else {
            today
        }
    }

    /// Sleep until `at`, logging on every heartbeat boundary before it.
    /// Returns the number of heartbeats logged.
    fn wait_until(&self, at: NaiveDateTime) -> usize {
        let mut beats = 0;
        loop {
            let now = self.clock.now();
            if now >= at {
                return beats;
            }
            let beat = next_heartbeat(now, self.schedule.heartbeat_secs);
            if beat < at {
                self.clock.sleep_until(beat);
                if self.clock.now() < at {
                    info!("Script is in progress..");
                    beats += 1;
                }
            } else {
                self.clock.sleep_until(at);
            }
        }
    }

    /// Lateness is counted in whole seconds
    fn is_late(&self, late_by: Duration) -> bool {
        late_by.num_seconds() > self.schedule.grace_secs as i64
    }
}

/// Earliest due trigger; ties go to the one configured first
fn next_index(due: &[NaiveDateTime]) -> Option<usize> {
    due.iter()
        .enumerate()
        .min_by_key(|(idx, at)| (**at, *idx))
        .map(|(idx, _)| idx)
}

/// First multiple of `every` seconds since midnight strictly after `now`
fn next_heartbeat(now: NaiveDateTime, every: u64) -> NaiveDateTime {
    let every = every.max(1) as i64;
    let midnight = now.date().and_time(NaiveTime::default());
    let elapsed = now.num_seconds_from_midnight() as i64;
    midnight + Duration::seconds((elapsed / every + 1) * every)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};

    /// Simulated clock: sleeping jumps straight to the target, plus any
    /// queued oversleep
    struct FakeClock {
        now: Cell<NaiveDateTime>,
        oversleep: RefCell<Vec<(NaiveDateTime, Duration)>>,
    }

    impl FakeClock {
        fn at(now: NaiveDateTime) -> Self {
            Self {
                now: Cell::new(now),
                oversleep: RefCell::new(Vec::new()),
            }
        }

        /// Wake `extra` late from the sleep targeting `target`
        fn oversleep_at(self, target: NaiveDateTime, extra: Duration) -> Self {
            self.oversleep.borrow_mut().push((target, extra));
            self
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> NaiveDateTime {
            self.now.get()
        }

        fn sleep_until(&self, instant: NaiveDateTime) {
            let extra = self
                .oversleep
                .borrow()
                .iter()
                .find(|(t, _)| *t == instant)
                .map(|(_, d)| *d)
                .unwrap_or_else(Duration::zero);
            self.oversleep.borrow_mut().retain(|(t, _)| *t != instant);
            if instant > self.now.get() {
                self.now.set(instant + extra);
            }
        }
    }

    fn dt(d: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, d)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn trigger(label: &str, at: (u32, u32, u32), segments: &[&str], terminal: bool) -> TriggerConfig {
        TriggerConfig {
            label: label.into(),
            at: NaiveTime::from_hms_opt(at.0, at.1, at.2).unwrap(),
            segments: segments.iter().map(|s| s.to_string()).collect(),
            terminal,
        }
    }

    fn schedule(missed: MissedPolicy, grace_secs: u64) -> ScheduleConfig {
        ScheduleConfig {
            missed,
            grace_secs,
            heartbeat_secs: 60,
            triggers: vec![
                trigger("morning", (9, 0, 30), &["1500", "1600", "1700"], false),
                trigger("afternoon", (13, 5, 0), &["1500"], true),
            ],
        }
    }

    fn run_recording(schedule: &ScheduleConfig, clock: FakeClock) -> (RunSummary, Vec<(String, NaiveDateTime)>) {
        let mut fired = Vec::new();
        let summary = Scheduler::new(schedule, clock)
            .run(|t, ctx| {
                fired.push((t.label.clone(), ctx.as_of));
                Ok::<(), ()>(())
            })
            .unwrap();
        (summary, fired)
    }

    #[test]
    fn fires_both_triggers_in_order_then_exits() {
        let schedule = schedule(MissedPolicy::Skip, 0);
        let (summary, fired) = run_recording(&schedule, FakeClock::at(dt(16, 8, 0, 0)));
        assert_eq!(
            fired,
            vec![
                ("morning".to_string(), dt(16, 9, 0, 30)),
                ("afternoon".to_string(), dt(16, 13, 5, 0)),
            ]
        );
        assert_eq!(summary.fired, 2);
        assert_eq!(summary.missed, 0);
    }

    #[test]
    fn started_after_morning_runs_only_afternoon() {
        let schedule = schedule(MissedPolicy::Skip, 0);
        let (_, fired) = run_recording(&schedule, FakeClock::at(dt(16, 10, 0, 0)));
        assert_eq!(fired, vec![("afternoon".to_string(), dt(16, 13, 5, 0))]);
    }

    #[test]
    fn started_after_terminal_waits_for_next_day() {
        let schedule = schedule(MissedPolicy::Skip, 0);
        let (_, fired) = run_recording(&schedule, FakeClock::at(dt(16, 14, 0, 0)));
        assert_eq!(
            fired,
            vec![
                ("morning".to_string(), dt(17, 9, 0, 30)),
                ("afternoon".to_string(), dt(17, 13, 5, 0)),
            ]
        );
    }

    #[test]
    fn late_wake_is_skipped_by_default() {
        let schedule = schedule(MissedPolicy::Skip, 0);
        let clock = FakeClock::at(dt(16, 9, 0, 15)).oversleep_at(dt(16, 9, 0, 30), Duration::seconds(5));
        let (summary, fired) = run_recording(&schedule, clock);
        assert_eq!(fired, vec![("afternoon".to_string(), dt(16, 13, 5, 0))]);
        assert_eq!(summary.missed, 1);
    }

    #[test]
    fn sub_second_oversleep_is_on_time() {
        let schedule = schedule(MissedPolicy::Skip, 0);
        let clock = FakeClock::at(dt(16, 8, 0, 0))
            .oversleep_at(dt(16, 9, 0, 30), Duration::milliseconds(3))
            .oversleep_at(dt(16, 13, 5, 0), Duration::milliseconds(999));
        let (summary, fired) = run_recording(&schedule, clock);
        assert_eq!(
            fired,
            vec![
                ("morning".to_string(), dt(16, 9, 0, 30) + Duration::milliseconds(3)),
                ("afternoon".to_string(), dt(16, 13, 5, 0) + Duration::milliseconds(999)),
            ]
        );
        assert_eq!(summary.missed, 0);
    }

    #[test]
    fn started_within_the_due_second_fires_today() {
        let schedule = schedule(MissedPolicy::Skip, 0);
        let start = dt(16, 13, 5, 0) + Duration::milliseconds(400);
        let (summary, fired) = run_recording(&schedule, FakeClock::at(start));
        assert_eq!(fired, vec![("afternoon".to_string(), start)]);
        assert_eq!(summary.missed, 0);
    }

    #[test]
    fn system_clock_fires_terminal_trigger() {
        let clock = SystemClock;
        let at = (clock.now() + Duration::seconds(2)).with_nanosecond(0).unwrap();
        let schedule = ScheduleConfig {
            missed: MissedPolicy::Skip,
            grace_secs: 0,
            heartbeat_secs: 60,
            triggers: vec![trigger("now", (at.hour(), at.minute(), at.second()), &["1500"], true)],
        };
        // a trigger two seconds ahead could cross midnight; nothing to check then
        if at.date() != clock.now().date() {
            return;
        }
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let mut fired = Vec::new();
            let summary = Scheduler::new(&schedule, SystemClock)
                .run(|t, ctx| {
                    fired.push((t.label.clone(), ctx.as_of));
                    Ok::<(), ()>(())
                })
                .unwrap();
            let _ = tx.send((summary, fired));
        });
        let (summary, fired) = rx
            .recv_timeout(std::time::Duration::from_secs(6))
            .expect("terminal trigger did not fire");
        assert_eq!(summary.fired, 1);
        assert_eq!(summary.missed, 0);
        assert_eq!(fired[0].0, "now");
        assert!(fired[0].1 >= at);
    }

    #[test]
    fn late_wake_within_grace_fires() {
        let schedule = schedule(MissedPolicy::Skip, 10);
        let clock = FakeClock::at(dt(16, 9, 0, 15)).oversleep_at(dt(16, 9, 0, 30), Duration::seconds(5));
        let (summary, fired) = run_recording(&schedule, clock);
        assert_eq!(fired[0], ("morning".to_string(), dt(16, 9, 0, 35)));
        assert_eq!(summary.missed, 0);
    }

    #[test]
    fn catch_up_fires_late_with_late_as_of() {
        let schedule = schedule(MissedPolicy::CatchUp, 0);
        let clock = FakeClock::at(dt(16, 9, 0, 15)).oversleep_at(dt(16, 9, 0, 30), Duration::minutes(30));
        let (summary, fired) = run_recording(&schedule, clock);
        assert_eq!(
            fired,
            vec![
                ("morning".to_string(), dt(16, 9, 30, 30)),
                ("afternoon".to_string(), dt(16, 13, 5, 0)),
            ]
        );
        assert_eq!(summary.missed, 1);
    }

    #[test]
    fn heartbeat_on_every_minute_boundary_while_waiting() {
        let schedule = schedule(MissedPolicy::Skip, 0);
        let (summary, _) = run_recording(&schedule, FakeClock::at(dt(16, 8, 58, 30)));
        // 08:59 and 09:00 before the morning run, 09:01 through 13:04 after it
        assert_eq!(summary.heartbeats, 2 + 244);
    }

    #[test]
    fn failing_run_stops_the_loop() {
        let schedule = schedule(MissedPolicy::Skip, 0);
        let mut calls = 0;
        let result = Scheduler::new(&schedule, FakeClock::at(dt(16, 8, 0, 0))).run(|_, _| {
            calls += 1;
            Err("halt")
        });
        assert_eq!(result, Err("halt"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn next_heartbeat_is_strictly_later() {
        assert_eq!(next_heartbeat(dt(16, 8, 59, 59), 60), dt(16, 9, 0, 0));
        assert_eq!(next_heartbeat(dt(16, 9, 0, 0), 60), dt(16, 9, 1, 0));
        assert_eq!(next_heartbeat(dt(16, 23, 59, 30), 60), dt(17, 0, 0, 0));
        assert_eq!(next_heartbeat(dt(16, 9, 10, 0), 3600), dt(16, 10, 0, 0));
    }

    #[test]
    fn ties_go_to_first_configured() {
        let at = dt(16, 9, 0, 0);
        assert_eq!(next_index(&[dt(16, 10, 0, 0), at, at]), Some(1));
        assert_eq!(next_index(&[]), None);
    }
}
