//! Simulated timers on a virtual clock
//!
//! Time only moves when a test calls [`SimTimers::advance`]. Every alarm
//! that falls inside the advanced window is delivered in deadline order.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use stampfly_hal::timer::{AlarmRoute, CountDirection, TimerDriver, TimerKind};
use stampfly_hal::Fault;

use crate::lock;

#[derive(Debug, Clone, Copy)]
struct SimTimer {
    kind: TimerKind,
    route: AlarmRoute,
    running: bool,
    /// Alarm interval in microseconds
    period_us: u64,
    /// Virtual time of the next alarm
    deadline_us: u64,
    /// Counter value when the counter was last (re)started
    base_count: u64,
    started_at_us: u64,
}

impl SimTimer {
    fn resolution_hz(&self) -> u64 {
        match self.kind {
            TimerKind::HighRes(_) => 1_000_000,
            TimerKind::Counter(c) => c.resolution_hz as u64,
        }
    }

    fn auto_reload(&self) -> bool {
        !self.kind.is_one_shot()
    }

    fn count_at(&self, now_us: u64) -> u64 {
        if !self.running {
            return self.base_count;
        }
        let elapsed = (now_us - self.started_at_us) * self.resolution_hz() / 1_000_000;
        match self.kind {
            TimerKind::Counter(c) if c.direction == CountDirection::Down => {
                self.base_count.saturating_sub(elapsed)
            }
            _ => self.base_count.wrapping_add(elapsed),
        }
    }
}

fn kind_period_us(kind: &TimerKind) -> u64 {
    match kind {
        TimerKind::HighRes(c) => c.period_us,
        TimerKind::Counter(c) => counter_period_us(c.alarm_count, c.resolution_hz),
    }
}

fn counter_period_us(alarm_count: u64, resolution_hz: u32) -> u64 {
    if resolution_hz == 0 {
        return 0;
    }
    ((alarm_count as u128 * 1_000_000) / resolution_hz as u128) as u64
}

#[derive(Debug, Default)]
struct TimerState {
    now_us: u64,
    timers: BTreeMap<u8, SimTimer>,
    wake_hints: u32,
}

/// Simulated timer driver
#[derive(Debug, Clone, Default)]
pub struct SimTimers {
    state: Arc<Mutex<TimerState>>,
}

impl SimTimers {
    /// Clock at zero, no timers
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the virtual clock forward and deliver due alarms
    ///
    /// Returns the number of alarms delivered.
    pub fn advance(&self, us: u64) -> usize {
        let due = {
            let mut state = lock(&self.state);
            let target = state.now_us + us;
            let mut due = Vec::new();
            loop {
                let next = state
                    .timers
                    .iter()
                    .filter(|(_, t)| t.running && t.period_us > 0 && t.deadline_us <= target)
                    .min_by_key(|(_, t)| t.deadline_us)
                    .map(|(slot, t)| (*slot, t.deadline_us));
                let Some((slot, deadline)) = next else {
                    break;
                };
                state.now_us = deadline;
                let Some(timer) = state.timers.get_mut(&slot) else {
                    break;
                };
                due.push(timer.route);
                if timer.auto_reload() {
                    timer.deadline_us = deadline + timer.period_us;
                    if matches!(timer.kind, TimerKind::Counter(_)) {
                        timer.base_count = 0;
                        timer.started_at_us = deadline;
                    }
                } else {
                    timer.base_count = timer.count_at(deadline);
                    timer.running = false;
                }
            }
            state.now_us = target;
            due
        };

        let fired = due.len();
        let mut wakes = 0;
        for route in due {
            if route.fire() {
                wakes += 1;
            }
        }
        lock(&self.state).wake_hints += wakes;
        fired
    }

    /// Number of alarms whose handler asked for a context switch
    pub fn wake_hints(&self) -> u32 {
        lock(&self.state).wake_hints
    }

    /// Check if the hardware timer in `slot` is armed
    pub fn is_armed(&self, slot: u8) -> bool {
        lock(&self.state).timers.get(&slot).is_some_and(|t| t.running)
    }

    /// Number of timers allocated in the driver
    pub fn allocated(&self) -> usize {
        lock(&self.state).timers.len()
    }

    fn with_timer<R>(&self, slot: u8, f: impl FnOnce(&mut SimTimer, u64) -> R) -> Result<R, Fault> {
        let mut state = lock(&self.state);
        let now = state.now_us;
        state
            .timers
            .get_mut(&slot)
            .map(|t| f(t, now))
            .ok_or(Fault::NotFound)
    }
}

impl TimerDriver for SimTimers {
    fn now_us(&self) -> u64 {
        lock(&self.state).now_us
    }

    fn create(&mut self, slot: u8, kind: &TimerKind, route: AlarmRoute) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.timers.contains_key(&slot) {
            return Err(Fault::InvalidState);
        }
        let period_us = kind_period_us(kind);
        if period_us == 0 {
            return Err(Fault::InvalidArgument);
        }
        state.timers.insert(
            slot,
            SimTimer {
                kind: *kind,
                route,
                running: false,
                period_us,
                deadline_us: 0,
                base_count: 0,
                started_at_us: 0,
            },
        );
        Ok(())
    }

    fn start(&mut self, slot: u8) -> Result<(), Fault> {
        self.with_timer(slot, |t, now| {
            if t.running {
                return Err(Fault::InvalidState);
            }
            t.running = true;
            t.started_at_us = now;
            t.deadline_us = now + t.period_us;
            Ok(())
        })?
    }

    fn stop(&mut self, slot: u8) -> Result<(), Fault> {
        self.with_timer(slot, |t, now| {
            t.base_count = t.count_at(now);
            t.running = false;
        })
    }

    fn delete(&mut self, slot: u8) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        match state.timers.get(&slot).map(|t| t.running) {
            Some(true) => Err(Fault::InvalidState),
            Some(false) => {
                state.timers.remove(&slot);
                Ok(())
            }
            None => Err(Fault::NotFound),
        }
    }

    fn set_period(&mut self, slot: u8, period_us: u64) -> Result<(), Fault> {
        if period_us == 0 {
            return Err(Fault::InvalidArgument);
        }
        self.with_timer(slot, |t, now| {
            if let TimerKind::HighRes(ref mut c) = t.kind {
                c.period_us = period_us;
            }
            t.period_us = period_us;
            if t.running {
                t.started_at_us = now;
                t.deadline_us = now + period_us;
            }
        })
    }

    fn set_alarm(&mut self, slot: u8, alarm_count: u64, auto_reload: bool) -> Result<(), Fault> {
        self.with_timer(slot, |t, now| {
            let TimerKind::Counter(mut config) = t.kind else {
                return Err(Fault::InvalidArgument);
            };
            let period_us = counter_period_us(alarm_count, config.resolution_hz);
            if period_us == 0 {
                return Err(Fault::InvalidArgument);
            }
            let current = t.count_at(now);
            config.alarm_count = alarm_count;
            config.auto_reload_on_alarm = auto_reload;
            t.kind = TimerKind::Counter(config);
            t.period_us = period_us;
            if t.running {
                let remaining = alarm_count.saturating_sub(current);
                t.deadline_us = now + counter_period_us(remaining, config.resolution_hz).max(1);
            }
            Ok(())
        })?
    }

    fn count(&self, slot: u8) -> Result<u64, Fault> {
        let state = lock(&self.state);
        state
            .timers
            .get(&slot)
            .map(|t| t.count_at(state.now_us))
            .ok_or(Fault::NotFound)
    }

    fn set_count(&mut self, slot: u8, count: u64) -> Result<(), Fault> {
        self.with_timer(slot, |t, now| {
            t.base_count = count;
            t.started_at_us = now;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampfly_hal::timer::{AlarmSink, CounterConfig, HighResConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(AtomicU32);

    impl AlarmSink for Counter {
        fn on_alarm(&self, _slot: u8) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    static SINK: Counter = Counter(AtomicU32::new(0));
    static COUNTER_SINK: Counter = Counter(AtomicU32::new(0));
    static ONE_SHOT_SINK: Counter = Counter(AtomicU32::new(0));

    #[test]
    fn test_periodic_alarms() {
        let mut timers = SimTimers::new();
        let route = AlarmRoute { sink: &SINK, slot: 0 };
        timers
            .create(0, &TimerKind::HighRes(HighResConfig::default()), route)
            .unwrap();
        timers.start(0).unwrap();

        assert_eq!(timers.advance(3_500), 3);
        assert_eq!(SINK.0.load(Ordering::SeqCst), 3);
        assert_eq!(timers.now_us(), 3_500);
        assert_eq!(timers.wake_hints(), 3);
    }

    #[test]
    fn test_one_shot_disarms() {
        let mut timers = SimTimers::new();
        let route = AlarmRoute {
            sink: &ONE_SHOT_SINK,
            slot: 1,
        };
        let kind = TimerKind::HighRes(HighResConfig {
            period_us: 500,
            auto_reload: false,
            name: "once",
        });
        timers.create(1, &kind, route).unwrap();
        timers.start(1).unwrap();
        assert_eq!(timers.advance(10_000), 1);
        assert!(!timers.is_armed(1));
        assert_eq!(ONE_SHOT_SINK.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_counter_counts() {
        let mut timers = SimTimers::new();
        let route = AlarmRoute {
            sink: &COUNTER_SINK,
            slot: 2,
        };
        let kind = TimerKind::Counter(CounterConfig {
            alarm_count: 1_000_000,
            ..Default::default()
        });
        timers.create(2, &kind, route).unwrap();
        timers.start(2).unwrap();
        timers.advance(250);
        assert_eq!(timers.count(2).unwrap(), 250);
        assert_eq!(timers.delete(2), Err(Fault::InvalidState));
        timers.stop(2).unwrap();
        timers.delete(2).unwrap();
        assert_eq!(timers.count(2), Err(Fault::NotFound));
    }
}
