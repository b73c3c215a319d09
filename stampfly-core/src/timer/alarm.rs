//! Timer operations

use embassy_sync::blocking_mutex::raw::RawMutex;
use portable_atomic::Ordering;
use stampfly_hal::interrupt::InterruptController;
use stampfly_hal::timer::{
    period_to_alarm_count, AlarmRoute, CounterConfig, HighResConfig, TimerDriver, TimerKind,
};

use super::{AlarmSlot, Inner, TimerCallback, TimerEntry, TimerManager, TimerStatistics};
use crate::error::{Error, Result};
use crate::isr;

impl<M, T, C> TimerManager<M, T, C>
where
    M: RawMutex + Sync + 'static,
    T: TimerDriver + Send + 'static,
    C: InterruptController + Sync + 'static,
{
    /// Create a stopped microsecond timer
    ///
    /// Fails with [`Error::InvalidArgument`] if `id` is already registered;
    /// the existing timer is left untouched.
    pub fn create_high_res(
        &'static self,
        id: u32,
        config: HighResConfig,
        callback: TimerCallback,
    ) -> Result<()> {
        if config.period_us == 0 {
            return Err(Error::InvalidArgument);
        }
        self.create(id, TimerKind::HighRes(config), callback)
    }

    /// Create a stopped general-purpose counter
    pub fn create_general_purpose(
        &'static self,
        id: u32,
        config: CounterConfig,
        callback: TimerCallback,
    ) -> Result<()> {
        if config.resolution_hz == 0 || config.alarm_count == 0 {
            return Err(Error::InvalidArgument);
        }
        self.create(id, TimerKind::Counter(config), callback)
    }

    /// Create and start a timer that fires once after `timeout_us`
    pub fn start_one_shot(
        &'static self,
        id: u32,
        timeout_us: u64,
        callback: TimerCallback,
    ) -> Result<()> {
        let config = HighResConfig {
            period_us: timeout_us,
            auto_reload: false,
            name: "one_shot",
        };
        self.create_high_res(id, config, callback)?;
        if let Err(e) = self.start_timer(id) {
            let _ = self.delete_timer(id);
            return Err(e);
        }
        Ok(())
    }

    fn create(&'static self, id: u32, kind: TimerKind, callback: TimerCallback) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            if inner.timers.contains_key(&id) {
                warn!("timer: id {} already registered", id);
                return Err(Error::InvalidArgument);
            }
            let slot = inner.free_timer_slot().ok_or(Error::NoMemory)?;

            let cell = &self.alarms[slot as usize];
            isr::store(
                cell,
                Some(AlarmSlot {
                    callback,
                    armed: false,
                    one_shot: kind.is_one_shot(),
                }),
            );
            let route = AlarmRoute { sink: self, slot };
            if let Err(fault) = inner.driver.create(slot, &kind, route) {
                isr::store(cell, None);
                return Err(fault.into());
            }
            self.clear_timer_counters(slot);

            let entry = TimerEntry {
                slot,
                kind,
                created_at_us: inner.driver.now_us(),
                last_started_us: None,
                resume: false,
            };
            inner.timers.insert(id, entry).map_err(|_| Error::NoMemory)?;
            debug!("timer: created {} in slot {}", id, slot);
            Ok(())
        })
    }
}

impl<M: RawMutex, T: TimerDriver, C: InterruptController> TimerManager<M, T, C> {
    fn with_timer<R>(
        &self,
        id: u32,
        f: impl FnOnce(&mut Inner<T>, TimerEntry) -> Result<R>,
    ) -> Result<R> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            let entry = inner.timer(id)?;
            f(&mut *inner, entry)
        })
    }

    /// Arm a timer
    pub fn start_timer(&self, id: u32) -> Result<()> {
        self.with_timer(id, |inner, entry| {
            let cell = &self.alarms[entry.slot as usize];
            if isr::load(cell).is_some_and(|r| r.armed) {
                return Err(Error::InvalidState);
            }
            // Armed before the hardware so an immediate alarm is not missed
            isr::update(cell, |r| r.armed = true);
            if let Err(fault) = inner.driver.start(entry.slot) {
                isr::update(cell, |r| r.armed = false);
                return Err(fault.into());
            }
            let now = inner.driver.now_us();
            if let Some(entry) = inner.timers.get_mut(&id) {
                entry.last_started_us = Some(now);
                entry.resume = false;
            }
            Ok(())
        })
    }

    /// Disarm a timer
    pub fn stop_timer(&self, id: u32) -> Result<()> {
        self.with_timer(id, |inner, entry| {
            inner.driver.stop(entry.slot)?;
            isr::update(&self.alarms[entry.slot as usize], |r| r.armed = false);
            if let Some(entry) = inner.timers.get_mut(&id) {
                entry.resume = false;
            }
            Ok(())
        })
    }

    /// Stop and delete a timer, freeing its ID
    pub fn delete_timer(&self, id: u32) -> Result<()> {
        self.with_timer(id, |inner, entry| {
            let cell = &self.alarms[entry.slot as usize];
            isr::update(cell, |r| r.armed = false);
            let _ = inner.driver.stop(entry.slot);
            inner.driver.delete(entry.slot)?;
            isr::store(cell, None);
            self.clear_timer_counters(entry.slot);
            inner.timers.remove(&id);
            debug!("timer: deleted {}", id);
            Ok(())
        })
    }

    /// Change the period of a timer
    ///
    /// For a counter the period is converted to an alarm count at the
    /// counter's resolution.
    pub fn set_period(&self, id: u32, period_us: u64) -> Result<()> {
        if period_us == 0 {
            return Err(Error::InvalidArgument);
        }
        self.with_timer(id, |inner, entry| {
            let kind = match entry.kind {
                TimerKind::HighRes(mut config) => {
                    inner.driver.set_period(entry.slot, period_us)?;
                    config.period_us = period_us;
                    TimerKind::HighRes(config)
                }
                TimerKind::Counter(mut config) => {
                    let count = period_to_alarm_count(period_us, config.resolution_hz)
                        .filter(|count| *count > 0)
                        .ok_or(Error::InvalidArgument)?;
                    inner
                        .driver
                        .set_alarm(entry.slot, count, config.auto_reload_on_alarm)?;
                    config.alarm_count = count;
                    TimerKind::Counter(config)
                }
            };
            if let Some(entry) = inner.timers.get_mut(&id) {
                entry.kind = kind;
            }
            Ok(())
        })
    }

    /// Change the alarm of a general-purpose counter
    pub fn set_alarm_count(&self, id: u32, alarm_count: u64, auto_reload: bool) -> Result<()> {
        if alarm_count == 0 {
            return Err(Error::InvalidArgument);
        }
        self.with_timer(id, |inner, entry| {
            let TimerKind::Counter(mut config) = entry.kind else {
                return Err(Error::InvalidArgument);
            };
            inner.driver.set_alarm(entry.slot, alarm_count, auto_reload)?;
            config.alarm_count = alarm_count;
            config.auto_reload_on_alarm = auto_reload;
            isr::update(&self.alarms[entry.slot as usize], |r| r.one_shot = !auto_reload);
            if let Some(entry) = inner.timers.get_mut(&id) {
                entry.kind = TimerKind::Counter(config);
            }
            Ok(())
        })
    }

    /// Read a general-purpose counter
    pub fn count(&self, id: u32) -> Result<u64> {
        self.with_timer(id, |inner, entry| match entry.kind {
            TimerKind::Counter(_) => Ok(inner.driver.count(entry.slot)?),
            TimerKind::HighRes(_) => Err(Error::InvalidArgument),
        })
    }

    /// Overwrite a general-purpose counter
    pub fn set_count(&self, id: u32, count: u64) -> Result<()> {
        self.with_timer(id, |inner, entry| match entry.kind {
            TimerKind::Counter(_) => Ok(inner.driver.set_count(entry.slot, count)?),
            TimerKind::HighRes(_) => Err(Error::InvalidArgument),
        })
    }

    /// Check if a timer is armed
    pub fn is_timer_running(&self, id: u32) -> Result<bool> {
        self.with_timer(id, |_, entry| {
            Ok(isr::load(&self.alarms[entry.slot as usize]).is_some_and(|r| r.armed))
        })
    }

    /// Timer class and current configuration
    pub fn timer_kind(&self, id: u32) -> Result<TimerKind> {
        self.with_timer(id, |_, entry| Ok(entry.kind))
    }

    /// Counters of one timer
    pub fn timer_statistics(&self, id: u32) -> Result<TimerStatistics> {
        self.with_timer(id, |_, entry| {
            let i = entry.slot as usize;
            Ok(TimerStatistics {
                fired: self.fired[i].load(Ordering::Relaxed),
                wake_requests: self.wakes[i].load(Ordering::Relaxed),
                missed: self.missed[i].load(Ordering::Relaxed),
                created_at_us: entry.created_at_us,
                last_started_us: entry.last_started_us,
            })
        })
    }

    /// Zero the counters of one timer
    pub fn reset_timer_statistics(&self, id: u32) -> Result<()> {
        self.with_timer(id, |_, entry| {
            self.clear_timer_counters(entry.slot);
            Ok(())
        })
    }

    /// Number of registered timers
    pub fn timer_count(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().timers.len())
    }
}
