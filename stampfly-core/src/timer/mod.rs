//! Timer and interrupt manager
//!
//! One manager owns both the timers of a [`TimerDriver`] and the raw
//! interrupt sources of an [`InterruptController`]. Both need the same
//! machinery: an ID-keyed registry guarded by the manager mutex, plus a
//! fixed table of slots that interrupt context reads without that mutex.
//!
//! Alarms and interrupts reach the manager through the route handed to the
//! backend at creation ([`AlarmRoute`], [`IrqRoute`]), which names this
//! manager and a slot, so any number of managers can coexist.
//!
//! Deleting a timer or unregistering a source always disarms it first.
//! Callers must still not delete a timer from inside its own callback.

mod alarm;
mod irq;

pub use irq::IrqState;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::FnvIndexMap;
use portable_atomic::{AtomicU32, Ordering};
use stampfly_hal::interrupt::{InterruptController, IrqSink, SourceConfig};
use stampfly_hal::timer::{AlarmSink, TimerDriver, TimerKind};

use crate::error::{Error, Result};
use crate::isr::{self, Slot};
use crate::lifecycle::{Event, Lifecycle, Peripheral};

/// Maximum number of timers per manager
pub const MAX_TIMERS: usize = 16;

/// Maximum number of raw interrupt registrations per manager
pub const MAX_INTERRUPTS: usize = 16;

/// Timer callback, runs in interrupt (or timer task) context
///
/// Returns true if a higher priority task was woken.
pub type TimerCallback = fn() -> bool;

/// Raw interrupt handler, runs in interrupt context
pub type InterruptHandler = fn();

/// Per-timer counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerStatistics {
    /// Alarms delivered to the callback
    pub fired: u32,
    /// Callbacks that asked for a context switch
    pub wake_requests: u32,
    /// Alarms that arrived while the timer was disarmed
    pub missed: u32,
    /// Creation time in microseconds since boot
    pub created_at_us: u64,
    /// Last start time in microseconds since boot
    pub last_started_us: Option<u64>,
}

/// Per-source counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptStatistics {
    /// Dispatches that reached the handler
    pub fired: u32,
    /// Dispatches that arrived while the source was disabled
    pub missed: u32,
}

/// Interrupt-visible state of one timer
#[derive(Debug, Clone, Copy)]
struct AlarmSlot {
    callback: TimerCallback,
    armed: bool,
    one_shot: bool,
}

/// Interrupt-visible state of one raw source
#[derive(Debug, Clone, Copy)]
struct IrqSlot {
    handler: InterruptHandler,
    enabled: bool,
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    slot: u8,
    kind: TimerKind,
    created_at_us: u64,
    last_started_us: Option<u64>,
    /// Running when the manager was stopped
    resume: bool,
}

#[derive(Debug, Clone, Copy)]
struct IrqEntry {
    slot: u8,
    config: SourceConfig,
    /// Enabled when the manager was stopped
    resume: bool,
}

struct Inner<T> {
    lifecycle: Lifecycle,
    driver: T,
    timers: FnvIndexMap<u32, TimerEntry, MAX_TIMERS>,
    interrupts: FnvIndexMap<u32, IrqEntry, MAX_INTERRUPTS>,
}

impl<T> Inner<T> {
    fn timer(&self, id: u32) -> Result<TimerEntry> {
        self.timers.get(&id).copied().ok_or(Error::NotFound)
    }

    fn interrupt(&self, id: u32) -> Result<IrqEntry> {
        self.interrupts.get(&id).copied().ok_or(Error::NotFound)
    }

    fn free_timer_slot(&self) -> Option<u8> {
        (0..MAX_TIMERS as u8).find(|s| !self.timers.values().any(|e| e.slot == *s))
    }

    fn free_irq_slot(&self) -> Option<u8> {
        (0..MAX_INTERRUPTS as u8).find(|s| !self.interrupts.values().any(|e| e.slot == *s))
    }
}

/// Timer and raw interrupt manager
pub struct TimerManager<M: RawMutex, T: TimerDriver, C: InterruptController> {
    controller: C,
    inner: Mutex<M, RefCell<Inner<T>>>,
    alarms: [Slot<AlarmSlot>; MAX_TIMERS],
    fired: [AtomicU32; MAX_TIMERS],
    wakes: [AtomicU32; MAX_TIMERS],
    missed: [AtomicU32; MAX_TIMERS],
    irqs: [Slot<IrqSlot>; MAX_INTERRUPTS],
    irq_fired: [AtomicU32; MAX_INTERRUPTS],
    irq_missed: [AtomicU32; MAX_INTERRUPTS],
}

impl<M: RawMutex, T: TimerDriver, C: InterruptController> TimerManager<M, T, C> {
    /// Create a manager over a timer driver and an interrupt controller
    pub const fn new(driver: T, controller: C) -> Self {
        Self {
            controller,
            inner: Mutex::new(RefCell::new(Inner {
                lifecycle: Lifecycle::new("timer"),
                driver,
                timers: FnvIndexMap::new(),
                interrupts: FnvIndexMap::new(),
            })),
            alarms: [const { isr::empty() }; MAX_TIMERS],
            fired: [const { AtomicU32::new(0) }; MAX_TIMERS],
            wakes: [const { AtomicU32::new(0) }; MAX_TIMERS],
            missed: [const { AtomicU32::new(0) }; MAX_TIMERS],
            irqs: [const { isr::empty() }; MAX_INTERRUPTS],
            irq_fired: [const { AtomicU32::new(0) }; MAX_INTERRUPTS],
            irq_missed: [const { AtomicU32::new(0) }; MAX_INTERRUPTS],
        }
    }

    /// Monotonic time since boot in microseconds
    pub fn now_us(&self) -> Result<u64> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.lifecycle.require_ready()?;
            Ok(inner.driver.now_us())
        })
    }

    fn clear_timer_counters(&self, slot: u8) {
        let i = slot as usize;
        self.fired[i].store(0, Ordering::Relaxed);
        self.wakes[i].store(0, Ordering::Relaxed);
        self.missed[i].store(0, Ordering::Relaxed);
    }

    fn clear_irq_counters(&self, slot: u8) {
        let i = slot as usize;
        self.irq_fired[i].store(0, Ordering::Relaxed);
        self.irq_missed[i].store(0, Ordering::Relaxed);
    }

    /// Delete every timer and unregister every source
    fn release_all(&self, inner: &mut Inner<T>) -> Result<()> {
        let mut first_error = None;

        for (id, entry) in inner.timers.iter() {
            let slot = entry.slot;
            isr::store(&self.alarms[slot as usize], None);
            // Stopping an idle timer is rejected by some drivers; only the
            // delete result matters here.
            let _ = inner.driver.stop(slot);
            if let Err(fault) = inner.driver.delete(slot) {
                warn!("timer: deleting timer {} failed: {}", id, fault);
                first_error.get_or_insert(Error::from(fault));
            }
            self.clear_timer_counters(slot);
        }
        inner.timers.clear();

        for (id, entry) in inner.interrupts.iter() {
            let _ = self.controller.disable(entry.config.source);
            isr::store(&self.irqs[entry.slot as usize], None);
            if let Err(fault) = self.controller.free(entry.config.source) {
                warn!("timer: freeing interrupt {} failed: {}", id, fault);
                first_error.get_or_insert(Error::from(fault));
            }
            self.clear_irq_counters(entry.slot);
        }
        inner.interrupts.clear();

        first_error.map_or(Ok(()), Err)
    }
}

impl<M, T, C> AlarmSink for TimerManager<M, T, C>
where
    M: RawMutex + Sync,
    T: TimerDriver + Send,
    C: InterruptController + Sync,
{
    fn on_alarm(&self, slot: u8) -> bool {
        let i = slot as usize;
        let Some(cell) = self.alarms.get(i) else {
            return false;
        };
        let Some(route) = isr::load(cell) else {
            return false;
        };
        if !route.armed {
            self.missed[i].fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if route.one_shot {
            isr::update(cell, |r| r.armed = false);
        }
        self.fired[i].fetch_add(1, Ordering::Relaxed);
        let wake = (route.callback)();
        if wake {
            self.wakes[i].fetch_add(1, Ordering::Relaxed);
        }
        wake
    }
}

impl<M, T, C> IrqSink for TimerManager<M, T, C>
where
    M: RawMutex + Sync,
    T: TimerDriver + Send,
    C: InterruptController + Sync,
{
    fn on_irq(&self, slot: u8) {
        let i = slot as usize;
        let Some(route) = self.irqs.get(i).and_then(isr::load) else {
            return;
        };
        if !route.enabled {
            self.irq_missed[i].fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.irq_fired[i].fetch_add(1, Ordering::Relaxed);
        (route.handler)();
    }
}

impl<M: RawMutex, T: TimerDriver, C: InterruptController> Peripheral for TimerManager<M, T, C> {
    fn initialize(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.apply(Event::Initialize)?;
            inner.lifecycle.apply(Event::InitComplete)?;
            Ok(())
        })
    }

    fn configure(&self) -> Result<()> {
        self.inner.lock(|inner| {
            inner.borrow_mut().lifecycle.apply(Event::Configure)?;
            Ok(())
        })
    }

    fn start(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut guard = inner.borrow_mut();
            let inner = &mut *guard;
            inner.lifecycle.check(Event::Start)?;

            for entry in inner.timers.values_mut() {
                if !core::mem::take(&mut entry.resume) {
                    continue;
                }
                let cell = &self.alarms[entry.slot as usize];
                isr::update(cell, |r| r.armed = true);
                if let Err(fault) = inner.driver.start(entry.slot) {
                    isr::update(cell, |r| r.armed = false);
                    return Err(inner.lifecycle.fail(fault.into()));
                }
            }
            for entry in inner.interrupts.values_mut() {
                if !core::mem::take(&mut entry.resume) {
                    continue;
                }
                isr::update(&self.irqs[entry.slot as usize], |r| r.enabled = true);
                if let Err(fault) = self.controller.enable(entry.config.source) {
                    return Err(inner.lifecycle.fail(fault.into()));
                }
            }

            inner.lifecycle.apply(Event::Start)?;
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut guard = inner.borrow_mut();
            let inner = &mut *guard;
            inner.lifecycle.check(Event::Stop)?;

            for entry in inner.timers.values_mut() {
                let cell = &self.alarms[entry.slot as usize];
                if !isr::load(cell).is_some_and(|r| r.armed) {
                    continue;
                }
                inner.driver.stop(entry.slot)?;
                isr::update(cell, |r| r.armed = false);
                entry.resume = true;
            }
            for entry in inner.interrupts.values_mut() {
                let cell = &self.irqs[entry.slot as usize];
                if !isr::load(cell).is_some_and(|r| r.enabled) {
                    continue;
                }
                self.controller.disable(entry.config.source)?;
                isr::update(cell, |r| r.enabled = false);
                entry.resume = true;
            }

            inner.lifecycle.apply(Event::Stop)?;
            Ok(())
        })
    }

    fn reset(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if let Err(e) = self.release_all(&mut inner) {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Reset)?;
            Ok(())
        })
    }

    lifecycle_accessors!();
}

impl<M: RawMutex, T: TimerDriver, C: InterruptController> Drop for TimerManager<M, T, C> {
    fn drop(&mut self) {
        self.inner.lock(|inner| {
            let _ = self.release_all(&mut inner.borrow_mut());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use stampfly_hal::interrupt::{Capabilities, InterruptFlags, Priority};
    use stampfly_hal::timer::{CounterConfig, HighResConfig};
    use stampfly_hal_sim::{SimInterrupts, SimTimers};
    use std::boxed::Box;
    use std::sync::atomic::{AtomicU32 as StdAtomicU32, Ordering as StdOrdering};

    use crate::lifecycle::State;

    type Manager = TimerManager<CriticalSectionRawMutex, SimTimers, SimInterrupts>;

    fn leaked(timers: &SimTimers, irqs: &SimInterrupts) -> &'static Manager {
        let manager = Box::leak(Box::new(Manager::new(timers.clone(), irqs.clone())));
        manager.initialize().unwrap();
        manager
    }

    fn hr(period_us: u64) -> HighResConfig {
        HighResConfig {
            period_us,
            auto_reload: true,
            name: "test",
        }
    }

    fn source(source: u32) -> SourceConfig {
        SourceConfig {
            source,
            priority: Priority::Level2,
            flags: InterruptFlags::LEVEL,
        }
    }

    #[test]
    fn test_operations_before_initialize() {
        let manager: &'static Manager =
            Box::leak(Box::new(Manager::new(SimTimers::new(), SimInterrupts::new())));
        fn cb() -> bool {
            false
        }
        assert_eq!(manager.create_high_res(1, hr(100), cb), Err(Error::InvalidState));
        assert_eq!(manager.now_us(), Err(Error::InvalidState));
        assert_eq!(manager.start_timer(1), Err(Error::InvalidState));
        assert_eq!(manager.state(), State::Uninitialized);
    }

    #[test]
    fn test_periodic_timer_fires() {
        static HITS: StdAtomicU32 = StdAtomicU32::new(0);
        fn cb() -> bool {
            HITS.fetch_add(1, StdOrdering::SeqCst);
            true
        }

        let sim = SimTimers::new();
        let manager = leaked(&sim, &SimInterrupts::new());
        manager.create_high_res(1, hr(1_000), cb).unwrap();
        assert_eq!(manager.is_timer_running(1), Ok(false));
        manager.start_timer(1).unwrap();
        assert_eq!(manager.is_timer_running(1), Ok(true));

        assert_eq!(sim.advance(3_500), 3);
        assert_eq!(HITS.load(StdOrdering::SeqCst), 3);
        let stats = manager.timer_statistics(1).unwrap();
        assert_eq!(stats.fired, 3);
        assert_eq!(stats.wake_requests, 3);
        assert_eq!(stats.last_started_us, Some(0));
        assert_eq!(sim.wake_hints(), 3);

        manager.stop_timer(1).unwrap();
        assert_eq!(manager.is_timer_running(1), Ok(false));
        assert_eq!(sim.advance(5_000), 0);

        manager.reset_timer_statistics(1).unwrap();
        assert_eq!(manager.timer_statistics(1).unwrap().fired, 0);
    }

    #[test]
    fn test_duplicate_id_keeps_first_timer() {
        static FIRST: StdAtomicU32 = StdAtomicU32::new(0);
        static SECOND: StdAtomicU32 = StdAtomicU32::new(0);
        fn first() -> bool {
            FIRST.fetch_add(1, StdOrdering::SeqCst);
            false
        }
        fn second() -> bool {
            SECOND.fetch_add(1, StdOrdering::SeqCst);
            false
        }

        let sim = SimTimers::new();
        let manager = leaked(&sim, &SimInterrupts::new());
        manager.create_high_res(7, hr(1_000), first).unwrap();
        manager.start_timer(7).unwrap();

        assert_eq!(
            manager.create_high_res(7, hr(200), second),
            Err(Error::InvalidArgument)
        );
        assert_eq!(manager.timer_count(), 1);
        assert_eq!(sim.allocated(), 1);
        assert_eq!(manager.is_timer_running(7), Ok(true));

        sim.advance(2_000);
        assert_eq!(FIRST.load(StdOrdering::SeqCst), 2);
        assert_eq!(SECOND.load(StdOrdering::SeqCst), 0);
    }

    #[test]
    fn test_one_shot_fires_once() {
        static HITS: StdAtomicU32 = StdAtomicU32::new(0);
        fn cb() -> bool {
            HITS.fetch_add(1, StdOrdering::SeqCst);
            false
        }

        let sim = SimTimers::new();
        let manager = leaked(&sim, &SimInterrupts::new());
        manager.start_one_shot(3, 500, cb).unwrap();
        assert_eq!(sim.advance(10_000), 1);
        assert_eq!(HITS.load(StdOrdering::SeqCst), 1);
        assert_eq!(manager.is_timer_running(3), Ok(false));
        assert_eq!(manager.timer_statistics(3).unwrap().wake_requests, 0);

        // A fired one-shot can be re-armed
        manager.start_timer(3).unwrap();
        sim.advance(500);
        assert_eq!(HITS.load(StdOrdering::SeqCst), 2);
    }

    #[test]
    fn test_delete_frees_id() {
        fn cb() -> bool {
            false
        }

        let sim = SimTimers::new();
        let manager = leaked(&sim, &SimInterrupts::new());
        manager.create_high_res(1, hr(100), cb).unwrap();
        manager.start_timer(1).unwrap();
        manager.delete_timer(1).unwrap();
        assert_eq!(sim.allocated(), 0);
        assert_eq!(manager.delete_timer(1), Err(Error::NotFound));
        manager.create_high_res(1, hr(100), cb).unwrap();
    }

    #[test]
    fn test_counter_period_and_count() {
        fn cb() -> bool {
            false
        }

        let sim = SimTimers::new();
        let manager = leaked(&sim, &SimInterrupts::new());
        let config = CounterConfig {
            resolution_hz: 10_000,
            alarm_count: 10,
            ..Default::default()
        };
        manager.create_general_purpose(2, config, cb).unwrap();
        manager.set_period(2, 5_000).unwrap();
        let TimerKind::Counter(updated) = manager.timer_kind(2).unwrap() else {
            panic!("counter expected");
        };
        assert_eq!(updated.alarm_count, 50);

        manager.set_count(2, 7).unwrap();
        assert_eq!(manager.count(2), Ok(7));

        manager.create_high_res(4, hr(100), cb).unwrap();
        assert_eq!(manager.count(4), Err(Error::InvalidArgument));
        assert_eq!(manager.set_alarm_count(4, 10, true), Err(Error::InvalidArgument));
        assert_eq!(manager.set_period(2, 0), Err(Error::InvalidArgument));
        assert_eq!(
            manager.create_general_purpose(5, CounterConfig { resolution_hz: 0, ..config }, cb),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_interrupt_dispatch_and_statistics() {
        static HITS: StdAtomicU32 = StdAtomicU32::new(0);
        fn handler() {
            HITS.fetch_add(1, StdOrdering::SeqCst);
        }

        let irqs = SimInterrupts::new();
        let manager = leaked(&SimTimers::new(), &irqs);
        manager.register_interrupt(1, source(20), handler).unwrap();
        assert_eq!(
            manager.register_interrupt(1, source(21), handler),
            Err(Error::InvalidArgument)
        );

        // Disabled sources count as missed
        irqs.trigger(20);
        assert_eq!(HITS.load(StdOrdering::SeqCst), 0);

        manager.enable_interrupt(1).unwrap();
        assert!(irqs.is_enabled(20));
        irqs.trigger(20);
        irqs.trigger(20);
        assert_eq!(HITS.load(StdOrdering::SeqCst), 2);
        assert_eq!(
            manager.interrupt_statistics(1),
            Ok(InterruptStatistics { fired: 2, missed: 1 })
        );

        manager.unregister_interrupt(1).unwrap();
        assert_eq!(irqs.allocated(), 0);
        assert_eq!(manager.enable_interrupt(1), Err(Error::NotFound));
    }

    #[test]
    fn test_mask_token_round_trip() {
        static HITS: StdAtomicU32 = StdAtomicU32::new(0);
        fn handler() {
            HITS.fetch_add(1, StdOrdering::SeqCst);
        }

        let irqs = SimInterrupts::new();
        let manager = leaked(&SimTimers::new(), &irqs);
        manager.register_interrupt(2, source(30), handler).unwrap();
        manager.enable_interrupt(2).unwrap();

        let outer = manager.disable_all_interrupts();
        let inner = manager.disable_all_interrupts();
        assert!(!irqs.trigger(30));
        manager.restore_interrupts(inner);
        assert!(irqs.is_masked());
        assert_eq!(HITS.load(StdOrdering::SeqCst), 0);
        manager.restore_interrupts(outer);
        assert!(!irqs.is_masked());
        assert_eq!(HITS.load(StdOrdering::SeqCst), 1);
    }

    #[test]
    fn test_optional_controller_features() {
        fn handler() {}

        let plain = SimInterrupts::new();
        let manager = leaked(&SimTimers::new(), &plain);
        manager.register_interrupt(1, source(5), handler).unwrap();
        assert_eq!(
            manager.set_interrupt_priority(1, Priority::Level3),
            Err(Error::Unsupported)
        );
        assert_eq!(manager.set_cpu_affinity(1, 0b01), Err(Error::Unsupported));

        let capable = SimInterrupts::with_capabilities(Capabilities {
            cpu_affinity: true,
            runtime_priority: true,
        });
        let manager = leaked(&SimTimers::new(), &capable);
        manager.register_interrupt(1, source(5), handler).unwrap();
        manager.set_interrupt_priority(1, Priority::Level3).unwrap();
        assert_eq!(capable.priority(5), Some(Priority::Level3));
        assert_eq!(manager.interrupt_config(1).unwrap().priority, Priority::Level3);
        manager.set_cpu_affinity(1, 0b10).unwrap();
        assert_eq!(capable.affinity(5), Some(0b10));
        assert_eq!(manager.set_cpu_affinity(1, 0), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_stop_halts_and_start_resumes() {
        fn cb() -> bool {
            false
        }
        fn handler() {}

        let sim = SimTimers::new();
        let irqs = SimInterrupts::new();
        let manager = leaked(&sim, &irqs);
        manager.start().unwrap();
        manager.create_high_res(1, hr(1_000), cb).unwrap();
        manager.create_high_res(2, hr(1_000), cb).unwrap();
        manager.start_timer(1).unwrap();
        manager.register_interrupt(1, source(9), handler).unwrap();
        manager.enable_interrupt(1).unwrap();

        manager.stop().unwrap();
        assert_eq!(manager.state(), State::Suspended);
        assert_eq!(manager.is_timer_running(1), Ok(false));
        assert!(!irqs.is_enabled(9));
        assert_eq!(sim.advance(5_000), 0);

        manager.start().unwrap();
        assert_eq!(manager.is_timer_running(1), Ok(true));
        assert_eq!(manager.is_timer_running(2), Ok(false));
        assert!(irqs.is_enabled(9));
        assert_eq!(sim.advance(1_000), 1);
    }

    #[test]
    fn test_reset_releases_everything() {
        fn cb() -> bool {
            false
        }
        fn handler() {}

        let sim = SimTimers::new();
        let irqs = SimInterrupts::new();
        let manager = leaked(&sim, &irqs);
        manager.create_high_res(1, hr(1_000), cb).unwrap();
        manager.start_timer(1).unwrap();
        manager.register_interrupt(1, source(11), handler).unwrap();

        manager.reset().unwrap();
        assert_eq!(manager.state(), State::Initialized);
        assert_eq!(manager.timer_count(), 0);
        assert_eq!(manager.interrupt_count(), 0);
        assert_eq!(sim.allocated(), 0);
        assert_eq!(irqs.allocated(), 0);

        // Ids are free again without going through start
        manager.create_high_res(1, hr(1_000), cb).unwrap();
        manager.start_timer(1).unwrap();
        manager.register_interrupt(1, source(11), handler).unwrap();
        assert_eq!(manager.is_timer_running(1), Ok(true));
        assert_eq!(manager.timer_count(), 1);
        assert_eq!(manager.interrupt_count(), 1);
        assert_eq!(sim.allocated(), 1);
        assert_eq!(manager.state(), State::Initialized);
    }

    #[test]
    fn test_now_follows_driver_clock() {
        let sim = SimTimers::new();
        let manager = leaked(&sim, &SimInterrupts::new());
        sim.advance(1_234);
        assert_eq!(manager.now_us(), Ok(1_234));
        assert!(!manager.in_isr());
        assert_eq!(manager.current_cpu(), 0);
    }
}
