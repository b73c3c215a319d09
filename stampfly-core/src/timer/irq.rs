//! Raw interrupt operations

use embassy_sync::blocking_mutex::raw::RawMutex;
use portable_atomic::Ordering;
use stampfly_hal::interrupt::{
    Capabilities, InterruptController, IrqRoute, Priority, SourceConfig,
};
use stampfly_hal::timer::TimerDriver;

use super::{Inner, InterruptHandler, InterruptStatistics, IrqEntry, IrqSlot, TimerManager};
use crate::error::{Error, Result};
use crate::isr;

/// Saved global interrupt mask
///
/// Returned by [`TimerManager::disable_all_interrupts`] and consumed by
/// [`TimerManager::restore_interrupts`]. Nested sections restore in
/// reverse order.
#[must_use = "interrupts stay masked until the state is restored"]
#[derive(Debug, PartialEq, Eq)]
pub struct IrqState(u32);

impl<M, T, C> TimerManager<M, T, C>
where
    M: RawMutex + Sync + 'static,
    T: TimerDriver + Send + 'static,
    C: InterruptController + Sync + 'static,
{
    /// Attach a handler to a peripheral interrupt source
    ///
    /// The source starts disabled.
    pub fn register_interrupt(
        &'static self,
        id: u32,
        config: SourceConfig,
        handler: InterruptHandler,
    ) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            if inner.interrupts.contains_key(&id) {
                warn!("timer: interrupt id {} already registered", id);
                return Err(Error::InvalidArgument);
            }
            let slot = inner.free_irq_slot().ok_or(Error::NoMemory)?;

            let cell = &self.irqs[slot as usize];
            isr::store(
                cell,
                Some(IrqSlot {
                    handler,
                    enabled: false,
                }),
            );
            if let Err(fault) = self.controller.allocate(&config, IrqRoute { sink: self, slot }) {
                isr::store(cell, None);
                return Err(fault.into());
            }
            self.clear_irq_counters(slot);

            let entry = IrqEntry {
                slot,
                config,
                resume: false,
            };
            inner.interrupts.insert(id, entry).map_err(|_| Error::NoMemory)?;
            debug!("timer: source {} registered as {}", config.source, id);
            Ok(())
        })
    }
}

impl<M: RawMutex, T: TimerDriver, C: InterruptController> TimerManager<M, T, C> {
    fn with_interrupt<R>(
        &self,
        id: u32,
        f: impl FnOnce(&mut Inner<T>, IrqEntry) -> Result<R>,
    ) -> Result<R> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            let entry = inner.interrupt(id)?;
            f(&mut *inner, entry)
        })
    }

    /// Disable and detach a source
    pub fn unregister_interrupt(&self, id: u32) -> Result<()> {
        self.with_interrupt(id, |inner, entry| {
            let _ = self.controller.disable(entry.config.source);
            self.controller.free(entry.config.source)?;
            isr::store(&self.irqs[entry.slot as usize], None);
            self.clear_irq_counters(entry.slot);
            inner.interrupts.remove(&id);
            Ok(())
        })
    }

    /// Unmask a source
    pub fn enable_interrupt(&self, id: u32) -> Result<()> {
        self.with_interrupt(id, |inner, entry| {
            let cell = &self.irqs[entry.slot as usize];
            isr::update(cell, |r| r.enabled = true);
            if let Err(fault) = self.controller.enable(entry.config.source) {
                isr::update(cell, |r| r.enabled = false);
                return Err(fault.into());
            }
            if let Some(entry) = inner.interrupts.get_mut(&id) {
                entry.resume = false;
            }
            Ok(())
        })
    }

    /// Mask a source
    pub fn disable_interrupt(&self, id: u32) -> Result<()> {
        self.with_interrupt(id, |inner, entry| {
            self.controller.disable(entry.config.source)?;
            isr::update(&self.irqs[entry.slot as usize], |r| r.enabled = false);
            if let Some(entry) = inner.interrupts.get_mut(&id) {
                entry.resume = false;
            }
            Ok(())
        })
    }

    /// Check if a source is enabled
    pub fn is_interrupt_enabled(&self, id: u32) -> Result<bool> {
        self.with_interrupt(id, |_, entry| {
            Ok(isr::load(&self.irqs[entry.slot as usize]).is_some_and(|r| r.enabled))
        })
    }

    /// Change the priority of a registered source
    ///
    /// Returns [`Error::Unsupported`] if the controller cannot change
    /// priorities after allocation.
    pub fn set_interrupt_priority(&self, id: u32, priority: Priority) -> Result<()> {
        self.with_interrupt(id, |inner, entry| {
            if !self.controller.capabilities().runtime_priority {
                return Err(Error::Unsupported);
            }
            self.controller.set_priority(entry.config.source, priority)?;
            if let Some(entry) = inner.interrupts.get_mut(&id) {
                entry.config.priority = priority;
            }
            Ok(())
        })
    }

    /// Restrict a source to the CPUs in `cpu_mask`
    ///
    /// Returns [`Error::Unsupported`] if the controller cannot pin handlers.
    pub fn set_cpu_affinity(&self, id: u32, cpu_mask: u32) -> Result<()> {
        self.with_interrupt(id, |_, entry| {
            if !self.controller.capabilities().cpu_affinity {
                return Err(Error::Unsupported);
            }
            Ok(self.controller.set_cpu_affinity(entry.config.source, cpu_mask)?)
        })
    }

    /// Registration of one source
    pub fn interrupt_config(&self, id: u32) -> Result<SourceConfig> {
        self.with_interrupt(id, |_, entry| Ok(entry.config))
    }

    /// Counters of one source
    pub fn interrupt_statistics(&self, id: u32) -> Result<InterruptStatistics> {
        self.with_interrupt(id, |_, entry| {
            let i = entry.slot as usize;
            Ok(InterruptStatistics {
                fired: self.irq_fired[i].load(Ordering::Relaxed),
                missed: self.irq_missed[i].load(Ordering::Relaxed),
            })
        })
    }

    /// Zero the counters of one source
    pub fn reset_interrupt_statistics(&self, id: u32) -> Result<()> {
        self.with_interrupt(id, |_, entry| {
            self.clear_irq_counters(entry.slot);
            Ok(())
        })
    }

    /// Number of registered sources
    pub fn interrupt_count(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().interrupts.len())
    }

    /// Optional features of the interrupt controller
    pub fn capabilities(&self) -> Capabilities {
        self.controller.capabilities()
    }

    /// Mask every maskable interrupt on the current core
    ///
    /// Usable in any lifecycle state, including from interrupt context.
    pub fn disable_all_interrupts(&self) -> IrqState {
        IrqState(self.controller.mask_all())
    }

    /// Restore the mask saved by [`TimerManager::disable_all_interrupts`]
    pub fn restore_interrupts(&self, state: IrqState) {
        self.controller.restore(state.0)
    }

    /// Index of the executing core
    pub fn current_cpu(&self) -> u8 {
        self.controller.current_cpu()
    }

    /// Check if executing in interrupt context
    pub fn in_isr(&self) -> bool {
        self.controller.in_isr()
    }
}
