//! Simulated interrupt controller
//!
//! Sources are raised with [`SimInterrupts::trigger`]. While interrupts are
//! globally masked the request is latched and delivered when the mask is
//! restored.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use stampfly_hal::interrupt::{
    Capabilities, InterruptController, IrqRoute, Priority, SourceConfig,
};
use stampfly_hal::Fault;

use crate::lock;

/// Mask level written by [`InterruptController::mask_all`]
const MASKED_LEVEL: u32 = 5;

#[derive(Debug, Clone, Copy)]
struct SimSource {
    config: SourceConfig,
    route: IrqRoute,
    enabled: bool,
    affinity: u32,
}

#[derive(Debug, Default)]
struct IrqState {
    sources: BTreeMap<u32, SimSource>,
    level: u32,
    pending: Vec<IrqRoute>,
    capabilities: Capabilities,
}

/// Simulated interrupt controller
#[derive(Debug, Clone, Default)]
pub struct SimInterrupts {
    state: Arc<Mutex<IrqState>>,
    isr_depth: Arc<AtomicUsize>,
}

impl SimInterrupts {
    /// Controller without optional features
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller reporting the given optional features
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        let sim = Self::default();
        lock(&sim.state).capabilities = capabilities;
        sim
    }

    /// Raise a source line
    ///
    /// The handler runs whether or not the source is enabled; shared lines
    /// deliver to every attached handler and the handler decides. Returns
    /// false if nothing is attached or the request was latched by the
    /// global mask.
    pub fn trigger(&self, source: u32) -> bool {
        let route = {
            let mut state = lock(&self.state);
            let Some(route) = state.sources.get(&source).map(|s| s.route) else {
                return false;
            };
            if state.level != 0 {
                state.pending.push(route);
                return false;
            }
            route
        };
        self.deliver(route);
        true
    }

    /// Check if a source is unmasked in the controller
    pub fn is_enabled(&self, source: u32) -> bool {
        lock(&self.state)
            .sources
            .get(&source)
            .is_some_and(|s| s.enabled)
    }

    /// Priority programmed for a source
    pub fn priority(&self, source: u32) -> Option<Priority> {
        lock(&self.state)
            .sources
            .get(&source)
            .map(|s| s.config.priority)
    }

    /// CPU mask programmed for a source
    pub fn affinity(&self, source: u32) -> Option<u32> {
        lock(&self.state).sources.get(&source).map(|s| s.affinity)
    }

    /// Check if interrupts are globally masked
    pub fn is_masked(&self) -> bool {
        lock(&self.state).level != 0
    }

    /// Number of allocated sources
    pub fn allocated(&self) -> usize {
        lock(&self.state).sources.len()
    }

    fn deliver(&self, route: IrqRoute) {
        self.isr_depth.fetch_add(1, Ordering::SeqCst);
        route.fire();
        self.isr_depth.fetch_sub(1, Ordering::SeqCst);
    }

    fn with_source<R>(&self, source: u32, f: impl FnOnce(&mut SimSource) -> R) -> Result<R, Fault> {
        let mut state = lock(&self.state);
        state.sources.get_mut(&source).map(f).ok_or(Fault::NotFound)
    }
}

impl InterruptController for SimInterrupts {
    fn allocate(&self, config: &SourceConfig, route: IrqRoute) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.sources.contains_key(&config.source) {
            return Err(Fault::InvalidState);
        }
        state.sources.insert(
            config.source,
            SimSource {
                config: *config,
                route,
                enabled: false,
                affinity: 0b11,
            },
        );
        Ok(())
    }

    fn free(&self, source: u32) -> Result<(), Fault> {
        lock(&self.state)
            .sources
            .remove(&source)
            .map(|_| ())
            .ok_or(Fault::NotFound)
    }

    fn enable(&self, source: u32) -> Result<(), Fault> {
        self.with_source(source, |s| s.enabled = true)
    }

    fn disable(&self, source: u32) -> Result<(), Fault> {
        self.with_source(source, |s| s.enabled = false)
    }

    fn capabilities(&self) -> Capabilities {
        lock(&self.state).capabilities
    }

    fn set_priority(&self, source: u32, priority: Priority) -> Result<(), Fault> {
        if !self.capabilities().runtime_priority {
            return Err(Fault::Unsupported);
        }
        self.with_source(source, |s| s.config.priority = priority)
    }

    fn set_cpu_affinity(&self, source: u32, cpu_mask: u32) -> Result<(), Fault> {
        if !self.capabilities().cpu_affinity {
            return Err(Fault::Unsupported);
        }
        if cpu_mask == 0 || cpu_mask > 0b11 {
            return Err(Fault::InvalidArgument);
        }
        self.with_source(source, |s| s.affinity = cpu_mask)
    }

    fn mask_all(&self) -> u32 {
        let mut state = lock(&self.state);
        let previous = state.level;
        state.level = MASKED_LEVEL;
        previous
    }

    fn restore(&self, saved: u32) {
        let pending = {
            let mut state = lock(&self.state);
            state.level = saved;
            if saved != 0 {
                return;
            }
            std::mem::take(&mut state.pending)
        };
        for route in pending {
            self.deliver(route);
        }
    }

    fn in_isr(&self) -> bool {
        self.isr_depth.load(Ordering::SeqCst) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampfly_hal::interrupt::{InterruptFlags, IrqSink};
    use std::sync::atomic::AtomicU32;

    struct Hits(AtomicU32);

    impl IrqSink for Hits {
        fn on_irq(&self, _slot: u8) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    static HITS: Hits = Hits(AtomicU32::new(0));

    #[test]
    fn test_masked_requests_are_latched() {
        let irq = SimInterrupts::new();
        let config = SourceConfig {
            source: 17,
            priority: Priority::Level3,
            flags: InterruptFlags::LEVEL,
        };
        irq.allocate(&config, IrqRoute { sink: &HITS, slot: 0 }).unwrap();
        irq.enable(17).unwrap();

        let saved = irq.mask_all();
        assert!(!irq.trigger(17));
        assert_eq!(HITS.0.load(Ordering::SeqCst), 0);
        irq.restore(saved);
        assert_eq!(HITS.0.load(Ordering::SeqCst), 1);
        assert!(!irq.is_masked());
    }

    #[test]
    fn test_optional_features_rejected() {
        let irq = SimInterrupts::new();
        assert_eq!(irq.set_priority(1, Priority::Level2), Err(Fault::Unsupported));
        assert_eq!(irq.set_cpu_affinity(1, 1), Err(Fault::Unsupported));
    }
}
