//! Raw interrupt source abstractions

use bitflags::bitflags;

use crate::error::Fault;

/// Interrupt priority level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    /// Lowest maskable level
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
    Level4 = 4,
    /// Highest maskable level
    Level5 = 5,
    /// Non-maskable
    Nmi = 7,
}

impl Priority {
    /// Numeric level as programmed into the controller
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Check if this level cannot be masked
    pub fn is_non_maskable(self) -> bool {
        self == Priority::Nmi
    }
}

bitflags! {
    /// Allocation flags for an interrupt source
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InterruptFlags: u32 {
        /// Level triggered
        const LEVEL = 1 << 0;
        /// Edge triggered
        const EDGE = 1 << 1;
        /// Line may be shared with other handlers
        const SHARED = 1 << 2;
        /// Handler runs from IRAM (cache may be disabled)
        const IRAM = 1 << 3;
        /// High priority (level 4 and up)
        const HIGH = 1 << 4;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for InterruptFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "InterruptFlags({=u32:#x})", self.bits())
    }
}

/// Raw interrupt source registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourceConfig {
    /// Peripheral interrupt source number
    pub source: u32,
    /// Priority level
    pub priority: Priority,
    /// Allocation flags
    pub flags: InterruptFlags,
}

/// Receiver of raw interrupts
///
/// Called from interrupt context. Implementations must not block.
pub trait IrqSink: Sync {
    /// Handle an interrupt for `slot`
    fn on_irq(&self, slot: u8);
}

/// Interrupt argument handed to the controller for one source
#[derive(Clone, Copy)]
pub struct IrqRoute {
    /// Owning manager
    pub sink: &'static dyn IrqSink,
    /// Slot inside the owning manager
    pub slot: u8,
}

impl IrqRoute {
    /// Deliver the interrupt
    pub fn fire(&self) {
        self.sink.on_irq(self.slot)
    }
}

impl core::fmt::Debug for IrqRoute {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqRoute").field("slot", &self.slot).finish()
    }
}

/// Optional controller features
///
/// Some chips (or some driver versions) cannot change a priority after
/// allocation or pin a handler to a core. Callers check these before using
/// the corresponding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    /// [`InterruptController::set_cpu_affinity`] is enforced
    pub cpu_affinity: bool,
    /// [`InterruptController::set_priority`] is enforced
    pub runtime_priority: bool,
}

/// Interrupt controller
///
/// All methods take `&self`: the controller is shared between thread
/// context and the global masking primitive.
pub trait InterruptController {
    /// Allocate and attach a handler route to a source (disabled)
    fn allocate(&self, config: &SourceConfig, route: IrqRoute) -> Result<(), Fault>;

    /// Detach and free a source
    fn free(&self, source: u32) -> Result<(), Fault>;

    /// Unmask a source
    fn enable(&self, source: u32) -> Result<(), Fault>;

    /// Mask a source
    fn disable(&self, source: u32) -> Result<(), Fault>;

    /// Features this controller supports
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Change the priority of an allocated source
    fn set_priority(&self, _source: u32, _priority: Priority) -> Result<(), Fault> {
        Err(Fault::Unsupported)
    }

    /// Restrict a source to the CPUs in `cpu_mask`
    fn set_cpu_affinity(&self, _source: u32, _cpu_mask: u32) -> Result<(), Fault> {
        Err(Fault::Unsupported)
    }

    /// Mask every maskable interrupt on this core, returning the previous
    /// mask state
    fn mask_all(&self) -> u32;

    /// Restore a mask state returned by [`InterruptController::mask_all`]
    fn restore(&self, state: u32);

    /// Index of the executing core
    fn current_cpu(&self) -> u8 {
        0
    }

    /// Check if executing in interrupt context
    fn in_isr(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_levels() {
        assert_eq!(Priority::Level1.level(), 1);
        assert_eq!(Priority::Level5.level(), 5);
        assert_eq!(Priority::Nmi.level(), 7);
        assert!(Priority::Nmi.is_non_maskable());
        assert!(Priority::Level3 < Priority::Level4);
    }

    #[test]
    fn test_flags_combine() {
        let flags = InterruptFlags::EDGE | InterruptFlags::IRAM;
        assert!(flags.contains(InterruptFlags::IRAM));
        assert!(!flags.contains(InterruptFlags::SHARED));
    }
}
