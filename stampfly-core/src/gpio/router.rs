//! Process-wide pin to manager table
//!
//! The GPIO interrupt vector only receives a pin number. This table maps
//! each pin to the manager that attached an interrupt to it. Entries are
//! published by `set_interrupt` and removed on detach, reset and drop.

use stampfly_hal::gpio::MAX_PINS;

use crate::error::{Error, Result};
use crate::isr::{self, Slot};

/// Receiver of pin interrupts
pub trait EdgeSink: Sync {
    /// Handle an interrupt on `pin` (interrupt context)
    fn on_edge(&self, pin: u8);
}

static ROUTER: [Slot<&'static dyn EdgeSink>; MAX_PINS] = [const { isr::empty() }; MAX_PINS];

fn address(owner: &dyn EdgeSink) -> *const () {
    (owner as *const dyn EdgeSink).cast::<()>()
}

/// GPIO interrupt vector
///
/// Installed once per port as the shared interrupt service. Looks up the
/// owning manager without taking any lock other than a short critical
/// section.
pub fn dispatch_edge(pin: u8) {
    let Some(slot) = ROUTER.get(pin as usize) else {
        return;
    };
    if let Some(owner) = isr::load(slot) {
        owner.on_edge(pin);
    }
}

/// Check if any manager has an interrupt attached to `pin`
pub fn is_routed(pin: u8) -> bool {
    ROUTER
        .get(pin as usize)
        .is_some_and(|slot| isr::load(slot).is_some())
}

/// Claim `pin` for `owner`
///
/// Fails with [`Error::InvalidState`] if another manager owns the pin.
pub(crate) fn publish(pin: u8, owner: &'static dyn EdgeSink) -> Result<()> {
    let slot = ROUTER.get(pin as usize).ok_or(Error::InvalidArgument)?;
    critical_section::with(|cs| {
        let cell = slot.borrow(cs);
        match cell.get() {
            Some(current) if address(current) != address(owner) => Err(Error::InvalidState),
            _ => {
                cell.set(Some(owner));
                Ok(())
            }
        }
    })
}

/// Release `pin` if it is owned by the manager at `owner`
pub(crate) fn unpublish(pin: u8, owner: *const ()) {
    let Some(slot) = ROUTER.get(pin as usize) else {
        return;
    };
    critical_section::with(|cs| {
        let cell = slot.borrow(cs);
        if cell.get().is_some_and(|current| address(current) == owner) {
            cell.set(None);
        }
    })
}
