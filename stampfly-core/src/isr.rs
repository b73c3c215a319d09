//! Interrupt-visible slots
//!
//! A slot holds a small `Copy` route that interrupt handlers read with a
//! short critical section. The handler never runs its callback while the
//! critical section is held.

use core::cell::Cell;

/// Route slot shared between thread and interrupt context
pub(crate) type Slot<T> = critical_section::Mutex<Cell<Option<T>>>;

/// Empty slot
pub(crate) const fn empty<T>() -> Slot<T> {
    critical_section::Mutex::new(Cell::new(None))
}

/// Snapshot a slot
pub(crate) fn load<T: Copy>(slot: &Slot<T>) -> Option<T> {
    critical_section::with(|cs| slot.borrow(cs).get())
}

/// Replace a slot, returning the previous route
pub(crate) fn store<T: Copy>(slot: &Slot<T>, value: Option<T>) -> Option<T> {
    critical_section::with(|cs| slot.borrow(cs).replace(value))
}

/// Update a slot in place if it is occupied
pub(crate) fn update<T: Copy>(slot: &Slot<T>, f: impl FnOnce(&mut T)) {
    critical_section::with(|cs| {
        let cell = slot.borrow(cs);
        if let Some(mut route) = cell.get() {
            f(&mut route);
            cell.set(Some(route));
        }
    })
}
