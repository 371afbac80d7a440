use core::cell::Cell;

use critical_section::Mutex;

use crate::stream::wait_for_interrupt;

/// Single value passed from an interrupt handler to the foreground.
///
/// The producer [`post`](Self::post)s a value, the consumer either polls with
/// [`try_take`](Self::try_take) or blocks in [`wait`](Self::wait).
pub struct Handoff<T> {
    slot: Mutex<Cell<Option<T>>>,
}

impl<T> Handoff<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(None)),
        }
    }

    /// Store `value`, returning a previous value nobody took.
    pub fn post(&self, value: T) -> Option<T> {
        critical_section::with(|cs| self.slot.borrow(cs).replace(Some(value)))
    }

    pub fn try_take(&self) -> Option<T> {
        critical_section::with(|cs| self.slot.borrow(cs).take())
    }

    pub fn is_ready(&self) -> bool {
        critical_section::with(|cs| {
            let cell = self.slot.borrow(cs);
            let value = cell.take();
            let ready = value.is_some();
            cell.set(value);
            ready
        })
    }

    /// Block until a value is posted and take it.
    pub fn wait(&self) -> T {
        loop {
            if let Some(value) = self.try_take() {
                return value;
            }
            wait_for_interrupt();
        }
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}
