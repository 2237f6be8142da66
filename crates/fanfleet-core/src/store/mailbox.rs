// ── Single-slot mailbox ──
//
// Shared between a device's worker and the rest of the Master. Never
// shares a lock with the device session, and no operation blocks longer
// than a slot swap.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// One-value slot with non-blocking put/take.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, replacing any unread one. Returns `true` if a value
    /// was overwritten.
    pub fn put(&self, value: T) -> bool {
        self.lock().replace(value).is_some()
    }

    /// Store `value` only if the slot is empty; hands it back otherwise.
    pub fn try_put(&self, value: T) -> Result<(), T> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(value);
        }
        *slot = Some(value);
        Ok(())
    }

    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // A panicked holder cannot leave a half-written `Option`.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Mailbox<T> {
    /// Clone the unread value without consuming it.
    pub fn peek(&self) -> Option<T> {
        self.lock().clone()
    }
}
