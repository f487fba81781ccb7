use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Unset,
    Set,
    Abandoned,
}

/// A one-shot broadcast signal carrying a payload.
///
/// Exactly one producer [publishes](Self::publish) a value, after which any number of consumers
/// can [wait](Self::wait) for it. Waiting on a signal that already fired returns immediately, and
/// reading the payload after that point does not take any lock.
///
/// A producer that can no longer deliver may [abandon](Self::abandon) the signal instead, which
/// wakes every waiter with `None`.
pub struct Signal<T> {
    value: OnceLock<T>,
    status: Mutex<Status>,
    fired: Condvar,
}

impl<T> Signal<T> {
    /// Creates a new signal that has not fired yet.
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            status: Mutex::new(Status::Unset),
            fired: Condvar::new(),
        }
    }

    /// Stores `value` and wakes all waiters.
    ///
    /// Returns a reference to the stored payload. If the signal already fired or was abandoned,
    /// the signal is left untouched and `value` is handed back.
    pub fn publish(&self, value: T) -> Result<&T, T> {
        let mut status = self.status();
        if *status != Status::Unset {
            return Err(value);
        }
        // only `publish` fills the cell, and only while `Unset` under this lock,
        // so the payload always lands here before anyone can observe `Set`
        let stored = self.value.get_or_init(|| value);
        *status = Status::Set;
        drop(status);

        self.fired.notify_all();
        Ok(stored)
    }

    /// Marks the signal as never going to fire and wakes all waiters.
    ///
    /// Returns `false` if the signal already fired or was abandoned before.
    pub fn abandon(&self) -> bool {
        let mut status = self.status();
        if *status != Status::Unset {
            return false;
        }
        *status = Status::Abandoned;
        drop(status);

        self.fired.notify_all();
        true
    }

    /// Blocks until the signal fires and returns its payload.
    ///
    /// Returns `None` if the signal was abandoned.
    pub fn wait(&self) -> Option<&T> {
        if let Some(value) = self.value.get() {
            return Some(value);
        }

        let status = self
            .fired
            .wait_while(self.status(), |status| *status == Status::Unset)
            .unwrap_or_else(PoisonError::into_inner);

        match *status {
            Status::Set => self.value.get(),
            Status::Unset | Status::Abandoned => None,
        }
    }

    /// Returns the payload if the signal has fired, without blocking.
    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    /// Whether the signal has fired.
    pub fn is_set(&self) -> bool {
        self.value.get().is_some()
    }

    /// Whether the signal was abandoned by its producer.
    pub fn is_abandoned(&self) -> bool {
        *self.status() == Status::Abandoned
    }

    // Nothing that can panic ever runs under this lock, so poisoning carries no information.
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status.try_lock().map(|status| *status).ok();
        f.debug_struct("Signal")
            .field("status", &status)
            .field("value", &self.value.get())
            .finish()
    }
}
