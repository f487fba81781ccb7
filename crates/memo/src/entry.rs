use crate::signal::Signal;

/// The lifecycle state of a memoized entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// The computation for this key is still in flight.
    Pending,
    /// The result for this key is available and will never change.
    Ready,
}

/// Per-key state of a [`Memo`](crate::Memo).
///
/// Created by the caller that becomes the owner of the key; the result is published exactly once
/// through the inner [`Signal`].
#[derive(Debug)]
pub(crate) struct Entry<K, T> {
    key: K,
    result: Signal<T>,
}

impl<K, T> Entry<K, T> {
    pub fn new(key: K) -> Self {
        Self {
            key,
            result: Signal::new(),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn state(&self) -> EntryState {
        if self.result.is_set() {
            EntryState::Ready
        } else {
            EntryState::Pending
        }
    }

    pub fn publish(&self, result: T) -> Result<&T, T> {
        self.result.publish(result)
    }

    pub fn abandon(&self) -> bool {
        self.result.abandon()
    }

    /// Blocks until the owner publishes; `None` if the owner gave up.
    pub fn wait(&self) -> Option<&T> {
        self.result.wait()
    }

    pub fn get(&self) -> Option<&T> {
        self.result.get()
    }
}
