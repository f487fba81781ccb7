use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::defer::defer;
use crate::entry::{Entry, EntryState};

/// The computation behind a [`Memo`].
///
/// This is implemented for every `Fn(&K) -> Result<V, E>`, so most users just pass a closure.
/// Implementations may be slow and may fail. The [`Memo`] never runs them concurrently for the
/// same key, but will happily do so for different keys.
pub trait Compute<K: ?Sized> {
    /// The value produced by a successful computation.
    type Value;
    /// The error produced by a failed computation.
    type Error;

    /// Computes the result for `key`.
    fn compute(&self, key: &K) -> Result<Self::Value, Self::Error>;
}

impl<K, F, V, E> Compute<K> for F
where
    K: ?Sized,
    F: Fn(&K) -> Result<V, E>,
{
    type Value = V;
    type Error = E;

    fn compute(&self, key: &K) -> Result<V, E> {
        self(key)
    }
}

/// The result of a [`Compute`] invocation, as stored in a [`Memo`].
pub type Outcome<K, F> = Result<<F as Compute<K>>::Value, <F as Compute<K>>::Error>;

type MemoEntry<K, F> = Arc<Entry<K, Outcome<K, F>>>;

/// A blocking memoizing cache.
///
/// Wraps a [`Compute`] and guarantees that it runs at most once per distinct key, across any
/// number of concurrent and sequential [`get`](Self::get) calls. All callers for a key observe a
/// clone of the very same result, and failed computations are memoized just like successful ones.
///
/// The lock protecting the key map is only ever held to look up or insert an entry. It is never
/// held while computing or while waiting for another caller's computation, so a slow key does not
/// hold up callers asking for other keys.
///
/// A `Memo` is meant to be constructed once and shared by reference, or behind an [`Arc`].
pub struct Memo<K, F>
where
    F: Compute<K>,
{
    name: Cow<'static, str>,
    func: F,
    entries: Mutex<HashMap<K, MemoEntry<K, F>>>,
}

impl<K, F> Memo<K, F>
where
    K: Eq + Hash,
    F: Compute<K>,
{
    /// Creates an empty memo around `func`.
    pub fn new(func: F) -> Self {
        Self::with_name("memo", func)
    }

    /// Creates an empty memo around `func`, with a name that identifies it in logs.
    pub fn with_name(name: impl Into<Cow<'static, str>>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The name of this memo.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the memoized result for `key`, computing it if this is the first request.
    ///
    /// The first caller for a key runs the computation, without holding any lock. Concurrent
    /// callers for the same key block until that result is published, and later callers get it
    /// right away.
    ///
    /// If the computation panics, the panic propagates to the caller that ran it, nothing is
    /// cached, and one of the callers waiting for that key computes it again.
    pub fn get<Q>(&self, key: &Q) -> Outcome<K, F>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F::Value: Clone,
        F::Error: Clone,
    {
        loop {
            let (entry, is_owner) = self.lookup_or_insert(key);
            if is_owner {
                return self.compute_entry(&entry);
            }

            if let Some(result) = entry.get() {
                return result.clone();
            }

            tracing::trace!(memo = %self.name, "Waiting for in-flight computation");
            match entry.wait() {
                Some(result) => return result.clone(),
                None => {
                    tracing::debug!(memo = %self.name, "In-flight computation was abandoned, retrying");
                }
            }
        }
    }

    /// Returns the memoized result for `key` if it is ready, without blocking or computing.
    pub fn peek<Q>(&self, key: &Q) -> Option<Outcome<K, F>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F::Value: Clone,
        F::Error: Clone,
    {
        let entry = self.entries().get(key).cloned()?;
        entry.get().cloned()
    }

    /// Returns the state of the entry for `key`, or `None` if it was never requested.
    pub fn state<Q>(&self, key: &Q) -> Option<EntryState>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries().get(key).map(|entry| entry.state())
    }

    /// The number of entries, both pending and ready.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no key was requested yet.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Finds the entry for `key`, or inserts a fresh one.
    ///
    /// Returns `true` alongside the entry if it was inserted by this call, making the caller its
    /// owner. The map lock is released when this returns.
    fn lookup_or_insert<Q>(&self, key: &Q) -> (MemoEntry<K, F>, bool)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let mut entries = self.entries();
        if let Some(entry) = entries.get(key) {
            return (Arc::clone(entry), false);
        }

        let entry = Arc::new(Entry::new(key.to_owned()));
        entries.insert(key.to_owned(), Arc::clone(&entry));
        (entry, true)
    }

    fn compute_entry(&self, entry: &MemoEntry<K, F>) -> Outcome<K, F>
    where
        F::Value: Clone,
        F::Error: Clone,
    {
        tracing::trace!(memo = %self.name, "Computing new entry");

        let abandon_on_unwind = defer(|| self.abandon(entry));
        let result = self.func.compute(entry.key());
        abandon_on_unwind.cancel();

        tracing::trace!(memo = %self.name, ok = result.is_ok(), "Computed new entry");

        // only the owner publishes, so this is never rejected
        match entry.publish(result) {
            Ok(stored) => stored.clone(),
            Err(result) => result,
        }
    }

    /// Removes an entry whose owner unwound before publishing, and wakes its waiters.
    fn abandon(&self, entry: &MemoEntry<K, F>) {
        tracing::debug!(memo = %self.name, "Computation panicked, abandoning entry");
        {
            let mut entries = self.entries();
            if entries
                .get(entry.key())
                .is_some_and(|current| Arc::ptr_eq(current, entry))
            {
                entries.remove(entry.key());
            }
        }
        entry.abandon();
    }

    // User code never runs under this lock, so poisoning carries no information.
    fn entries(&self) -> MutexGuard<'_, HashMap<K, MemoEntry<K, F>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, F> fmt::Debug for Memo<K, F>
where
    F: Compute<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .entries
            .try_lock()
            .map(|entries| entries.len())
            .unwrap_or_default();
        f.debug_struct("Memo")
            .field("name", &self.name)
            .field("entries", &entries)
            .finish_non_exhaustive()
    }
}
