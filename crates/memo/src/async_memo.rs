use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use crate::entry::EntryState;

/// The async computation behind an [`AsyncMemo`].
///
/// This is implemented for every `Fn(&K) -> impl Future<Output = Result<V, E>>`. The returned
/// future must not borrow from `key`; clone what you need out of it.
pub trait AsyncCompute<K: ?Sized> {
    /// The value produced by a successful computation.
    type Value;
    /// The error produced by a failed computation.
    type Error;
    /// The computation Future type.
    type Computation: Future<Output = Result<Self::Value, Self::Error>>;

    /// Starts the computation for `key`.
    fn compute(&self, key: &K) -> Self::Computation;
}

impl<K, F, Fut, V, E> AsyncCompute<K> for F
where
    K: ?Sized,
    F: Fn(&K) -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    type Value = V;
    type Error = E;
    type Computation = Fut;

    fn compute(&self, key: &K) -> Fut {
        self(key)
    }
}

/// The result of an [`AsyncCompute`] invocation, as stored in an [`AsyncMemo`].
pub type AsyncOutcome<K, F> =
    Result<<F as AsyncCompute<K>>::Value, <F as AsyncCompute<K>>::Error>;

struct AsyncEntry<K, T> {
    key: K,
    result: OnceCell<T>,
}

type AsyncMemoEntry<K, F> = Arc<AsyncEntry<K, AsyncOutcome<K, F>>>;

/// An async memoizing cache.
///
/// The async counterpart of [`Memo`](crate::Memo): request coalescing for [`AsyncCompute`]
/// futures, with every result (including errors) kept for the lifetime of the cache.
///
/// The key map is guarded by a plain mutex that is never held across an `.await`. Waiters are
/// parked on a per-key [`OnceCell`]. If the future driving a computation is dropped before it
/// finishes, or panics, the next waiter starts the computation afresh.
pub struct AsyncMemo<K, F>
where
    F: AsyncCompute<K>,
{
    name: Cow<'static, str>,
    func: F,
    entries: Mutex<HashMap<K, AsyncMemoEntry<K, F>>>,
}

impl<K, F> AsyncMemo<K, F>
where
    K: Eq + Hash,
    F: AsyncCompute<K>,
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

    /// Get or compute the result for `key`.
    ///
    /// Concurrent calls for the same key are coalesced into a single computation, and all of
    /// them resolve to a clone of its result.
    pub async fn get<Q>(&self, key: &Q) -> AsyncOutcome<K, F>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
        F::Value: Clone,
        F::Error: Clone,
    {
        let entry = self.lookup_or_insert(key);
        if let Some(result) = entry.result.get() {
            return result.clone();
        }

        entry
            .result
            .get_or_init(|| async {
                tracing::trace!(memo = %self.name, "Computing new entry");
                let result = self.func.compute(&entry.key).await;
                tracing::trace!(memo = %self.name, ok = result.is_ok(), "Computed new entry");
                result
            })
            .await
            .clone()
    }

    /// Returns the memoized result for `key` if it is ready, without computing it.
    pub fn peek<Q>(&self, key: &Q) -> Option<AsyncOutcome<K, F>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F::Value: Clone,
        F::Error: Clone,
    {
        let entry = self.entries().get(key).cloned()?;
        entry.result.get().cloned()
    }

    /// Returns the state of the entry for `key`, or `None` if it was never requested.
    pub fn state<Q>(&self, key: &Q) -> Option<EntryState>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries().get(key).map(|entry| {
            if entry.result.initialized() {
                EntryState::Ready
            } else {
                EntryState::Pending
            }
        })
    }

    /// The number of entries, both pending and ready.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no key was requested yet.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn lookup_or_insert<Q>(&self, key: &Q) -> AsyncMemoEntry<K, F>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let mut entries = self.entries();
        if let Some(entry) = entries.get(key) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(AsyncEntry {
            key: key.to_owned(),
            result: OnceCell::new(),
        });
        entries.insert(key.to_owned(), Arc::clone(&entry));
        entry
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, AsyncMemoEntry<K, F>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, F> fmt::Debug for AsyncMemo<K, F>
where
    F: AsyncCompute<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .entries
            .try_lock()
            .map(|entries| entries.len())
            .unwrap_or_default();
        f.debug_struct("AsyncMemo")
            .field("name", &self.name)
            .field("entries", &entries)
            .finish_non_exhaustive()
    }
}
