//! Concurrent memoizing caches.
//!
//! A memo wraps a (possibly slow, possibly failing) computation keyed by a single argument and
//! makes sure the computation runs at most once per distinct key, no matter how many callers ask
//! for that key at the same time. Callers asking for *different* keys never wait on each other.
//!
//! There are two flavors:
//!
//! - [`Memo`] for blocking callers on plain threads, driven by a [`Compute`] implementation.
//! - [`AsyncMemo`] for async callers, driven by an [`AsyncCompute`] implementation.
//!
//! Both share the same model. The cache owns a map from key to entry, guarded by a lock that only
//! protects the shape of that map. The first caller for a key inserts a pending entry and becomes
//! its *owner*: it releases the lock, runs the computation, and publishes the result through the
//! entry's one-shot [`Signal`]. Every other caller for that key is a *waiter* and blocks on that
//! signal. Once published, a result is never touched again, errors included: there is no
//! eviction, expiration, update or delete.
//!
//! If the owner unwinds (a panicking [`Compute`]) or is dropped (a cancelled [`AsyncMemo::get`]
//! future) before publishing, nothing is cached and one of the waiters takes over the computation.

#![warn(missing_docs)]

mod async_memo;
mod defer;
mod entry;
mod memo;
mod signal;

pub use async_memo::*;
pub use defer::*;
pub use entry::EntryState;
pub use memo::*;
pub use signal::*;
