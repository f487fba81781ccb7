//! Helpers for testing the memoizing caches.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Use a [`Fetcher`] as the computation under test. It stands in for a slow and possibly
//!    failing resource fetch, and counts how often it was invoked for every key, which is what
//!    most memoization assertions are about.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `memo` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memo=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// The error returned by a [`Fetcher`] for keys configured to fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The resource could not be fetched.
    #[error("fetch failed: {0}")]
    Failed(String),
}

/// The body of a fetched resource.
///
/// Every invocation of a [`Fetcher`] allocates a fresh body, so two results that are
/// [`Arc::ptr_eq`] are guaranteed to stem from the same invocation.
pub type Body = Arc<str>;

/// A fake resource fetch that counts its invocations.
///
/// Fetching a key records the call, waits for the configured delay of that key, and then
/// returns either a fresh [`Body`] or the configured error.
#[derive(Debug, Default)]
pub struct Fetcher {
    delays: HashMap<String, Duration>,
    errors: HashMap<String, FetchError>,
    panics: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl Fetcher {
    /// Creates a fetcher that immediately succeeds for all keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes fetching `key` take `delay`.
    pub fn with_delay(mut self, key: &str, delay: Duration) -> Self {
        self.delays.insert(key.to_owned(), delay);
        self
    }

    /// Makes fetching `key` fail with [`FetchError::NotFound`].
    pub fn not_found(mut self, key: &str) -> Self {
        self.errors
            .insert(key.to_owned(), FetchError::NotFound(key.to_owned()));
        self
    }

    /// Makes fetching `key` fail with [`FetchError::Failed`].
    pub fn failing(mut self, key: &str, reason: &str) -> Self {
        self.errors
            .insert(key.to_owned(), FetchError::Failed(reason.to_owned()));
        self
    }

    /// Makes the first fetch of `key` panic, after its delay.
    pub fn panicking_once(self, key: &str) -> Self {
        self.panics.lock().unwrap().insert(key.to_owned());
        self
    }

    /// Fetches `key`, blocking the current thread for the configured delay.
    pub fn fetch(&self, key: &str) -> Result<Body, FetchError> {
        let call = self.record(key);
        if let Some(delay) = self.delays.get(key) {
            std::thread::sleep(*delay);
        }
        self.respond(key, call)
    }

    /// Fetches `key`, sleeping asynchronously for the configured delay.
    pub async fn fetch_async(&self, key: &str) -> Result<Body, FetchError> {
        let call = self.record(key);
        if let Some(delay) = self.delays.get(key) {
            tokio::time::sleep(*delay).await;
        }
        self.respond(key, call)
    }

    /// How often `key` was fetched.
    pub fn calls(&self, key: &str) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or_default()
    }

    /// How often any key was fetched.
    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn record(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .and_modify(|calls| *calls += 1)
            .or_insert(1);
        self.total.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn respond(&self, key: &str, call: usize) -> Result<Body, FetchError> {
        let blow_up = self.panics.lock().unwrap().remove(key);
        if blow_up {
            panic!("fetching {key:?} blew up");
        }
        tracing::trace!(key, call, "Fetched resource");

        match self.errors.get(key) {
            Some(err) => Err(err.clone()),
            None => Ok(format!("body of {key} (call #{call})").into()),
        }
    }
}
