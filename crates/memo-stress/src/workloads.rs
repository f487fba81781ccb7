use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use memo::{AsyncMemo, Memo};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    /// Reads and validates the workloads file at `path`.
    pub fn get(path: &Path) -> Result<Self> {
        let config = fs::read_to_string(path).context("failed to open workloads file")?;
        Self::from_yaml(&config)
    }

    fn from_yaml(config: &str) -> Result<Self> {
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("workloads file empty");
        }
        let config: Self =
            serde_yaml::from_str(config).context("failed to parse workloads YAML")?;

        for (i, workload) in config.workloads.iter().enumerate() {
            workload
                .validate()
                .with_context(|| format!("invalid workload {i}"))?;
        }
        Ok(config)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Workload {
    /// How many callers hit the cache at the same time.
    pub concurrency: usize,
    /// How many distinct keys the callers pick from.
    pub keys: usize,
    /// How many requests each caller issues per round.
    #[serde(default = "default_calls")]
    pub calls: usize,
    /// Latency of a single computation, picked at random from this range.
    #[serde(default)]
    pub delay: DelayRange,
    /// Probability of a computation failing.
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub mode: Mode,
}

fn default_calls() -> usize {
    16
}

impl Workload {
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("`concurrency` must be at least 1");
        }
        if self.keys == 0 {
            anyhow::bail!("`keys` must be at least 1");
        }
        if self.delay.min > self.delay.max {
            anyhow::bail!("`delay.min` must not exceed `delay.max`");
        }
        if !(0.0..=1.0).contains(&self.error_rate) {
            anyhow::bail!("`error_rate` must be between 0 and 1");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DelayRange {
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

/// Which cache flavor a workload exercises.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Blocking [`Memo`] called from OS threads.
    #[default]
    Threads,
    /// [`AsyncMemo`] called from tokio tasks.
    Tasks,
}

/// A broken guarantee, detected after a round finished.
#[derive(Debug, Error)]
pub enum Violation {
    #[error("key {key:?} was computed {count} times")]
    RepeatedComputation { key: String, count: usize },
    #[error("callers of key {key:?} observed {distinct} different results")]
    InconsistentResults { key: String, distinct: usize },
    #[error("{computed} keys were computed, but only {requested} were requested")]
    UnrequestedComputation { computed: usize, requested: usize },
    #[error("a caller panicked")]
    CallerPanicked,
}

pub type Outcome = Result<Arc<str>, Arc<str>>;

/// A single `get` as seen by a caller.
#[derive(Debug)]
pub struct Observation {
    pub key: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// The computation behind each round's cache.
///
/// Counts invocations per key and stamps every result with a unique invocation number, so
/// results from two different computations never compare equal.
#[derive(Debug)]
pub struct Probe {
    delay: DelayRange,
    error_rate: f64,
    calls: Mutex<HashMap<String, usize>>,
    invocations: AtomicUsize,
}

impl Probe {
    pub fn new(workload: &Workload) -> Self {
        Self {
            delay: workload.delay,
            error_rate: workload.error_rate,
            calls: Default::default(),
            invocations: Default::default(),
        }
    }

    pub fn compute(&self, key: &str) -> Outcome {
        let (delay, fails) = self.start(key);
        thread::sleep(delay);
        self.finish(key, fails)
    }

    pub async fn compute_async(self: Arc<Self>, key: String) -> Outcome {
        let (delay, fails) = self.start(&key);
        tokio::time::sleep(delay).await;
        self.finish(&key, fails)
    }

    fn start(&self, key: &str) -> (Duration, bool) {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_default() += 1;

        let mut rng = rand::rng();
        let delay = if self.delay.min < self.delay.max {
            rng.random_range(self.delay.min..=self.delay.max)
        } else {
            self.delay.min
        };
        (delay, rng.random_bool(self.error_rate))
    }

    fn finish(&self, key: &str, fails: bool) -> Outcome {
        let invocation = self.invocations.fetch_add(1, Ordering::Relaxed);
        let body = format!("{key} #{invocation}").into();
        if fails { Err(body) } else { Ok(body) }
    }

    /// Checks every key seen by a caller against the computations that actually ran.
    pub fn verify(&self, observations: &[Observation]) -> Result<(), Violation> {
        let mut outcomes: HashMap<&str, HashSet<&Outcome>> = HashMap::new();
        for observation in observations {
            outcomes
                .entry(&observation.key)
                .or_default()
                .insert(&observation.outcome);
        }

        let calls = self.calls.lock().unwrap();
        for (key, distinct) in &outcomes {
            let count = calls.get(*key).copied().unwrap_or_default();
            if count != 1 {
                return Err(Violation::RepeatedComputation {
                    key: key.to_string(),
                    count,
                });
            }
            if distinct.len() != 1 {
                return Err(Violation::InconsistentResults {
                    key: key.to_string(),
                    distinct: distinct.len(),
                });
            }
        }
        if calls.len() != outcomes.len() {
            return Err(Violation::UnrequestedComputation {
                computed: calls.len(),
                requested: outcomes.len(),
            });
        }

        Ok(())
    }
}

fn random_key(keys: usize) -> String {
    format!("key-{}", rand::rng().random_range(0..keys))
}

/// Runs one round of a [`Mode::Threads`] workload against a fresh [`Memo`].
pub fn run_threads(workload: &Workload) -> Result<Vec<Observation>, Violation> {
    let probe = Probe::new(workload);
    let memo: Memo<String, _> = Memo::with_name("stress", |key: &String| probe.compute(key));
    let barrier = Barrier::new(workload.concurrency);

    let observations = thread::scope(|s| -> Result<_, Violation> {
        let callers: Vec<_> = (0..workload.concurrency)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    (0..workload.calls)
                        .map(|_| {
                            let key = random_key(workload.keys);
                            let start = Instant::now();
                            let outcome = memo.get(&key);
                            Observation {
                                key,
                                outcome,
                                elapsed: start.elapsed(),
                            }
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut observations = Vec::with_capacity(workload.concurrency * workload.calls);
        for caller in callers {
            observations.extend(caller.join().map_err(|_| Violation::CallerPanicked)?);
        }
        Ok(observations)
    })?;

    probe.verify(&observations)?;
    Ok(observations)
}

/// Runs one round of a [`Mode::Tasks`] workload against a fresh [`AsyncMemo`].
pub async fn run_tasks(workload: &Workload) -> Result<Vec<Observation>, Violation> {
    let probe = Arc::new(Probe::new(workload));
    let memo = {
        let probe = Arc::clone(&probe);
        Arc::new(AsyncMemo::<String, _>::with_name(
            "stress",
            move |key: &String| Arc::clone(&probe).compute_async(key.clone()),
        ))
    };
    let barrier = Arc::new(tokio::sync::Barrier::new(workload.concurrency));

    let callers = (0..workload.concurrency).map(|_| {
        let memo = Arc::clone(&memo);
        let barrier = Arc::clone(&barrier);
        let Workload { keys, calls, .. } = *workload;

        tokio::spawn(async move {
            barrier.wait().await;
            let mut observations = Vec::with_capacity(calls);
            for _ in 0..calls {
                let key = random_key(keys);
                let start = Instant::now();
                let outcome = memo.get(&key).await;
                observations.push(Observation {
                    key,
                    outcome,
                    elapsed: start.elapsed(),
                });
            }
            observations
        })
    });

    let mut observations = Vec::with_capacity(workload.concurrency * workload.calls);
    for caller in futures::future::join_all(callers).await {
        observations.extend(caller.map_err(|_| Violation::CallerPanicked)?);
    }

    probe.verify(&observations)?;
    Ok(observations)
}
