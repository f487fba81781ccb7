use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use memo::Memo;
use rand::Rng;

const KEYS: usize = 8;
const CALLERS: usize = 48;
const CALLS_PER_CALLER: usize = 16;

/// A computation with random latency that fails for every third key.
#[derive(Default)]
struct Jittery {
    calls: Mutex<HashMap<String, usize>>,
    invocations: AtomicUsize,
}

impl Jittery {
    fn compute(&self, key: &str) -> Result<Arc<str>, Arc<str>> {
        *self.calls.lock().unwrap().entry(key.to_owned()).or_default() += 1;
        let invocation = self.invocations.fetch_add(1, Ordering::SeqCst);

        let delay = rand::rng().random_range(0..5);
        thread::sleep(Duration::from_millis(delay));

        let index: usize = key.trim_start_matches("key-").parse().unwrap();
        let body = format!("{key} #{invocation}").into();
        if index % 3 == 0 { Err(body) } else { Ok(body) }
    }
}

#[test]
fn test_stress_random_delays() {
    memo_test::setup();

    let jittery = Jittery::default();
    let memo: Memo<String, _> = Memo::new(|key: &String| jittery.compute(key));
    let barrier = Barrier::new(CALLERS);

    let observed: Vec<(String, Result<Arc<str>, Arc<str>>)> = thread::scope(|s| {
        let callers: Vec<_> = (0..CALLERS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    (0..CALLS_PER_CALLER)
                        .map(|_| {
                            let key = format!("key-{}", rand::rng().random_range(0..KEYS));
                            let result = memo.get(&key);
                            (key, result)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        callers
            .into_iter()
            .flat_map(|caller| caller.join().unwrap())
            .collect()
    });
    assert_eq!(observed.len(), CALLERS * CALLS_PER_CALLER);

    let mut results_by_key: HashMap<String, HashSet<_>> = HashMap::new();
    for (key, result) in observed {
        results_by_key.entry(key).or_default().insert(result);
    }

    let calls = jittery.calls.lock().unwrap();
    for (key, results) in &results_by_key {
        assert_eq!(calls.get(key), Some(&1), "{key} computed more than once");
        assert_eq!(results.len(), 1, "{key} observed diverging results");
    }
    assert_eq!(calls.len(), results_by_key.len());
    assert_eq!(memo.len(), results_by_key.len());
    assert_eq!(
        jittery.invocations.load(Ordering::SeqCst),
        results_by_key.len()
    );
}
