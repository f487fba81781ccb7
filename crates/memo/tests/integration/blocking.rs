use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use memo::{Compute, EntryState, Memo};
use memo_test::{Body, FetchError, Fetcher};

/// Has `callers` threads request `key` at the same time.
fn fetch_all<F>(
    memo: &Memo<String, F>,
    key: &str,
    callers: usize,
) -> Vec<Result<Body, FetchError>>
where
    F: Compute<String, Value = Body, Error = FetchError> + Sync,
{
    let barrier = Barrier::new(callers);
    thread::scope(|s| {
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    memo.get(key)
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_concurrent_gets_compute_once() {
    memo_test::setup();

    let fetcher = Fetcher::new().with_delay("x", Duration::from_millis(50));
    let memo: Memo<String, _> = Memo::new(|key: &String| fetcher.fetch(key));

    let results = fetch_all(&memo, "x", 32);

    assert_eq!(fetcher.calls("x"), 1);
    assert_eq!(results.len(), 32);

    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
    }
}

#[test]
fn test_errors_are_memoized() {
    memo_test::setup();

    let fetcher = Fetcher::new()
        .with_delay("bad", Duration::from_millis(20))
        .failing("bad", "connection reset");
    let memo: Memo<String, _> = Memo::new(|key: &String| fetcher.fetch(key));

    let results = fetch_all(&memo, "bad", 8);
    for result in results {
        assert_eq!(result, Err(FetchError::Failed("connection reset".into())));
    }

    assert_eq!(
        memo.get("bad"),
        Err(FetchError::Failed("connection reset".into()))
    );
    assert_eq!(fetcher.calls("bad"), 1);
}

#[test]
fn test_idempotent_rereads() {
    memo_test::setup();

    let fetcher = Fetcher::new();
    let memo: Memo<String, _> = Memo::new(|key: &String| fetcher.fetch(key));
    assert!(memo.is_empty());

    let first = memo.get("x").unwrap();
    assert_eq!(&*first, "body of x (call #1)");
    assert_eq!(memo.state("x"), Some(EntryState::Ready));

    let second = memo.get("x").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(memo.peek("x"), Some(Ok(first)));

    assert_eq!(fetcher.calls("x"), 1);
    assert_eq!(memo.len(), 1);
}

#[test]
fn test_numbers() {
    memo_test::setup();

    let memo: Memo<String, _> = Memo::new(|key: &String| match key.as_str() {
        "x" => Ok(42),
        _ => Err(format!("no number for {key}")),
    });

    assert_eq!(memo.get("x"), Ok(42));
    assert_eq!(memo.get("x"), Ok(42));
    assert_eq!(memo.get("y"), Err("no number for y".to_owned()));
}

#[test]
fn test_slow_key_does_not_block_other_keys() {
    memo_test::setup();

    let fetcher = Fetcher::new().with_delay("slow", Duration::from_millis(500));
    let memo: Memo<String, _> = Memo::new(|key: &String| fetcher.fetch(key));

    thread::scope(|s| {
        let slow = s.spawn(|| {
            let result = memo.get("slow");
            (result, Instant::now())
        });

        while memo.state("slow").is_none() {
            thread::yield_now();
        }

        let fast = memo.get("fast");
        let fast_done = Instant::now();
        assert!(fast.is_ok());
        assert_eq!(memo.state("slow"), Some(EntryState::Pending));

        let (slow, slow_done) = slow.join().unwrap();
        assert!(slow.is_ok());
        assert!(fast_done < slow_done);
    });

    assert_eq!(fetcher.calls("slow"), 1);
    assert_eq!(fetcher.calls("fast"), 1);
}

#[test]
fn test_distinct_keys_compute_in_parallel() {
    memo_test::setup();

    let delay = Duration::from_millis(200);
    let keys = ["a", "b", "c", "d"];
    let fetcher = keys
        .iter()
        .fold(Fetcher::new(), |fetcher, key| fetcher.with_delay(key, delay));
    let memo: Memo<String, _> = Memo::new(|key: &String| fetcher.fetch(key));

    let start = Instant::now();
    thread::scope(|s| {
        for key in keys {
            let memo = &memo;
            s.spawn(move || memo.get(key).unwrap());
        }
    });

    // run back to back, four keys would take at least 800ms
    assert!(start.elapsed() < delay * 3);
    assert_eq!(fetcher.total_calls(), 4);
}

#[test]
fn test_panicking_owner_is_taken_over() {
    memo_test::setup();

    let fetcher = Fetcher::new()
        .with_delay("boom", Duration::from_millis(100))
        .panicking_once("boom");
    let memo: Memo<String, _> = Memo::new(|key: &String| fetcher.fetch(key));

    thread::scope(|s| {
        let owner = s.spawn(|| memo.get("boom"));
        while memo.state("boom").is_none() {
            thread::yield_now();
        }

        let waiters: Vec<_> = (0..4).map(|_| s.spawn(|| memo.get("boom"))).collect();

        assert!(owner.join().is_err());

        let results: Vec<_> = waiters
            .into_iter()
            .map(|waiter| waiter.join().unwrap().unwrap())
            .collect();
        for result in &results {
            assert!(Arc::ptr_eq(&results[0], result));
        }
    });

    assert_eq!(fetcher.calls("boom"), 2);
    assert_eq!(memo.state("boom"), Some(EntryState::Ready));
}

#[test]
fn test_shared_behind_arc() {
    memo_test::setup();

    let fetcher = Arc::new(Fetcher::new().with_delay("x", Duration::from_millis(20)));
    let memo = {
        let fetcher = Arc::clone(&fetcher);
        Arc::new(Memo::<String, _>::with_name(
            "shared",
            move |key: &String| fetcher.fetch(key),
        ))
    };
    assert_eq!(memo.name(), "shared");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let memo = Arc::clone(&memo);
            thread::spawn(move || memo.get("x"))
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
    assert_eq!(fetcher.calls("x"), 1);
}
