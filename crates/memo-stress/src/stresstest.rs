use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sketches_ddsketch::DDSketch;

use crate::workloads::{Mode, Workload, WorkloadsConfig, run_tasks, run_threads};

/// What a workload achieved until the deadline.
struct WorkloadStats {
    rounds: usize,
    call_durations: DDSketch,
}

pub async fn perform_stresstest(workloads: WorkloadsConfig, duration: Duration) -> Result<()> {
    let start = Instant::now();
    let deadline = start + duration;

    // run the workloads concurrently
    let tasks: Vec<_> = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            tokio::spawn(async move {
                let stats = run_until(&workload, deadline)
                    .await
                    .with_context(|| format!("workload {i} broke memoization guarantees"))?;
                anyhow::Ok((workload, stats))
            })
        })
        .collect();

    let finished_tasks = futures::future::join_all(tasks).await;
    let elapsed = start.elapsed();

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (workload, stats) = task.context("stresstest task panicked")??;
        let WorkloadStats {
            rounds,
            call_durations,
        } = stats;

        let ops = call_durations.count();
        let ops_ps = ops as f64 / elapsed.as_secs_f64();
        println!(
            "Workload {i} ({mode:?}, concurrency: {concurrency}, keys: {keys}): {rounds} rounds, {ops} operations, {ops_ps:.2} ops/s",
            mode = workload.mode,
            concurrency = workload.concurrency,
            keys = workload.keys,
        );

        if ops == 0 {
            continue;
        }
        let quantile = |q| {
            let secs = call_durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(call_durations.sum().unwrap_or_default() / ops as f64);
        let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    Ok(())
}

/// Runs rounds of `workload`, each against a fresh cache, until `deadline` passes.
///
/// Every round is verified on its own, and the first violation aborts the workload.
async fn run_until(workload: &Workload, deadline: Instant) -> Result<WorkloadStats> {
    let mut stats = WorkloadStats {
        rounds: 0,
        call_durations: DDSketch::default(),
    };

    while Instant::now() < deadline {
        let observations = match workload.mode {
            Mode::Threads => {
                let workload = workload.clone();
                tokio::task::spawn_blocking(move || run_threads(&workload))
                    .await
                    .context("stresstest round panicked")?
            }
            Mode::Tasks => run_tasks(workload).await,
        }
        .with_context(|| format!("round {} failed", stats.rounds))?;

        for observation in &observations {
            stats.call_durations.add(observation.elapsed.as_secs_f64());
        }
        stats.rounds += 1;

        tracing::debug!(
            rounds = stats.rounds,
            calls = observations.len(),
            "Finished stresstest round"
        );
    }

    Ok(stats)
}
