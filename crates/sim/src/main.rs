//! Several replicas contending to write one shared status record.
//!
//! Each replica runs its own `WriterLease`. A write wins when nobody else
//! has written the record recently; otherwise the replica sees the
//! competitor and releases. After a short while one replica should be doing
//! all the writing while the others follow.
//!
//! Usage: `writerlease-sim [replicas] [seconds]`

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use rand::Rng;
use tracing::info;

use writerlease::{Backoff, LeaseConfig, WorkOutcome, WorkResult, WriterLease};

/// The shared resource every replica wants to keep up to date.
#[derive(Debug, Default)]
struct StatusRecord {
    writer: Option<String>,
    written_at: Option<Instant>,
    generation: u64,
    writes: BTreeMap<String, u64>,
}

fn parse_arg(args: &[String], index: usize, default: u64, what: &str) -> Result<u64> {
    match args.get(index) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid {what}: {raw:?}")),
        None => Ok(default),
    }
}

/// Attempt to write generation `generation` to `record` as `name`.
fn write_status(
    record: &Mutex<StatusRecord>,
    name: &str,
    generation: u64,
    freshness: Duration,
) -> WorkOutcome {
    // Occasional transient conflicts, as from an optimistic-concurrency store.
    if rand::thread_rng().gen_bool(0.05) {
        return WorkOutcome::retry(WorkResult::None);
    }

    let mut record = record.lock().unwrap_or_else(|e| e.into_inner());
    let contested = match (&record.writer, record.written_at) {
        (Some(writer), Some(at)) => writer != name && at.elapsed() < freshness,
        _ => false,
    };
    if contested {
        return WorkOutcome::done(WorkResult::Release);
    }
    if record.generation >= generation && record.writer.as_deref() == Some(name) {
        // Already current; nothing to write but we still hold the record.
        return WorkOutcome::done(WorkResult::Extend);
    }

    record.writer = Some(name.to_string());
    record.written_at = Some(Instant::now());
    record.generation = record.generation.max(generation);
    *record.writes.entry(name.to_string()).or_default() += 1;
    WorkOutcome::done(WorkResult::Extend)
}

fn main() -> Result<()> {
    writerlease_observability::tracing::init(writerlease_observability::LogFormat::Pretty);

    let args: Vec<String> = std::env::args().collect();
    let replicas = parse_arg(&args, 1, 3, "replica count")?;
    let seconds = parse_arg(&args, 2, 5, "duration in seconds")?;
    if replicas == 0 {
        bail!("need at least one replica");
    }

    let lease_duration = Duration::from_millis(500);
    let record = Arc::new(Mutex::new(StatusRecord::default()));

    let mut leases = Vec::new();
    let mut runners = Vec::new();
    let mut stops = Vec::new();
    for i in 0..replicas {
        let config = LeaseConfig::new(lease_duration, Duration::from_millis(50))
            .with_name(format!("replica-{i}"))
            .with_backoff(Backoff {
                base: Duration::from_millis(20),
                ..Backoff::default()
            });
        info!(config = %serde_json::to_string(&config)?, "starting replica");

        let lease = WriterLease::new(config)?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let runner = {
            let lease = lease.clone();
            thread::spawn(move || lease.run(&stop_rx))
        };
        leases.push(lease);
        runners.push(runner);
        stops.push(stop_tx);
    }

    // Every replica observes the same stream of changes and wants to publish
    // each one.
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut generation = 0u64;
    while Instant::now() < deadline {
        generation += 1;
        for lease in &leases {
            let record = record.clone();
            let name = lease.name().to_string();
            lease.try_work("status", move || {
                write_status(&record, &name, generation, lease_duration)
            });
        }
        thread::sleep(Duration::from_millis(100));
    }

    for lease in &leases {
        let snapshot = lease.snapshot();
        info!(
            lease = %lease.name(),
            phase = %snapshot.phase,
            retry_step = snapshot.retry_step,
            pending = lease.len(),
            "final state"
        );
    }

    drop(stops);
    for runner in runners {
        runner
            .join()
            .map_err(|_| anyhow::anyhow!("replica thread panicked"))??;
    }

    let record = record.lock().unwrap_or_else(|e| e.into_inner());
    info!(
        generations = generation,
        last_generation = record.generation,
        writer = ?record.writer,
        writes = ?record.writes,
        "simulation finished"
    );
    Ok(())
}
