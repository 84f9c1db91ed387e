//! Synthetic Engine Workload
//!
//! Drives both primitives the way the daemon does: a pool of tasks performs
//! per-container operations serialised through a [`KeyedLock`], while a
//! producer streams container events through a [`RingBuffer`] to a consumer
//! that drains it at its own pace.
//!
//! Both primitives block OS threads, so every call into them from async code
//! goes through `tokio::task::spawn_blocking`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::stats::{LockSnapshot, RingSnapshot};
use crate::sync::{KeyedLock, RingBuffer};

/// Lifecycle event emitted by the synthetic containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Start,
    Exec,
    Stop,
}

impl EventKind {
    fn for_seq(seq: u64) -> Self {
        match seq % 4 {
            0 => Self::Create,
            1 => Self::Start,
            2 => Self::Exec,
            _ => Self::Stop,
        }
    }
}

/// One entry on the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerEvent {
    pub seq: u64,
    pub container_id: String,
    pub kind: EventKind,
}

/// Shape of a workload run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadOptions {
    /// Distinct container IDs to contend on.
    pub containers: usize,
    /// Locked operations issued per container.
    pub ops_per_container: usize,
    /// Events pushed through the ring buffer.
    pub events: u64,
    /// Time each locked operation holds its key.
    pub hold: Duration,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self {
            containers: 4,
            ops_per_container: 25,
            events: 1000,
            hold: Duration::from_micros(200),
        }
    }
}

/// Outcome of [`run_workload`].
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadReport {
    pub locked_ops: usize,
    /// Times two operations were observed inside the same container at once.
    pub exclusion_violations: usize,
    pub events_produced: u64,
    pub events_delivered: u64,
    /// Events delivered with a sequence number lower than one already seen.
    pub out_of_order: u64,
    pub elapsed_ms: u64,
    pub lock: LockSnapshot,
    pub ring: RingSnapshot,
}

fn container_id(index: usize) -> String {
    format!("ctr-{index:04}")
}

/// Run the locking and streaming halves concurrently and report what happened.
pub async fn run_workload(config: &SyncConfig, opts: &WorkloadOptions) -> Result<WorkloadReport> {
    config.validate()?;
    info!(
        containers = opts.containers,
        ops = opts.ops_per_container,
        events = opts.events,
        "Starting sync workload"
    );
    let start = Instant::now();

    let locks = Arc::new(KeyedLock::with_config(config.keyed_lock.clone()));
    let ring = Arc::new(
        RingBuffer::<ContainerEvent>::try_new(config.ring_buffer.capacity)
            .context("Failed to create event ring")?,
    );

    let stream = tokio::spawn(stream_events(Arc::clone(&ring), opts.clone()));
    let (locked_ops, exclusion_violations) = contend(Arc::clone(&locks), opts).await?;
    let (events_delivered, out_of_order) = stream.await.context("Event stream task failed")??;

    let report = WorkloadReport {
        locked_ops,
        exclusion_violations,
        events_produced: opts.events,
        events_delivered,
        out_of_order,
        elapsed_ms: start.elapsed().as_millis() as u64,
        lock: locks.metrics(),
        ring: ring.metrics(),
    };
    if report.exclusion_violations > 0 {
        warn!(violations = report.exclusion_violations, "Keyed lock admitted concurrent holders");
    }
    info!(elapsed_ms = report.elapsed_ms, "Sync workload finished");
    Ok(report)
}

/// Issue every locked operation, returning `(completed, violations)`.
async fn contend(locks: Arc<KeyedLock>, opts: &WorkloadOptions) -> Result<(usize, usize)> {
    let in_flight: Arc<HashMap<String, AtomicUsize>> = Arc::new(
        (0..opts.containers)
            .map(|i| (container_id(i), AtomicUsize::new(0)))
            .collect(),
    );
    let violations = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::with_capacity(opts.containers * opts.ops_per_container);
    for op in 0..opts.ops_per_container {
        for i in 0..opts.containers {
            let locks = Arc::clone(&locks);
            let in_flight = Arc::clone(&in_flight);
            let violations = Arc::clone(&violations);
            let hold = opts.hold;
            let id = container_id(i);

            tasks.push(tokio::task::spawn_blocking(move || {
                locks.lock(&id);
                let gauge = &in_flight[&id];
                if gauge.fetch_add(1, Ordering::SeqCst) != 0 {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(hold);
                gauge.fetch_sub(1, Ordering::SeqCst);
                locks.unlock(&id);
                debug!(container = %id, op, "Locked operation done");
            }));
        }
    }

    let completed = tasks.len();
    for task in tasks {
        task.await.context("Locked operation panicked")?;
    }
    Ok((completed, violations.load(Ordering::SeqCst)))
}

/// Produce `opts.events` events, close the ring, and drain it on a second
/// blocking thread. Returns `(delivered, out_of_order)`.
async fn stream_events(ring: Arc<RingBuffer<ContainerEvent>>, opts: WorkloadOptions) -> Result<(u64, u64)> {
    let consumer = {
        let ring = Arc::clone(&ring);
        tokio::task::spawn_blocking(move || {
            let mut delivered = 0u64;
            let mut out_of_order = 0u64;
            let mut last: Option<u64> = None;
            loop {
                let (event, closed) = ring.pop();
                if let Some(event) = event {
                    if last.is_some_and(|prev| event.seq <= prev) {
                        out_of_order += 1;
                    }
                    last = Some(event.seq);
                    delivered += 1;
                }
                if closed && ring.is_empty() {
                    break;
                }
            }
            (delivered, out_of_order)
        })
    };

    let producer = {
        let ring = Arc::clone(&ring);
        let containers = opts.containers.max(1);
        tokio::task::spawn_blocking(move || {
            for seq in 0..opts.events {
                ring.push(ContainerEvent {
                    seq,
                    container_id: container_id(seq as usize % containers),
                    kind: EventKind::for_seq(seq),
                });
            }
            ring.close()
        })
    };

    producer.await.context("Event producer panicked")??;
    let counts = consumer.await.context("Event consumer panicked")?;
    Ok(counts)
}
