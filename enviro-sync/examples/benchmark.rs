//! Enviro Sync Benchmark
//!
//! Runs the synthetic engine workload at a few sizes and prints how the keyed
//! lock and event ring behaved:
//! - Per-container lock contention
//! - Event delivery versus overwrite loss as the ring shrinks

use enviro_sync::{run_workload, KeyedLockConfig, RingBufferConfig, SyncConfig, WorkloadOptions};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Enviro Sync Benchmark Suite");
    println!("===========================================================\n");

    println!("Benchmark 1: Lock contention by container count");
    println!("-----------------------------------------------------------");
    for containers in [1, 4, 16, 64] {
        let opts = WorkloadOptions {
            containers,
            ops_per_container: 50,
            events: 0,
            hold: Duration::from_micros(100),
        };
        let report = run_workload(&SyncConfig::default(), &opts).await?;
        println!(
            "  {containers:>3} containers: {:>5} ops in {:>5} ms, contention {:>6.2}%, violations {}",
            report.locked_ops,
            report.elapsed_ms,
            report.lock.contention_rate(),
            report.exclusion_violations
        );
    }
    println!();

    println!("Benchmark 2: Event loss by ring capacity");
    println!("-----------------------------------------------------------");
    for capacity in [4, 64, 1024, 65536] {
        let config = SyncConfig {
            keyed_lock: KeyedLockConfig::manual_reap(),
            ring_buffer: RingBufferConfig { capacity },
        };
        let opts = WorkloadOptions {
            containers: 1,
            ops_per_container: 1,
            events: 100_000,
            hold: Duration::ZERO,
        };
        let report = run_workload(&config, &opts).await?;
        println!(
            "  capacity {capacity:>6}: delivered {:>6}/{}, lost {:>6.2}%, {:>5} ms",
            report.events_delivered,
            report.events_produced,
            report.ring.loss_rate(),
            report.elapsed_ms
        );
    }

    Ok(())
}
