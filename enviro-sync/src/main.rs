//! enviro-sync - Exercise the Enviro engine's concurrency primitives
//!
//! Runs a synthetic workload against a keyed lock table and an event ring
//! buffer, then prints the resulting counters.

use anyhow::{bail, Context, Result};
use enviro_sync::{init_tracing, run_workload, SyncConfig, WorkloadOptions};
use std::path::PathBuf;
use tracing::info;

fn print_help() {
    println!("enviro-sync - Enviro concurrency primitives v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  enviro-sync [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -c, --config <PATH>    Load keyed lock / ring buffer settings from JSON");
    println!("      --containers <N>   Distinct container IDs to contend on (default 4)");
    println!("      --ops <N>          Locked operations per container (default 25)");
    println!("      --events <N>       Events streamed through the ring (default 1000)");
    println!("      --json             Print the report as JSON");
    println!("  -h, --help             Print this help message");
    println!("  -v, --version          Print version information");
}

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    workload: WorkloadOptions,
    json: bool,
}

enum Command {
    Run(Args),
    Help,
    Version,
}

fn parse_count<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T> {
    let value = value.with_context(|| format!("'{flag}' requires a value"))?;
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid value '{value}' for '{flag}'"))
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Command> {
    let mut args = Args::default();
    let mut raw = raw.into_iter();

    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "-c" | "--config" => {
                let path = raw.next().context("'--config' requires a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--containers" => args.workload.containers = parse_count(&arg, raw.next())?,
            "--ops" => args.workload.ops_per_container = parse_count(&arg, raw.next())?,
            "--events" => args.workload.events = parse_count(&arg, raw.next())?,
            "--json" => args.json = true,
            other => bail!("unrecognized argument '{other}'"),
        }
    }
    Ok(Command::Run(args))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            println!("enviro-sync {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("Run 'enviro-sync --help' for usage information.");
            std::process::exit(1);
        }
    };

    init_tracing()?;

    let config = match &args.config {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };
    info!(?config, "Configuration loaded");

    let report = run_workload(&config, &args.workload).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Locked operations:   {:>8} (violations: {})", report.locked_ops, report.exclusion_violations);
        println!("  contention rate:   {:>7.2}%", report.lock.contention_rate());
        println!("Events produced:     {:>8}", report.events_produced);
        println!("Events delivered:    {:>8} (lost: {:.2}%)", report.events_delivered, report.ring.loss_rate());
        println!("Elapsed:             {:>8} ms", report.elapsed_ms);
    }
    Ok(())
}
