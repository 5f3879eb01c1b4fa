//! `netfs_top`: drive a synthetic I/O load and watch the request listing
//!
//! Usage: `netfs_top [config.json]`
//!
//! Submission threads run on the blocking pool while the async side
//! periodically streams the listing and the stats report to stdout.

mod workload;

use std::sync::Arc;
use std::time::Duration;

use netfs::{Netfs, NetfsConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::workload::{run_worker, Workload, WorkerReport};

const WORKERS: usize = 4;
const DUMP_INTERVAL: Duration = Duration::from_millis(250);

fn load_config() -> Result<NetfsConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let file = std::fs::File::open(&path)?;
            let config = NetfsConfig::from_reader(file)?;
            info!("Loaded config from {path}");
            Ok(config)
        }
        None => Ok(NetfsConfig::default()),
    }
}

/// Print one full listing, reading it through a bounded channel
async fn dump_listing(netfs: &Netfs) -> usize {
    let report = netfs.requests_report();
    let (tx, mut rx) = mpsc::channel::<String>(netfs.config().report_page_rows);

    let producer = tokio::spawn(async move { report.send_to(tx).await });
    let printer = async {
        let mut out = String::new();
        while let Some(line) = rx.recv().await {
            out.push_str(&line);
        }
        print!("{out}");
    };
    let (rows, ()) = tokio::join!(producer, printer);
    rows.unwrap_or_else(|e| {
        warn!("Listing task failed: {e}");
        0
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let netfs = Netfs::init(config)?;
    info!("Starting {WORKERS} submission workers");

    let workers: Vec<_> = (0..WORKERS)
        .map(|w| {
            let netfs = Arc::clone(&netfs);
            tokio::task::spawn_blocking(move || run_worker(&netfs, w, Workload::default()))
        })
        .collect();

    let mut ticker = tokio::time::interval(DUMP_INTERVAL);
    while !workers.iter().all(tokio::task::JoinHandle::is_finished) {
        ticker.tick().await;
        let rows = dump_listing(&netfs).await;
        print!("{}", netfs.stats_report());
        info!("{rows} requests in flight, {} live", netfs.live_requests());
    }

    let mut total = WorkerReport::default();
    for worker in workers {
        let report = worker.await?;
        total.completed += report.completed;
        total.cancelled += report.cancelled;
        total.refused += report.refused;
    }
    info!(
        "Workers done: {} completed, {} cancelled, {} refused",
        total.completed, total.cancelled, total.refused
    );

    let leftovers = netfs.shutdown();
    if leftovers > 0 {
        warn!("{leftovers} requests were still registered at shutdown");
    }
    print!("{}", netfs.stats_report());

    if netfs.live_requests() != 0 {
        warn!("{} requests still referenced at exit", netfs.live_requests());
    }
    info!("Program completed");
    Ok(())
}
