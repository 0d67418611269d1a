//! Worker entry point: loads `WorkerConfig`, builds the fast/medium/slow
//! `ScanScheduler` trio plus `GroupScheduler` and `Snail` behind one
//! `BlendScheduler`, and would accept chunk query requests over the
//! transport layer. Per-task execution is driven by whatever dispatches
//! work off the `BlendScheduler`; this binary only owns process lifecycle.

use meshquery::worker::{BlendScheduler, GroupScheduler, ScanScheduler, UnlimitedMemMan};
use meshquery::{Result, WorkerConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "worker.toml".to_string());
    let config = WorkerConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = %config_path, "falling back to default worker config");
        WorkerConfig::default()
    });

    tracing::info!(
        worker_name = %config.worker_name,
        listen_addr = %config.listen_addr,
        sched_max_threads = config.sched_max_threads,
        "worker starting"
    );

    let mem_man = Arc::new(UnlimitedMemMan::new());
    let group = Arc::new(GroupScheduler::new("group", config.group_max_in_flight));
    let bands = WorkerConfig::default_rating_bands();
    let scan_schedulers: Vec<Arc<ScanScheduler>> = bands
        .iter()
        .map(|band| {
            Arc::new(ScanScheduler::new(
                format!("scan-{}", band.name_suffix),
                config.sched_max_threads,
                1,
                config.max_active_chunks_per_band,
                band.min,
                band.max,
                mem_man.clone(),
            ))
        })
        .collect();
    let snail = Arc::new(ScanScheduler::new("snail", 1, 1, 1, i32::MIN, i32::MAX, mem_man));
    let _blend = Arc::new(BlendScheduler::new(config.sched_max_threads, group, scan_schedulers, snail));

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("worker shutting down");
    Ok(())
}
