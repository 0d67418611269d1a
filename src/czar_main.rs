//! Czar entry point: loads `CzarConfig`, wires up stats, and would bind the
//! admin/result-intake surfaces a real deployment exposes. Query dispatch
//! itself is driven per-query through [`meshquery::czar::Executive`]; this
//! binary only owns process lifecycle.

use meshquery::czar::CzarStats;
use meshquery::{CzarConfig, Result};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "czar.toml".to_string());
    let config = CzarConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = %config_path, "falling back to default czar config");
        CzarConfig::default()
    });

    tracing::info!(
        listen_addr = %config.listen_addr,
        max_transmits = config.max_transmits,
        max_transmits_per_qid = config.max_transmits_per_qid,
        "czar starting"
    );

    let _stats = Arc::new(CzarStats::new());

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("czar shutting down");
    Ok(())
}
