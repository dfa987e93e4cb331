//! Minimal smoke demo: registers one region, drives a handful of faults
//! through a simulated fault source, and prints the resulting status. The
//! workload generator and allocation-interception shim this would sit
//! behind in a real deployment are separate, out-of-scope components.

use std::sync::Arc;
use std::time::Duration;
use tiermgr::config::Config;
use tiermgr::fault::SimulatedFaultSource;
use tiermgr::manager::Manager;

#[tokio::main]
async fn main() -> tiermgr::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let source = SimulatedFaultSource::new();
    let manager = Manager::new(Config::default(), source.clone());

    manager.register_region(0x7f0000000000, 64 * 4096).await?;
    manager.init().await?;

    for page in 0..8u64 {
        source.inject_fault(0x7f0000000000 + page * 4096);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    tracing::info!(status = %manager.status(), "demo run complete");
    manager.shutdown().await;
    Ok(())
}
