use crate::{emit, reject, Workspace};
use anyhow::Result;
use chrono::Utc;
use swarm_engine::WatchdogTrigger;
use tracing::info;

/// Runs the lease watchdog as a trusted local process, typically from cron.
pub fn cleanup(workspace: &Workspace) -> Result<()> {
    let mut engine = workspace.engine()?;
    let report = engine
        .run_watchdog(&WatchdogTrigger::local(), Utc::now())
        .map_err(|err| reject(err.to_failure()))?;
    info!(
        "cleanup finished: recovered={} orphans={} clients={} accounts={}",
        report.recovered_count,
        report.orphan_results_deleted,
        report.idle_clients_deleted,
        report.accounts_deleted
    );
    emit(&report)
}
