#![forbid(unsafe_code)]

use nibandh_contracts::UtcTimeMs;
use nibandh_engines::gateway::RegistryGateway;
use nibandh_os::{SyncManager, SyncReport, SyncTrigger};
use nibandh_store::RecordStore;

/// Runs one sync subcommand against the given store and returns the text
/// to print. Errors are operator-facing strings, exit-code 2 material.
pub fn execute_sync_command(
    manager: &SyncManager,
    store: &mut RecordStore,
    subcommand: &str,
    now: UtcTimeMs,
) -> Result<String, String> {
    match subcommand {
        "index" => {
            let report = manager
                .sync_index(store, now)
                .map_err(|e| e.to_string())?;
            Ok(format_report("index", &report))
        }
        "master" => {
            let report = manager
                .sync_master(store, now)
                .map_err(|e| e.to_string())?;
            Ok(format_report("master", &report))
        }
        "retry" => {
            let report = manager.retry(store, now);
            let mut lines = Vec::new();
            match &report.index {
                Ok(r) => lines.push(format_report("index", r)),
                Err(e) => lines.push(format!("index: FAILED ({e})")),
            }
            match &report.master {
                Ok(r) => lines.push(format_report("master", r)),
                Err(e) => lines.push(format!("master: FAILED ({e})")),
            }
            let output = lines.join("\n");
            if report.fully_synced() {
                Ok(output)
            } else {
                Err(output)
            }
        }
        "status" => {
            let status = manager.status(store);
            Ok(format!(
                "index: {} total, {} pending, {} synced\nmaster: {} total, {} pending, {} synced",
                status.index.total,
                status.index.pending,
                status.index.synced,
                status.master.total,
                status.master.pending,
                status.master.synced
            ))
        }
        _ => Err(format!(
            "unknown sync subcommand: {subcommand}. expected one of: index, master, retry, status"
        )),
    }
}

/// One line per archive endpoint: `<name>: <state>`.
pub fn execute_health_command(gateway: &RegistryGateway, now: UtcTimeMs) -> String {
    gateway
        .check_health(now)
        .into_iter()
        .map(|(name, health)| format!("{name}: {}", health.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn parse_trigger(raw: &str) -> Result<SyncTrigger, String> {
    match raw {
        "retry" | "retry_pending" => Ok(SyncTrigger::RetryPending),
        "index" | "push_index" => Ok(SyncTrigger::PushIndex),
        "master" | "push_master" => Ok(SyncTrigger::PushMaster),
        _ => Err(format!(
            "unknown trigger: {raw}. expected one of: retry, index, master"
        )),
    }
}

fn format_report(collection: &str, report: &SyncReport) -> String {
    match &report.commit_ref {
        Some(commit_ref) => format!(
            "{collection}: pushed {} rows, marked {} (commit {commit_ref})",
            report.pushed, report.marked
        ),
        None => format!("{collection}: nothing pending"),
    }
}
