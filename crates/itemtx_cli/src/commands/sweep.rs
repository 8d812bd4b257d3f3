//! Sweep command implementation.

use super::{open_manager, print_json, CommandResult};
use itemtx_core::{Config, SweepOptions, SweepStats};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Sweep counters as printed.
#[derive(Debug, Serialize)]
pub struct SweepResult {
    /// Records looked at.
    pub scanned: usize,
    /// Idle transactions rolled back.
    pub rolled_back: usize,
    /// Decided transactions finished.
    pub recovered: usize,
    /// Finalized transactions deleted.
    pub deleted: usize,
    /// Transactions that could not be processed.
    pub failed: usize,
}

impl From<SweepStats> for SweepResult {
    fn from(stats: SweepStats) -> Self {
        Self {
            scanned: stats.scanned,
            rolled_back: stats.rolled_back,
            recovered: stats.recovered,
            deleted: stats.deleted,
            failed: stats.failed,
        }
    }
}

/// Runs the sweep command.
pub fn run(
    path: &Path,
    config: Config,
    rollback_after: u64,
    delete_after: u64,
    limit: Option<usize>,
    format: &str,
) -> CommandResult {
    let result = sweep(path, config, rollback_after, delete_after, limit)?;
    match format {
        "json" => print_json(&result)?,
        _ => {
            println!("Sweep complete");
            println!("  Scanned:     {}", result.scanned);
            println!("  Rolled back: {}", result.rolled_back);
            println!("  Recovered:   {}", result.recovered);
            println!("  Deleted:     {}", result.deleted);
            println!("  Failed:      {}", result.failed);
        }
    }
    Ok(())
}

/// Sweeps the store; thresholds are in seconds.
pub fn sweep(
    path: &Path,
    config: Config,
    rollback_after: u64,
    delete_after: u64,
    limit: Option<usize>,
) -> CommandResult<SweepResult> {
    let manager = open_manager(path, config)?;
    let stats = manager.sweep(SweepOptions {
        rollback_after: Duration::from_secs(rollback_after),
        delete_after: Duration::from_secs(delete_after),
        limit,
    })?;
    Ok(stats.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{list, test_support::populated};

    #[test]
    fn zero_thresholds_finish_everything() {
        let (_dir, path, _, _) = populated();
        let config = Config::default().finalized_grace_period(Duration::ZERO);

        let first = sweep(&path, config.clone(), 0, 0, None).unwrap();
        assert_eq!(first.scanned, 2);
        assert_eq!(first.rolled_back, 1);
        assert_eq!(first.failed, 0);

        sweep(&path, config.clone(), 0, 0, None).unwrap();
        assert!(list::collect(&path, config, None).unwrap().is_empty());
    }

    #[test]
    fn long_thresholds_leave_records_alone() {
        let (_dir, path, _, _) = populated();
        let result = sweep(&path, Config::default(), 3600, 3600, None).unwrap();
        assert_eq!(result.scanned, 2);
        assert_eq!(result.rolled_back + result.recovered + result.deleted, 0);
    }
}
