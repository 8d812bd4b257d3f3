//! List command implementation.

use super::{open_manager, print_json, CommandResult, TransactionSummary};
use itemtx_core::Config;
use std::path::Path;

/// Runs the list command.
pub fn run(path: &Path, config: Config, limit: Option<usize>, format: &str) -> CommandResult {
    let summaries = collect(path, config, limit)?;
    match format {
        "json" => print_json(&summaries)?,
        _ => print_text_output(&summaries),
    }
    Ok(())
}

/// Loads the summaries `run` prints, oldest update first.
pub fn collect(
    path: &Path,
    config: Config,
    limit: Option<usize>,
) -> CommandResult<Vec<TransactionSummary>> {
    let manager = open_manager(path, config)?;
    let mut summaries: Vec<TransactionSummary> = manager
        .list(limit)?
        .iter()
        .map(TransactionSummary::from)
        .collect();
    summaries.sort_by(|a, b| (a.last_update_time, &a.id).cmp(&(b.last_update_time, &b.id)));
    Ok(summaries)
}

fn print_text_output(summaries: &[TransactionSummary]) {
    if summaries.is_empty() {
        println!("No transactions.");
        return;
    }
    println!("{:<38} {:<12} {:>8} {:>9} {:>15}", "ID", "STATE", "VERSION", "REQUESTS", "UPDATED");
    for tx in summaries {
        println!(
            "{:<38} {:<12} {:>8} {:>9} {:>15}",
            tx.id, tx.state, tx.version, tx.requests, tx.last_update_time
        );
    }
    println!();
    println!("{} transaction(s)", summaries.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::populated;

    #[test]
    fn lists_every_record() {
        let (_dir, path, done, open) = populated();
        let summaries = collect(&path, Config::default(), None).unwrap();
        assert_eq!(summaries.len(), 2);

        let find = |id: &str| summaries.iter().find(|s| s.id == id).unwrap();
        assert_eq!(find(done.id().as_str()).state, "Committed");
        assert_eq!(find(open.id().as_str()).state, "Active");
        assert_eq!(find(open.id().as_str()).requests, 1);
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(collect(&dir.path().join("nope.snap"), Config::default(), None).is_err());
    }
}
