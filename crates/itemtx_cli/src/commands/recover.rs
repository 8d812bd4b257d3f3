//! Recover command implementation.

use super::{open_manager, print_json, CommandResult, TransactionSummary};
use itemtx_core::{Config, TransactionId};
use std::path::Path;
use tracing::info;

/// Runs the recover command.
pub fn run(path: &Path, config: Config, id: &str, format: &str) -> CommandResult {
    let summary = recover(path, config, id)?;
    match format {
        "json" => print_json(&summary)?,
        _ => println!("Transaction {} is {}", summary.id, summary.state),
    }
    Ok(())
}

/// Drives the transaction to a terminal state and returns its final record.
pub fn recover(path: &Path, config: Config, id: &str) -> CommandResult<TransactionSummary> {
    let manager = open_manager(path, config)?;
    let tx = manager.recover(&TransactionId::from(id))?;
    info!(txid = %tx.id(), state = ?tx.state(), "recovered");
    Ok(TransactionSummary::from(&tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::show;
    use crate::commands::test_support::populated;

    #[test]
    fn rolls_back_open_transaction() {
        let (_dir, path, done, open) = populated();

        let summary = recover(&path, Config::default(), open.id().as_str()).unwrap();
        assert_eq!(summary.state, "RolledBack");

        let items = show::collect(&path, Config::default(), open.id().as_str(), true)
            .unwrap()
            .items
            .unwrap();
        assert!(!items[0].exists);

        let summary = recover(&path, Config::default(), done.id().as_str()).unwrap();
        assert_eq!(summary.state, "Committed");
    }
}
