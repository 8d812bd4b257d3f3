//! Show command implementation.

use super::{open_manager, print_json, CommandResult, TransactionSummary};
use itemtx_core::{Config, TransactionId};
use serde::Serialize;
use std::path::Path;

/// A transaction with its request log and, optionally, its items' locks.
#[derive(Debug, Serialize)]
pub struct ShowResult {
    /// Record summary.
    #[serde(flatten)]
    pub summary: TransactionSummary,
    /// Logged requests in order.
    pub request_log: Vec<RequestLine>,
    /// Lock state of every touched item (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ItemLine>>,
}

/// One logged request.
#[derive(Debug, Serialize)]
pub struct RequestLine {
    /// Request id.
    pub id: u64,
    /// Request kind.
    pub kind: String,
    /// Whether the request only reads.
    pub read_only: bool,
}

/// The lock on one touched item.
#[derive(Debug, Serialize)]
pub struct ItemLine {
    /// Table name.
    pub table: String,
    /// Key as JSON.
    pub key: serde_json::Value,
    /// Whether a row exists.
    pub exists: bool,
    /// Current lock owner.
    pub owner: Option<String>,
    /// Item did not exist before it was locked.
    pub transient: bool,
    /// The owner's write is in place.
    pub applied: bool,
}

/// Runs the show command.
pub fn run(path: &Path, config: Config, id: &str, items: bool, format: &str) -> CommandResult {
    let result = collect(path, config, id, items)?;
    match format {
        "json" => print_json(&result)?,
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Loads what `run` prints.
pub fn collect(path: &Path, config: Config, id: &str, items: bool) -> CommandResult<ShowResult> {
    let manager = open_manager(path, config)?;
    let tx = manager.resume(&TransactionId::from(id))?;

    let request_log = tx
        .requests()
        .iter()
        .map(|record| RequestLine {
            id: record.id,
            kind: record.request.kind().to_string(),
            read_only: record.request.is_read_only(),
        })
        .collect();

    let items = if items {
        let lines = manager
            .item_states(&tx)?
            .into_iter()
            .map(|state| -> CommandResult<ItemLine> {
                Ok(ItemLine {
                    table: state.key.table.clone(),
                    key: serde_json::to_value(&state.key.key)?,
                    exists: state.exists,
                    owner: state.owner.as_ref().map(ToString::to_string),
                    transient: state.is_transient,
                    applied: state.is_applied,
                })
            })
            .collect::<CommandResult<Vec<_>>>()?;
        Some(lines)
    } else {
        None
    };

    Ok(ShowResult {
        summary: TransactionSummary::from(&tx),
        request_log,
        items,
    })
}

fn print_text_output(result: &ShowResult) {
    let tx = &result.summary;
    println!("Transaction {}", tx.id);
    println!("  State:    {}", tx.state);
    println!("  Version:  {}", tx.version);
    println!("  Updated:  {}", tx.last_update_time);
    println!();
    println!("Requests:");
    for line in &result.request_log {
        let mode = if line.read_only { "read" } else { "write" };
        println!("  [{}] {} ({})", line.id, line.kind, mode);
    }

    if let Some(items) = &result.items {
        println!();
        println!("Items:");
        for item in items {
            println!(
                "  {} {} exists={} owner={} transient={} applied={}",
                item.table,
                item.key,
                item.exists,
                item.owner.as_deref().unwrap_or("-"),
                item.transient,
                item.applied
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::populated;

    #[test]
    fn shows_open_transaction_with_locks() {
        let (_dir, path, _done, open) = populated();
        let result = collect(&path, Config::default(), open.id().as_str(), true).unwrap();

        assert_eq!(result.summary.state, "Active");
        assert_eq!(result.request_log.len(), 1);
        assert!(!result.request_log[0].read_only);

        let items = result.items.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].owner.as_deref(), Some(open.id().as_str()));
        assert!(items[0].transient);
        assert!(items[0].applied);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let (_dir, path, _, _) = populated();
        assert!(collect(&path, Config::default(), "no-such-tx", false).is_err());
    }
}
