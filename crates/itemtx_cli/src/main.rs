//! itemtx CLI
//!
//! Operator tools for transactions stored in a snapshot file.
//!
//! # Commands
//!
//! - `list` - List transaction records
//! - `show` - Display one transaction and the items it holds
//! - `recover` - Drive a stuck transaction to commit or rollback
//! - `sweep` - Finish abandoned transactions and delete old ones

mod commands;

use clap::{Parser, Subcommand};
use itemtx_core::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// itemtx command-line tools.
#[derive(Parser)]
#[command(name = "itemtx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store snapshot file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Name of the transaction record table
    #[arg(global = true, long, default_value = "Transactions")]
    transaction_table: String,

    /// Name of the before-image table
    #[arg(global = true, long, default_value = "TransactionImages")]
    image_table: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List transaction records
    List {
        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display one transaction
    Show {
        /// Transaction id
        id: String,

        /// Also show the lock state of every touched item
        #[arg(short, long)]
        items: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Drive a transaction to a terminal state
    Recover {
        /// Transaction id
        id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Finish abandoned transactions and delete finalized ones
    Sweep {
        /// Seconds of inactivity before an unfinished transaction is finished
        #[arg(long, default_value = "60")]
        rollback_after: u64,

        /// Seconds of inactivity before a finalized transaction is deleted
        #[arg(long, default_value = "600")]
        delete_after: u64,

        /// Maximum number of records scanned
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::default()
        .transaction_table(cli.transaction_table)
        .image_table(cli.image_table);

    match cli.command {
        Commands::List { limit, format } => {
            let path = cli.path.ok_or("Store path required for list")?;
            commands::list::run(&path, config, limit, &format)?;
        }
        Commands::Show { id, items, format } => {
            let path = cli.path.ok_or("Store path required for show")?;
            commands::show::run(&path, config, &id, items, &format)?;
        }
        Commands::Recover { id, format } => {
            let path = cli.path.ok_or("Store path required for recover")?;
            commands::recover::run(&path, config, &id, &format)?;
        }
        Commands::Sweep {
            rollback_after,
            delete_after,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for sweep")?;
            commands::sweep::run(&path, config, rollback_after, delete_after, limit, &format)?;
        }
        Commands::Version => {
            println!("itemtx CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("itemtx core v{}", itemtx_core::VERSION);
        }
    }

    Ok(())
}
