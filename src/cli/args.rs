//! CLI argument definitions using clap.
//!
//! Commands:
//! - silt stats --path <dir>
//! - silt partitions --path <dir>
//! - silt read --path <dir> --partition <id> [--from N] [--to N] [--limit N]
//! - silt append --path <dir> --partition <id> --payload <json>
//! - silt tail --path <dir> [--from N]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// SiltDB - an embeddable, append-only chunk store
#[derive(Parser, Debug)]
#[command(name = "silt")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize the store: chunk count, partitions, last position
    Stats {
        /// Store directory
        #[arg(long, default_value = "./silt-data")]
        path: PathBuf,
    },

    /// List partitions with chunk counts and last indexes
    Partitions {
        /// Store directory
        #[arg(long, default_value = "./silt-data")]
        path: PathBuf,
    },

    /// Print the chunks of one partition, one JSON object per line
    Read {
        /// Store directory
        #[arg(long, default_value = "./silt-data")]
        path: PathBuf,

        /// Partition to read
        #[arg(long)]
        partition: String,

        /// First index, inclusive
        #[arg(long, default_value_t = 1)]
        from: i64,

        /// Last index, inclusive; unbounded when omitted
        #[arg(long)]
        to: Option<i64>,

        /// Maximum number of chunks to print
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Append one chunk with a backend-assigned index
    Append {
        /// Store directory
        #[arg(long, default_value = "./silt-data")]
        path: PathBuf,

        /// Partition to append to
        #[arg(long)]
        partition: String,

        /// Chunk payload as JSON
        #[arg(long)]
        payload: String,

        /// Idempotency key; repeating it makes the append a no-op
        #[arg(long)]
        operation_id: Option<String>,
    },

    /// Follow the global log, printing chunks as they arrive
    Tail {
        /// Store directory
        #[arg(long, default_value = "./silt-data")]
        path: PathBuf,

        /// Deliver chunks with positions strictly greater than this
        #[arg(long, default_value_t = 0)]
        from: i64,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
