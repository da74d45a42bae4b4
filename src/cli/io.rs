//! JSON output handling for the CLI.
//!
//! Everything machine-readable goes to stdout as UTF-8 JSON; logging goes
//! to stderr so pipelines stay clean.

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

/// Write a pretty-printed JSON document, for one-shot summaries.
pub fn write_json(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

/// Write one compact JSON object per line, for streams of chunks.
pub fn write_record(value: &Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}
