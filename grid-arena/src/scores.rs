//! Win counts that survive server restarts.
//!
//! The on-disk form is one `<name> <wins>` line per player, whitespace
//! separated. The whole file is rewritten after every decided round; with a
//! handful of players the simplicity beats any incremental scheme.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

/// Name to win count. BTreeMap keeps the file deterministic across rewrites.
pub type ScoreTable = BTreeMap<String, u32>;

/// Loads the table from `path`. A missing file is an empty table, not an
/// error. Malformed lines are skipped with a warning so one bad edit never
/// blocks startup; real I/O failures surface to the caller.
pub async fn load(path: &Path) -> Result<ScoreTable> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ScoreTable::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read score file {}", path.display()));
        }
    };

    let mut table = ScoreTable::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some((name, wins)) => {
                table.insert(name.to_string(), wins);
            }
            None => warn!(line, "skipping malformed score line"),
        }
    }

    Ok(table)
}

fn parse_line(line: &str) -> Option<(&str, u32)> {
    let mut parts = line.split_whitespace();
    let name = parts.next()?;
    let wins = parts.next()?.parse().ok()?;
    match parts.next() {
        Some(_) => None,
        None => Some((name, wins)),
    }
}

/// Rewrites the whole file from `table`.
pub async fn save(path: &Path, table: &ScoreTable) -> Result<()> {
    let mut contents = String::new();
    for (name, wins) in table {
        // Writing to a String cannot fail.
        let _ = writeln!(contents, "{name} {wins}");
    }

    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write score file {}", path.display()))
}
