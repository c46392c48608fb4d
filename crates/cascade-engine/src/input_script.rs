//! Scripted input source for the engine binary.
//!
//! An input script is a JSON-lines file. Each non-empty line that does not
//! start with `#` holds one [`EngineInput`] plus an optional `delay_ms`
//! that is waited out before the input is sent:
//!
//! ```text
//! # wake the concept cluster
//! {"type":"stimulus","energy_budget":4.0,"entry_nodes":["n1"],"entity_mix":{"e1":1.0}}
//! {"delay_ms":500,"type":"reinforcement","target":{"kind":"link","id":"l1"},"delta":1.0,"entity":"e1"}
//! ```
//!
//! Lines that fail to parse are skipped with a warning, so a partly broken
//! script still drives the engine.

use std::path::Path;
use std::time::Duration;

use cascade_core::EngineInput;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// One parsed script line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptLine {
    /// Wait before sending, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
    /// The input to send.
    #[serde(flatten)]
    pub input: EngineInput,
}

/// A line that could not be parsed.
#[derive(Debug)]
pub struct ScriptIssue {
    /// One-based line number.
    pub line: usize,
    /// What went wrong.
    pub error: serde_json::Error,
}

/// Parse a whole script, keeping every line that parses.
pub fn parse_script(contents: &str) -> (Vec<ScriptLine>, Vec<ScriptIssue>) {
    let mut lines = Vec::new();
    let mut issues = Vec::new();
    for (index, raw) in contents.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<ScriptLine>(trimmed) {
            Ok(line) => lines.push(line),
            Err(error) => issues.push(ScriptIssue {
                line: index.saturating_add(1),
                error,
            }),
        }
    }
    (lines, issues)
}

/// Read a script from disk.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the file cannot be read.
pub async fn load_script(path: &Path) -> Result<Vec<ScriptLine>, EngineError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let (lines, issues) = parse_script(&contents);
    for issue in &issues {
        warn!(
            path = %path.display(),
            line = issue.line,
            error = %issue.error,
            "Skipping malformed script line"
        );
    }
    info!(
        path = %path.display(),
        inputs = lines.len(),
        skipped = issues.len(),
        "Input script loaded"
    );
    Ok(lines)
}

/// Send every scripted input, honouring the per-line delays.
///
/// Returns the number of inputs delivered. Stops early if the engine has
/// dropped its receiver.
pub async fn feed(lines: Vec<ScriptLine>, tx: mpsc::Sender<EngineInput>) -> usize {
    let mut sent = 0_usize;
    for line in lines {
        if line.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(line.delay_ms)).await;
        }
        if tx.send(line.input).await.is_err() {
            debug!(sent, "Engine input channel closed, script stopped");
            break;
        }
        sent = sent.saturating_add(1);
    }
    sent
}
