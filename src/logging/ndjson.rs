use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Append one NDJSON line describing a terminal delivery outcome.
/// Best-effort: callers ignore failures so logging can never stall
/// delivery.
pub fn mirror_outcome(
    path: &Path,
    event_id: &str,
    event_name: &str,
    outcome: &str,
    attempts: i64,
    error: Option<&str>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    let line = json!({
        "ts": Utc::now().to_rfc3339(),
        "event_id": event_id,
        "event": event_name,
        "outcome": outcome,
        "attempts": attempts,
        "error": error
    });
    writeln!(f, "{}", line)?;
    Ok(())
}
