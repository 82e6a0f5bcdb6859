//! Reading a ledger back, tolerating damage.

use std::path::Path;

use super::record::ScoredResult;
use crate::error::LedgerError;

/// Parsed ledger contents.
#[derive(Debug, Clone, Default)]
pub struct LoadedLedger {
    pub records: Vec<ScoredResult>,
    /// Lines that could not be parsed.
    pub skipped_lines: usize,
    /// True when the last non-empty line was unparseable, which is what an
    /// interrupted write leaves behind.
    pub truncated_tail: bool,
}

/// Load every parseable record from `path`. A missing file is an empty
/// ledger.
pub fn load_ledger(path: &Path) -> Result<LoadedLedger, LedgerError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadedLedger::default()),
        Err(e) => return Err(e.into()),
    };
    let content = String::from_utf8_lossy(&bytes);

    let mut loaded = LoadedLedger::default();
    let mut last_bad = false;
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<ScoredResult>(line) {
            Ok(record) => {
                loaded.records.push(record);
                last_bad = false;
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable ledger line"
                );
                loaded.skipped_lines += 1;
                last_bad = true;
            }
        }
    }
    loaded.truncated_tail = last_bad;
    Ok(loaded)
}
