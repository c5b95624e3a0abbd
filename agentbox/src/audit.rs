//! Append-only audit trail.
//!
//! Every authorisation decision, tool call, and outcome lands here so a run
//! can be reconstructed from the log alone. The recorder is a pure
//! observer: nothing ever consults it for authorisation. Entries are
//! buffered per run and flushed to `<configDir>/audit/<runId>.jsonl` (one
//! JSON document per line) with a human-readable sibling under `logs/`.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Strings longer than this are elided from audit input/output; file
/// contents never belong in the log.
const MAX_AUDIT_STRING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditType {
    ToolCall,
    Approval,
    Patch,
    Command,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub run_id: String,
    #[serde(rename = "type")]
    pub entry_type: AuditType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-run audit buffer. Owned by the session that created it; the mutex
/// only covers buffer pushes and the flush drain.
pub struct AuditLog {
    run_id: String,
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(
        &self,
        entry_type: AuditType,
        tool: Option<&str>,
        input: Option<&Value>,
        output: Option<Value>,
        duration_ms: Option<u64>,
        error: Option<String>,
    ) {
        let entry = AuditEntry {
            ts: Utc::now(),
            run_id: self.run_id.clone(),
            entry_type,
            tool: tool.map(str::to_string),
            input: input.map(redact),
            output: output.map(|v| redact(&v)),
            duration_ms,
            error,
        };
        self.entries.lock().unwrap().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist and drain the buffer: JSONL under `audit_dir`, a free-form
    /// line-per-entry log under `logs_dir`. Appends, so repeated flushes of
    /// one run accumulate in the same files.
    pub fn flush(&self, audit_dir: &Path, logs_dir: &Path) -> Result<()> {
        let drained: Vec<AuditEntry> = {
            let mut entries = self.entries.lock().unwrap();
            std::mem::take(&mut *entries)
        };
        if drained.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(audit_dir)
            .with_context(|| format!("creating {}", audit_dir.display()))?;
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("creating {}", logs_dir.display()))?;

        use std::io::Write;
        let jsonl_path = audit_dir.join(format!("{}.jsonl", self.run_id));
        let mut jsonl = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&jsonl_path)
            .with_context(|| format!("opening {}", jsonl_path.display()))?;
        let log_path = logs_dir.join(format!("{}.log", self.run_id));
        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("opening {}", log_path.display()))?;

        for entry in &drained {
            serde_json::to_writer(&mut jsonl, entry)?;
            jsonl.write_all(b"\n")?;
            writeln!(
                log,
                "{} {:?} tool={} duration_ms={} error={}",
                entry.ts.to_rfc3339(),
                entry.entry_type,
                entry.tool.as_deref().unwrap_or("-"),
                entry
                    .duration_ms
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".into()),
                entry.error.as_deref().unwrap_or("-"),
            )?;
        }
        Ok(())
    }
}

/// Strip secrets and bulk content from a value before it enters the buffer:
/// token-ish keys are masked, long strings elided, recursively.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let lower = k.to_ascii_lowercase();
                    if lower.contains("token") || lower.contains("secret") {
                        (k.clone(), Value::String("[REDACTED]".into()))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::String(s) if s.len() > MAX_AUDIT_STRING => {
            let mut cut = MAX_AUDIT_STRING;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            Value::String(format!("{}… ({} bytes elided)", &s[..cut], s.len() - cut))
        }
        other => other.clone(),
    }
}
