//! Built-in `"audit"` tag hook, grounded on the teacher's
//! `mqk-audit::AuditWriter`: an append-only JSON-lines sink. Unlike the
//! teacher, there is no SHA-256 hash chain here — spec.md's audit trail is
//! a record of what happened, not a tamper-evidence log, so the chaining
//! machinery has no counterpart and was dropped (see DESIGN.md).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tag_hooks::{HookError, TagHook, TaggedMessage};

/// One audit trail line. `excluded_by_self_tag` records the non-recursion
/// invariant at the point of writing: this record is itself tagged
/// `"exclude-from-audit"` so, were it ever re-ingested as a message, the
/// audit hook would refuse to audit its own output (spec.md §3.2.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub message_id: Uuid,
    pub message_type: String,
    pub stream_id: String,
    pub matched_tag: String,
    pub payload: serde_json::Value,
    pub tags: Vec<String>,
}

pub const EXCLUDE_FROM_AUDIT_TAG: &str = "exclude-from-audit";

/// Append-only JSON-lines writer. One physical file, append mode, one
/// `fsync`-backed `write_all` per record — no chain hash, no rotation.
pub struct AuditWriter {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl AuditWriter {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record).expect("AuditRecord always serializes");
        line.push('\n');
        let mut file = self.file.lock().expect("audit file mutex poisoned");
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

/// Builds the `"audit"` tag hook. Guards against the non-recursion case
/// explicitly (spec.md §3.2.7, scenario §8.6): a message already carrying
/// `"exclude-from-audit"` — including any `AuditRecord` that somehow made
/// its way back through the tag pipeline — is skipped rather than written.
pub fn audit_tag_hook(writer: std::sync::Arc<AuditWriter>) -> TagHook {
    Box::new(move |message: &TaggedMessage| {
        if message.has_tag(EXCLUDE_FROM_AUDIT_TAG) {
            return Ok(());
        }

        let record = AuditRecord {
            event_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            message_id: message.message_id,
            message_type: message.message_type.clone(),
            stream_id: message.stream_id.clone(),
            matched_tag: message.matched_tag.clone(),
            payload: message.payload.clone(),
            tags: message.tags.clone(),
        };

        writer.append(&record).map_err(|e| HookError(e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(tags: &[&str]) -> TaggedMessage {
        TaggedMessage {
            message_id: Uuid::new_v4(),
            message_type: "CreateProduct".to_string(),
            stream_id: "P1".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            matched_tag: "audit".to_string(),
            payload: serde_json::json!({"sku": "abc"}),
        }
    }

    #[test]
    fn appends_one_json_line_per_tagged_message() {
        let dir = std::env::temp_dir().join(format!("wcf-audit-test-{}", Uuid::new_v4()));
        let writer = std::sync::Arc::new(AuditWriter::open(dir.join("audit.jsonl")).unwrap());
        let hook = audit_tag_hook(writer.clone());

        hook(&msg(&["audit"])).unwrap();
        hook(&msg(&["audit"])).unwrap();

        let content = std::fs::read_to_string(writer.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn skips_messages_already_tagged_exclude_from_audit() {
        let dir = std::env::temp_dir().join(format!("wcf-audit-test-{}", Uuid::new_v4()));
        let writer = std::sync::Arc::new(AuditWriter::open(dir.join("audit.jsonl")).unwrap());
        let hook = audit_tag_hook(writer.clone());

        hook(&msg(&["audit", EXCLUDE_FROM_AUDIT_TAG])).unwrap();

        assert!(!writer.path().exists() || std::fs::read_to_string(writer.path()).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
