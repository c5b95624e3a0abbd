//! Pending-approval table.
//!
//! Gated operations (patches, commits, command runs) park a record here and
//! fail closed with `APPROVAL_REQUIRED` until a human decision arrives via
//! `approvals.resolve`. Records expire at `timeoutAt`; resolutions are
//! consumed atomically by the retried call. The lock is held only for map
//! operations, never across I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalKind {
    Write,
    Exec,
    Patch,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub id: String,
    pub kind: ApprovalKind,
    pub description: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
}

/// Outcome of consuming an approval id on a retried call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consume {
    Approved,
    Denied,
    /// Still awaiting a decision.
    Pending,
    /// Unknown id, or the decision window has passed.
    Expired,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<String, PendingApproval>,
    /// id -> (approved, valid-until). Kept until consumed or expired.
    resolved: HashMap<String, (bool, DateTime<Utc>)>,
}

pub struct ApprovalTable {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl ApprovalTable {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl: Duration::milliseconds(timeout_ms as i64),
        }
    }

    /// Park a new gated operation. Returns the record to surface to the
    /// client (id, kind, expiry).
    pub fn create(&self, kind: ApprovalKind, description: String, details: Value) -> PendingApproval {
        let now = Utc::now();
        let record = PendingApproval {
            id: Uuid::new_v4().to_string(),
            kind,
            description,
            details,
            created_at: now,
            timeout_at: now + self.ttl,
        };
        let mut inner = self.inner.lock().unwrap();
        Self::sweep(&mut inner, now);
        inner.pending.insert(record.id.clone(), record.clone());
        record
    }

    /// Snapshot of the still-pending records, oldest first.
    pub fn list(&self) -> Vec<PendingApproval> {
        let mut inner = self.inner.lock().unwrap();
        Self::sweep(&mut inner, Utc::now());
        let mut records: Vec<_> = inner.pending.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Apply a human decision. Returns the record it applied to, or `None`
    /// for an unknown or already-expired id.
    pub fn resolve(&self, id: &str, approve: bool) -> Option<PendingApproval> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        Self::sweep(&mut inner, now);
        let record = inner.pending.remove(id)?;
        inner
            .resolved
            .insert(record.id.clone(), (approve, record.timeout_at));
        Some(record)
    }

    /// Consume a resolution for a retried call. Approvals are single-use:
    /// a consumed id cannot authorise a second operation.
    pub fn consume(&self, id: &str) -> Consume {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        Self::sweep(&mut inner, now);
        if let Some((approve, _)) = inner.resolved.remove(id) {
            return if approve {
                Consume::Approved
            } else {
                Consume::Denied
            };
        }
        if inner.pending.contains_key(id) {
            Consume::Pending
        } else {
            Consume::Expired
        }
    }

    fn sweep(inner: &mut Inner, now: DateTime<Utc>) {
        inner.pending.retain(|_, r| r.timeout_at > now);
        inner.resolved.retain(|_, (_, valid_until)| *valid_until > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ApprovalTable {
        ApprovalTable::new(300_000)
    }

    #[test]
    fn create_then_list() {
        let t = table();
        let rec = t.create(
            ApprovalKind::Exec,
            "run cargo test".into(),
            serde_json::json!({"command": "cargo test"}),
        );
        assert_eq!(rec.kind, ApprovalKind::Exec);
        assert!(rec.timeout_at > rec.created_at);

        let listed = t.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, rec.id);
    }

    #[test]
    fn unconsumed_id_is_pending() {
        let t = table();
        let rec = t.create(ApprovalKind::Patch, "apply patch".into(), Value::Null);
        assert_eq!(t.consume(&rec.id), Consume::Pending);
        // Consuming while pending must not destroy the record.
        assert_eq!(t.list().len(), 1);
    }

    #[test]
    fn approve_then_consume_once() {
        let t = table();
        let rec = t.create(ApprovalKind::Write, "commit".into(), Value::Null);
        assert!(t.resolve(&rec.id, true).is_some());
        // Resolution removes it from the pending list.
        assert!(t.list().is_empty());
        assert_eq!(t.consume(&rec.id), Consume::Approved);
        // Single use: a second consume finds nothing.
        assert_eq!(t.consume(&rec.id), Consume::Expired);
    }

    #[test]
    fn deny_is_reported() {
        let t = table();
        let rec = t.create(ApprovalKind::Exec, "run rm".into(), Value::Null);
        assert!(t.resolve(&rec.id, false).is_some());
        assert_eq!(t.consume(&rec.id), Consume::Denied);
    }

    #[test]
    fn unknown_id_is_expired() {
        let t = table();
        assert_eq!(t.consume("no-such-id"), Consume::Expired);
        assert!(t.resolve("no-such-id", true).is_none());
    }

    #[test]
    fn records_expire() {
        let t = ApprovalTable::new(1_000);
        let rec = t.create(ApprovalKind::Exec, "slow human".into(), Value::Null);
        // Force the record past its window.
        {
            let mut inner = t.inner.lock().unwrap();
            inner.pending.get_mut(&rec.id).unwrap().timeout_at =
                Utc::now() - Duration::seconds(1);
        }
        assert!(t.list().is_empty());
        assert_eq!(t.consume(&rec.id), Consume::Expired);
        assert!(t.resolve(&rec.id, true).is_none());
    }

    #[test]
    fn resolution_expires_with_the_original_window() {
        let t = table();
        let rec = t.create(ApprovalKind::Write, "commit".into(), Value::Null);
        t.resolve(&rec.id, true).unwrap();
        {
            let mut inner = t.inner.lock().unwrap();
            inner.resolved.get_mut(&rec.id).unwrap().1 = Utc::now() - Duration::seconds(1);
        }
        assert_eq!(t.consume(&rec.id), Consume::Expired);
    }
}
