//! Account balance snapshot kept by the engine between cycles.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Opaque account/balance fields as last fetched from the brokerage.
///
/// `stale` flips when a refresh fails, so a reader can tell "old data kept
/// after a failed fetch" apart from a fresh snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    /// Brokerage account id these fields belong to
    pub account_id: String,

    /// Raw balance fields, passed through untouched
    pub fields: Map<String, Value>,

    /// When the fields were last fetched successfully
    pub fetched_at: Option<DateTime<Utc>>,

    /// Whether the most recent refresh attempt failed
    pub stale: bool,
}

impl AccountSnapshot {
    /// Placeholder before the first successful fetch.
    pub fn empty(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            fields: Map::new(),
            fetched_at: None,
            stale: false,
        }
    }

    /// Snapshot from a successful fetch.
    pub fn fresh(account_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            account_id: account_id.into(),
            fields,
            fetched_at: Some(Utc::now()),
            stale: false,
        }
    }

    /// Flag the snapshot as outdated after a failed refresh.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }
}
