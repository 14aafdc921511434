//! Durable per-message idempotency ledger
//!
//! The ledger is the only state that survives a crash. It maps message ids
//! to their processing outcome; once an id is marked succeeded the processor
//! never fetches, classifies, or acts on it again, in this run or any later
//! one. Every transition is written to disk before the next message starts,
//! so an interruption leaves at most the in-flight message non-terminal.
//!
//! Saves go through a temp file in the same directory followed by a rename,
//! so a crash mid-write leaves the previous ledger intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, TriageError};
use crate::models::Verdict;

/// Pipeline stage a per-message failure occurred in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Classify,
    Act,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Fetch => write!(f, "fetch"),
            Stage::Classify => write!(f, "classify"),
            Stage::Act => write!(f, "act"),
        }
    }
}

/// Outcome recorded for one message id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryStatus {
    /// Processing started but no terminal state written; safe to reprocess
    Pending,
    /// Terminal: verdict obtained and any required action applied
    Succeeded { verdict: Verdict, acted: bool },
    /// Terminal for this run; retried on the next run
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub status: EntryStatus,
    pub run_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Tallies over all ledger entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
}

/// The durable ledger, single-writer by construction
#[derive(Debug)]
pub struct ActionLedger {
    path: PathBuf,
    entries: HashMap<String, LedgerEntry>,
}

impl ActionLedger {
    /// Load the ledger, or start empty when no file exists yet
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No existing ledger at {:?}, starting fresh", path);
            return Ok(Self {
                path: path.to_path_buf(),
                entries: HashMap::new(),
            });
        }

        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::LedgerError(format!("Failed to read ledger: {}", e)))?;
        let entries: HashMap<String, LedgerEntry> = serde_json::from_str(&json)
            .map_err(|e| TriageError::LedgerError(format!("Corrupt ledger file: {}", e)))?;

        let counts = count_entries(&entries);
        info!(
            "Loaded ledger: {} entries ({} succeeded, {} failed, {} pending)",
            entries.len(),
            counts.succeeded,
            counts.failed,
            counts.pending
        );

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(message_id)
    }

    /// The idempotence check: has this message already been fully handled?
    pub fn is_succeeded(&self, message_id: &str) -> bool {
        matches!(
            self.entries.get(message_id),
            Some(LedgerEntry {
                status: EntryStatus::Succeeded { .. },
                ..
            })
        )
    }

    pub fn counts(&self) -> LedgerCounts {
        count_entries(&self.entries)
    }

    /// Entries currently in the failed state, for status reporting
    pub fn failed_entries(&self) -> impl Iterator<Item = (&String, &LedgerEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry.status, EntryStatus::Failed { .. }))
    }

    /// Mark a message in-flight and persist before any external call is made
    pub async fn mark_pending(&mut self, message_id: &str, run_id: &str) -> Result<()> {
        self.transition(message_id, run_id, EntryStatus::Pending)
            .await
    }

    /// Record a terminal success; the action (if any) has already been applied
    pub async fn mark_succeeded(
        &mut self,
        message_id: &str,
        run_id: &str,
        verdict: Verdict,
        acted: bool,
    ) -> Result<()> {
        self.transition(message_id, run_id, EntryStatus::Succeeded { verdict, acted })
            .await
    }

    /// Record a per-message failure; the next run will retry this id
    pub async fn mark_failed(
        &mut self,
        message_id: &str,
        run_id: &str,
        stage: Stage,
        reason: String,
    ) -> Result<()> {
        self.transition(message_id, run_id, EntryStatus::Failed { stage, reason })
            .await
    }

    async fn transition(&mut self, message_id: &str, run_id: &str, status: EntryStatus) -> Result<()> {
        // A succeeded entry is final: the action may already have been taken,
        // so it must never be rewound into a reprocessable state.
        if self.is_succeeded(message_id) {
            warn!(
                "Refusing to overwrite succeeded ledger entry for {} with {:?}",
                message_id, status
            );
            return Ok(());
        }

        self.entries.insert(
            message_id.to_string(),
            LedgerEntry {
                status,
                run_id: run_id.to_string(),
                updated_at: Utc::now(),
            },
        );
        self.save().await
    }

    /// Persist atomically: write a temp file, then rename over the ledger
    async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TriageError::LedgerError(format!("Failed to create ledger directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| TriageError::LedgerError(format!("Failed to serialize ledger: {}", e)))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| TriageError::LedgerError(format!("Failed to write ledger: {}", e)))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| TriageError::LedgerError(format!("Failed to replace ledger: {}", e)))?;

        debug!("Saved ledger ({} entries) to {:?}", self.entries.len(), self.path);
        Ok(())
    }
}

fn count_entries(entries: &HashMap<String, LedgerEntry>) -> LedgerCounts {
    let mut counts = LedgerCounts::default();
    for entry in entries.values() {
        match entry.status {
            EntryStatus::Succeeded { .. } => counts.succeeded += 1,
            EntryStatus::Failed { .. } => counts.failed += 1,
            EntryStatus::Pending => counts.pending += 1,
        }
    }
    counts
}
