use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fetched email, owned transiently for one processing attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub cc: Option<String>,
    pub labels: Vec<String>,
    /// Plain-text body, empty when no text/plain part was found
    pub body: String,
}

impl EmailMessage {
    /// Body truncated to `max_chars`, with an ellipsis when cut
    pub fn truncated_body(&self, max_chars: usize) -> String {
        if self.body.chars().count() <= max_chars {
            self.body.clone()
        } else {
            let cut: String = self.body.chars().take(max_chars).collect();
            format!("{}...", cut)
        }
    }
}

/// The classifier's categorical output for one message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verdict {
    /// Promotional, automated, or mass-sent - apply the configured action
    Promotional,
    /// Personal or otherwise worth attention - leave untouched
    NotPromotional,
    /// The model answered something other than True/False
    Unknown,
}

/// Label modifications applied as a message's terminal action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageAction {
    pub add_label_ids: Vec<String>,
    pub remove_label_ids: Vec<String>,
}

impl MessageAction {
    /// Mark the message read by removing the UNREAD label
    pub fn mark_read() -> Self {
        Self {
            add_label_ids: Vec::new(),
            remove_label_ids: vec!["UNREAD".to_string()],
        }
    }

    /// Mark read and remove from the inbox
    pub fn archive() -> Self {
        Self {
            add_label_ids: Vec::new(),
            remove_label_ids: vec!["UNREAD".to_string(), "INBOX".to_string()],
        }
    }

    /// Mark read and file under an existing label id
    pub fn file_under(label_id: &str) -> Self {
        Self {
            add_label_ids: vec![label_id.to_string()],
            remove_label_ids: vec!["UNREAD".to_string()],
        }
    }
}

/// Counts reported at the end of a run
///
/// `processed` counts messages that reached a terminal ledger state this run;
/// `skipped` counts messages the ledger already recorded as succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages_fetched: usize,
    pub unread_seen: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub acted_on: usize,
    pub retained: usize,
    pub flagged_for_review: usize,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            pages_fetched: 0,
            unread_seen: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            acted_on: 0,
            retained: 0,
            flagged_for_review: 0,
            dry_run,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}
