//! Inbox Triage
//!
//! Classifies a Gmail account's unread backlog with an OpenAI chat model and
//! applies a terminal action (mark read, archive, or label) to promotional
//! messages - exactly once per message, resumable across interruptions.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 installed-app flow with token caching
//! - **Listing**: lazy, paginated enumeration of the unread backlog
//! - **Classification**: one promotional/not-promotional verdict per message
//! - **Actions**: label modifications applied at most once per message
//! - **Ledger**: durable per-message idempotency record; re-running after a
//!   crash never re-touches handled messages
//! - **Throttling & retries**: token-bucket quotas for both external APIs,
//!   bounded exponential backoff for transient failures
//!
//! # Example Usage
//!
//! ```no_run
//! use inbox_triage::classifier::{OpenAiClassifier, UserIdentity};
//! use inbox_triage::config::Config;
//! use inbox_triage::ledger::ActionLedger;
//! use inbox_triage::mail::GmailMailClient;
//! use inbox_triage::models::MessageAction;
//! use inbox_triage::processor::{BacklogProcessor, RunOptions};
//! use inbox_triage::retry::RetryPolicy;
//! use inbox_triage::throttle::CallThrottle;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let hub = inbox_triage::auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".inbox-triage/token.json".as_ref(),
//!     )
//!     .await?;
//!
//!     let throttle = CallThrottle::default();
//!     let mail = GmailMailClient::new(hub, throttle.clone(), Duration::from_secs(30), 100);
//!     let classifier = OpenAiClassifier::new(
//!         config.classifier.model.clone(),
//!         config.classifier.max_body_chars,
//!         throttle,
//!         Duration::from_secs(30),
//!     );
//!     let mut ledger = ActionLedger::load(".inbox-triage/ledger.json".as_ref()).await?;
//!
//!     let options = RunOptions {
//!         user: UserIdentity {
//!             first_name: "Ada".into(),
//!             last_name: "Lovelace".into(),
//!         },
//!         action: MessageAction::mark_read(),
//!         on_ambiguous: config.classifier.on_ambiguous,
//!         retry: RetryPolicy::from_limits(&config.limits),
//!         dry_run: false,
//!         max_messages: None,
//!     };
//!
//!     let summary = BacklogProcessor::new(&mail, &classifier, &mut ledger, options)
//!         .run()
//!         .await?;
//!     println!("acted on {} of {}", summary.acted_on, summary.unread_seen);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`mail`] - Gmail client: unread listing, fetch, terminal actions
//! - [`classifier`] - OpenAI-backed promotional classification
//! - [`processor`] - the backlog run loop (idempotent, resumable)
//! - [`ledger`] - durable per-message idempotency ledger
//! - [`retry`] - bounded-attempt backoff state machine
//! - [`throttle`] - token-bucket quotas for both external APIs
//! - [`cli`] - command-line interface
//! - [`config`] - configuration management
//! - [`error`] - error types and result alias
//! - [`models`] - core data structures

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod mail;
pub mod models;
pub mod processor;
pub mod retry;
pub mod throttle;

// Re-export commonly used types for convenience
pub use error::{Result, TriageError};

// Core data models
pub use models::{EmailMessage, MessageAction, RunSummary, Verdict};

// Client seams
pub use classifier::{Classifier, OpenAiClassifier, UserIdentity};
pub use mail::{GmailMailClient, MailClient, UnreadPage};

// Core pipeline
pub use ledger::{ActionLedger, EntryStatus, Stage};
pub use processor::{BacklogProcessor, RunOptions};
pub use retry::{Backoff, RetryPolicy};
pub use throttle::{CallCost, CallThrottle};

// Config types
pub use config::{ActionMode, AmbiguousPolicy, Config};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
