//! Command-line interface and run orchestration

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth;
use crate::classifier::{OpenAiClassifier, UserIdentity};
use crate::config::{ActionMode, Config};
use crate::error::{Result, TriageError};
use crate::ledger::ActionLedger;
use crate::mail::GmailMailClient;
use crate::models::{MessageAction, RunSummary};
use crate::processor::{BacklogProcessor, RunOptions};
use crate::retry::RetryPolicy;
use crate::throttle::CallThrottle;

#[derive(Parser, Debug)]
#[command(name = "inbox-triage")]
#[command(version)]
#[command(about = "Classify unread mail with an LLM and clear the promotional backlog", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".inbox-triage/token.json")]
    pub token_cache: PathBuf,

    /// Path to the idempotency ledger
    #[arg(long, default_value = ".inbox-triage/ledger.json")]
    pub ledger_file: PathBuf,

    /// Path to the run log file (append mode)
    #[arg(long, default_value = ".inbox-triage/run.log")]
    pub log_file: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process the unread backlog once
    Run {
        /// User's first name, used to personalize the classification prompt
        first_name: String,

        /// User's last name
        last_name: String,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Classify only; apply no actions and leave the ledger untouched
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many unread messages
        #[arg(long)]
        max_messages: Option<usize>,
    },

    /// Authenticate with the Gmail API
    Auth {
        /// Force re-authentication even if a token exists
        #[arg(long)]
        force: bool,
    },

    /// Show ledger totals from previous runs
    Status {
        /// List failed message ids
        #[arg(long)]
        detailed: bool,
    },

    /// Generate an example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    counter_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let counter_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {pos} messages {msg}")
            .unwrap()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi: MultiProgress::new(),
            spinner_style,
            counter_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Spinner with a message counter; the backlog length isn't known upfront
    pub fn add_message_counter(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.counter_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute a full triage run
pub async fn run_backlog(
    cli: &Cli,
    first_name: &str,
    last_name: &str,
    model_override: Option<&str>,
    dry_run: bool,
    max_messages: Option<usize>,
) -> Result<RunSummary> {
    let reporter = ProgressReporter::new();

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let mut config = Config::load(&cli.config).await?;
    if let Some(model) = model_override {
        config.classifier.model = model.to_string();
        config.validate()?;
    }
    reporter.finish_spinner(
        &config_spinner,
        &format!("Configuration loaded (model: {})", config.classifier.model),
    );

    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    if cli.token_cache.exists() {
        auth::secure_token_file(&cli.token_cache).await?;
    }
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");

    let throttle = CallThrottle::new(
        config.limits.mail_units_per_sec,
        config.limits.mail_units_burst,
        config.limits.classifier_requests_per_minute,
    );
    let call_timeout = Duration::from_secs(config.limits.call_timeout_secs);

    let mail = GmailMailClient::new(
        hub,
        throttle.clone(),
        call_timeout,
        config.limits.page_size,
    );

    // The label mode needs a concrete label id before the run starts
    let action = match config.action.mode {
        ActionMode::MarkRead => MessageAction::mark_read(),
        ActionMode::Archive => MessageAction::archive(),
        ActionMode::Label => {
            let name = config
                .action
                .label_name
                .as_deref()
                .ok_or_else(|| {
                    TriageError::ConfigError(
                        "action.label_name is required when action.mode is 'label'".to_string(),
                    )
                })?;
            let label_spinner = reporter.add_spinner("Resolving target label...");
            let label_id = mail.resolve_label(name).await?;
            reporter.finish_spinner(
                &label_spinner,
                &format!("Label '{}' resolved ({})", name, label_id),
            );
            MessageAction::file_under(&label_id)
        }
    };

    let classifier = OpenAiClassifier::new(
        config.classifier.model.clone(),
        config.classifier.max_body_chars,
        throttle,
        call_timeout,
    );

    let mut ledger = ActionLedger::load(&cli.ledger_file).await?;
    let already_done = ledger.counts().succeeded;
    if already_done > 0 {
        info!("Ledger already records {} handled messages", already_done);
    }

    let options = RunOptions {
        user: UserIdentity {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        },
        action,
        on_ambiguous: config.classifier.on_ambiguous,
        retry: RetryPolicy::from_limits(&config.limits),
        dry_run,
        max_messages,
    };

    let counter = reporter.add_message_counter("processed");
    let pb = counter.clone();
    let mut processor = BacklogProcessor::new(&mail, &classifier, &mut ledger, options)
        .with_progress(Arc::new(move || pb.inc(1)));

    // Stop cleanly between messages on Ctrl-C; the ledger stays consistent
    let cancel = processor.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the in-flight message");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let summary = processor.run().await?;
    counter.finish_and_clear();

    Ok(summary)
}

/// Print the end-of-run summary block
pub fn print_summary(summary: &RunSummary) {
    println!("\n========================================");
    if summary.dry_run {
        println!("Triage Run Summary (DRY RUN)");
    } else {
        println!("Triage Run Summary");
    }
    println!("========================================");
    println!("Run ID: {}", summary.run_id);
    println!("Duration: {} seconds", summary.duration_seconds());
    println!("Pages fetched: {}", summary.pages_fetched);
    println!("Unread messages seen: {}", summary.unread_seen);
    println!("Processed this run: {}", summary.processed);
    println!("Already done (skipped): {}", summary.skipped);
    println!("Acted on: {}", summary.acted_on);
    println!("Left for reading: {}", summary.retained);
    println!("Flagged for review: {}", summary.flagged_for_review);
    println!("Failed: {}", summary.failed);
    println!("========================================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_with_positional_names() {
        let cli = Cli::parse_from([
            "inbox-triage",
            "run",
            "Ada",
            "Lovelace",
            "--model",
            "gpt-4o-mini",
            "--dry-run",
        ]);

        match cli.command {
            Commands::Run {
                first_name,
                last_name,
                model,
                dry_run,
                max_messages,
            } => {
                assert_eq!(first_name, "Ada");
                assert_eq!(last_name, "Lovelace");
                assert_eq!(model.as_deref(), Some("gpt-4o-mini"));
                assert!(dry_run);
                assert_eq!(max_messages, None);
            }
            other => panic!("expected run command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_run_requires_both_names() {
        let result = Cli::try_parse_from(["inbox-triage", "run", "Ada"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_default_paths() {
        let cli = Cli::parse_from(["inbox-triage", "status"]);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert_eq!(cli.ledger_file, PathBuf::from(".inbox-triage/ledger.json"));
        assert_eq!(cli.log_file, PathBuf::from(".inbox-triage/run.log"));
    }

    #[test]
    fn test_cli_max_messages() {
        let cli = Cli::parse_from([
            "inbox-triage",
            "run",
            "Ada",
            "Lovelace",
            "--max-messages",
            "25",
        ]);
        match cli.command {
            Commands::Run { max_messages, .. } => assert_eq!(max_messages, Some(25)),
            other => panic!("expected run command, got {:?}", other),
        }
    }
}
