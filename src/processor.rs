//! The backlog processor: the end-to-end triage loop
//!
//! Drives one run over the unread backlog, strictly one message at a time.
//! Sequential processing is deliberate: it bounds load on both external
//! services and keeps the ledger single-writer, so idempotence needs no
//! coordination. Every per-message failure is caught here, recorded, and the
//! run continues; only auth and ledger-storage failures abort.
//!
//! The ledger write for a message always completes before the next message
//! starts, so killing the process between messages leaves at most one id in
//! a non-terminal (safely reprocessable) state.

use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, UserIdentity};
use crate::config::AmbiguousPolicy;
use crate::error::{Result, TriageError};
use crate::ledger::{ActionLedger, Stage};
use crate::mail::{unread_id_stream, MailClient};
use crate::models::{MessageAction, RunSummary, Verdict};
use crate::retry::{with_retry, RetryPolicy};

/// Progress callback, invoked once per message seen
pub type ProgressCallback = Arc<dyn Fn() + Send + Sync>;

/// Per-run settings resolved before processing starts
#[derive(Clone)]
pub struct RunOptions {
    pub user: UserIdentity,
    /// Action applied to messages judged promotional
    pub action: MessageAction,
    pub on_ambiguous: AmbiguousPolicy,
    pub retry: RetryPolicy,
    pub dry_run: bool,
    /// Stop after this many unread messages, for partial runs
    pub max_messages: Option<usize>,
}

pub struct BacklogProcessor<'a> {
    mail: &'a dyn MailClient,
    classifier: &'a dyn Classifier,
    ledger: &'a mut ActionLedger,
    options: RunOptions,
    progress: Option<ProgressCallback>,
    cancel: Arc<AtomicBool>,
}

impl<'a> BacklogProcessor<'a> {
    pub fn new(
        mail: &'a dyn MailClient,
        classifier: &'a dyn Classifier,
        ledger: &'a mut ActionLedger,
        options: RunOptions,
    ) -> Self {
        Self {
            mail,
            classifier,
            ledger,
            options,
            progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Flag checked between messages; setting it stops the run cleanly
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Process the unread backlog once
    ///
    /// Never returns an error for a per-message problem; those are recorded
    /// in the ledger and counted in the summary.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::new(self.options.dry_run);
        let run_id = summary.run_id.clone();

        info!(
            "Starting triage run {} for {} {}{}",
            run_id,
            self.options.user.first_name,
            self.options.user.last_name,
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let pages = Arc::new(AtomicUsize::new(0));
        let mail = self.mail;
        let stream = unread_id_stream(mail, self.options.retry, {
            let pages = Arc::clone(&pages);
            move |n| pages.store(n, Ordering::Relaxed)
        });
        tokio::pin!(stream);

        while let Some(next) = stream.next().await {
            if self.cancel.load(Ordering::Relaxed) {
                info!("Cancellation requested, stopping between messages");
                break;
            }

            let id = match next {
                Ok(id) => id,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // A failed listing counts as end-of-pages; keep the work
                    // already done and report the run as partial
                    warn!("Unread listing failed, ending run early: {}", e);
                    break;
                }
            };

            if let Some(max) = self.options.max_messages {
                if summary.unread_seen >= max {
                    info!("Reached message limit of {}, stopping", max);
                    break;
                }
            }
            summary.unread_seen += 1;

            if self.ledger.is_succeeded(&id) {
                debug!("Message {} already handled, skipping", id);
                summary.skipped += 1;
                self.report_progress();
                continue;
            }

            self.process_message(&id, &run_id, &mut summary).await?;
            self.report_progress();
        }

        summary.pages_fetched = pages.load(Ordering::Relaxed);
        summary.finish();
        info!(
            "Run {} finished: {} unread seen over {} pages, {} processed, {} acted on, \
             {} retained, {} skipped, {} failed, {} flagged for review",
            run_id,
            summary.unread_seen,
            summary.pages_fetched,
            summary.processed,
            summary.acted_on,
            summary.retained,
            summary.skipped,
            summary.failed,
            summary.flagged_for_review
        );
        Ok(summary)
    }

    /// Handle one message; Err only for fatal (ledger) failures
    async fn process_message(
        &mut self,
        id: &str,
        run_id: &str,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let retry = self.options.retry;
        let dry_run = self.options.dry_run;

        // Mark in-flight before the first external call so a crash is visible
        if !dry_run {
            self.ledger.mark_pending(id, run_id).await?;
        }

        let mail = self.mail;
        let message = match with_retry("fetch", retry, || mail.fetch(id)).await {
            Ok(message) => message,
            Err(e) => return self.record_failure(id, run_id, Stage::Fetch, e, summary).await,
        };

        let subject = snippet(&message.subject, 50);
        let classifier = self.classifier;
        let user = self.options.user.clone();
        let verdict = match with_retry("classify", retry, || classifier.classify(&message, &user)).await
        {
            Ok(verdict) => verdict,
            Err(e) => return self.record_failure(id, run_id, Stage::Classify, e, summary).await,
        };

        match verdict {
            Verdict::Promotional => {
                info!(
                    "Email '{}' from '{}' is not worth the time, applying action",
                    subject, message.from
                );
                if dry_run {
                    summary.acted_on += 1;
                    summary.processed += 1;
                    return Ok(());
                }
                let action = self.options.action.clone();
                match with_retry("apply_action", retry, || mail.apply_action(id, &action)).await {
                    Ok(()) => {
                        self.ledger
                            .mark_succeeded(id, run_id, verdict, true)
                            .await?;
                        summary.acted_on += 1;
                        summary.processed += 1;
                    }
                    Err(e) => {
                        return self.record_failure(id, run_id, Stage::Act, e, summary).await
                    }
                }
            }
            Verdict::NotPromotional => {
                info!(
                    "Email '{}' from '{}' is worth the time, leaving as unread",
                    subject, message.from
                );
                if !dry_run {
                    self.ledger
                        .mark_succeeded(id, run_id, verdict, false)
                        .await?;
                }
                summary.retained += 1;
                summary.processed += 1;
            }
            Verdict::Unknown => {
                summary.flagged_for_review += 1;
                match self.options.on_ambiguous {
                    AmbiguousPolicy::Retain => {
                        warn!(
                            "Ambiguous verdict for '{}' from '{}', leaving untouched for review",
                            subject, message.from
                        );
                        if !dry_run {
                            self.ledger
                                .mark_succeeded(id, run_id, verdict, false)
                                .await?;
                        }
                        summary.retained += 1;
                        summary.processed += 1;
                    }
                    AmbiguousPolicy::Fail => {
                        warn!(
                            "Ambiguous verdict for '{}' from '{}', will retry next run",
                            subject, message.from
                        );
                        if !dry_run {
                            self.ledger
                                .mark_failed(
                                    id,
                                    run_id,
                                    Stage::Classify,
                                    "ambiguous classifier response".to_string(),
                                )
                                .await?;
                        }
                        summary.failed += 1;
                    }
                }
            }
        }

        Ok(())
    }

    /// Downgrade a per-message error to a recorded outcome
    async fn record_failure(
        &mut self,
        id: &str,
        run_id: &str,
        stage: Stage,
        error: TriageError,
        summary: &mut RunSummary,
    ) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }

        warn!("Message {} failed at {} stage: {}", id, stage, error);
        if !self.options.dry_run {
            self.ledger
                .mark_failed(id, run_id, stage, error.to_string())
                .await?;
        }
        summary.failed += 1;
        Ok(())
    }

    fn report_progress(&self) {
        if let Some(progress) = &self.progress {
            progress();
        }
    }
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn snippet(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!(
            "{}...",
            s.chars().take(max_len).collect::<String>()
        )
    }
}
