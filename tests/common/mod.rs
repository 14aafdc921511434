//! Common test utilities and fixtures

use std::time::Duration;

use inbox_triage::classifier::{Classifier, UserIdentity};
use inbox_triage::config::AmbiguousPolicy;
use inbox_triage::error::Result;
use inbox_triage::mail::{MailClient, UnreadPage};
use inbox_triage::models::{EmailMessage, MessageAction};
use inbox_triage::processor::RunOptions;
use inbox_triage::retry::RetryPolicy;
use mockall::mock;

/// Create a test message with default values
pub fn create_test_email(id: &str, subject: &str, from: &str, body: &str) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        thread_id: format!("thread_{}", id),
        subject: subject.to_string(),
        from: from.to_string(),
        to: "me@example.com".to_string(),
        cc: None,
        labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
        body: body.to_string(),
    }
}

/// A promotional-looking message
pub fn create_promo_email(id: &str) -> EmailMessage {
    create_test_email(
        id,
        "FLASH SALE: 70% off everything",
        "Deals <deals@shop.example>",
        "Don't miss out on these discounts!",
    )
}

/// A personal message
pub fn create_personal_email(id: &str) -> EmailMessage {
    create_test_email(
        id,
        "Dinner on Friday?",
        "Grace Hopper <grace@example.com>",
        "Hi Ada, are you free on Friday evening?",
    )
}

/// One page of unread ids with no continuation
pub fn single_page(ids: &[&str]) -> UnreadPage {
    UnreadPage {
        ids: ids.iter().map(|s| s.to_string()).collect(),
        next_page_token: None,
    }
}

/// Retry policy with millisecond delays so retry tests stay fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

/// Default options: mark-read action, retain-on-ambiguous, fast retries
pub fn run_options() -> RunOptions {
    RunOptions {
        user: UserIdentity {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        },
        action: MessageAction::mark_read(),
        on_ambiguous: AmbiguousPolicy::Retain,
        retry: fast_retry(),
        dry_run: false,
        max_messages: None,
    }
}

// Mock implementations of the two client seams

mock! {
    pub MailClient {}

    #[async_trait::async_trait]
    impl MailClient for MailClient {
        async fn list_unread_page(&self, page_token: Option<String>) -> Result<UnreadPage>;
        async fn fetch(&self, id: &str) -> Result<EmailMessage>;
        async fn apply_action(&self, id: &str, action: &MessageAction) -> Result<()>;
    }
}

mock! {
    pub Classifier {}

    #[async_trait::async_trait]
    impl Classifier for Classifier {
        async fn classify(&self, message: &EmailMessage, user: &UserIdentity) -> Result<inbox_triage::models::Verdict>;
    }
}
