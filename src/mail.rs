//! Gmail client: unread listing, full-message fetch, terminal actions
//!
//! The `MailClient` trait is the seam the processor works against; the
//! production implementation wraps the Gmail hub with the call throttle and
//! a per-call timeout. A timed-out call is reported as a network error so
//! the retry machinery treats it as transient.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::Stream;
use google_gmail1::api::{Label, Message, MessagePart, ModifyMessageRequest};
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{Result, TriageError};
use crate::models::{EmailMessage, MessageAction};
use crate::retry::{with_retry, RetryPolicy};
use crate::throttle::{CallCost, CallThrottle};

const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
const LABELS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.labels";

/// One page of unread message ids
#[derive(Debug, Clone, Default)]
pub struct UnreadPage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Mail operations the backlog processor needs
#[async_trait]
pub trait MailClient: Send + Sync {
    /// List one page of unread message ids; pass the previous page's token
    /// to continue, None to (re)start from the beginning
    async fn list_unread_page(&self, page_token: Option<String>) -> Result<UnreadPage>;

    /// Fetch a message in full format with its plain-text body
    async fn fetch(&self, id: &str) -> Result<EmailMessage>;

    /// Apply a terminal label modification to a message
    async fn apply_action(&self, id: &str, action: &MessageAction) -> Result<()>;
}

/// Lazy, restartable sequence of unread ids over the paginated API
///
/// Each page request is retried per the policy; a page that still fails is
/// yielded as the stream's final error.
pub fn unread_id_stream<'a>(
    client: &'a dyn MailClient,
    policy: RetryPolicy,
    on_page: impl Fn(usize) + Send + 'a,
) -> impl Stream<Item = Result<String>> + 'a {
    try_stream! {
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let token = page_token.clone();
            let page = with_retry("list_unread", policy, || {
                client.list_unread_page(token.clone())
            })
            .await?;

            pages += 1;
            on_page(pages);
            debug!("Fetched unread page {} ({} ids)", pages, page.ids.len());

            for id in page.ids {
                yield id;
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
    }
}

/// Production Gmail client
pub struct GmailMailClient {
    hub: GmailHub,
    throttle: CallThrottle,
    call_timeout: Duration,
    page_size: u32,
}

impl GmailMailClient {
    pub fn new(hub: GmailHub, throttle: CallThrottle, call_timeout: Duration, page_size: u32) -> Self {
        Self {
            hub,
            throttle,
            call_timeout,
            page_size,
        }
    }

    /// Resolve a label name to its id, creating the label when missing
    ///
    /// Used once at startup for the label action mode.
    pub async fn resolve_label(&self, name: &str) -> Result<String> {
        self.throttle.acquire(CallCost::MailRead).await;
        let (_, response) = self
            .with_timeout("labels_list", async {
                self.hub
                    .users()
                    .labels_list("me")
                    .add_scope(LABELS_SCOPE)
                    .doit()
                    .await
            })
            .await?;

        for label in response.labels.unwrap_or_default() {
            if let (Some(id), Some(label_name)) = (label.id, label.name) {
                if label_name.eq_ignore_ascii_case(name) {
                    debug!("Resolved label {:?} to {}", name, id);
                    return Ok(id);
                }
            }
        }

        self.throttle.acquire(CallCost::MailWrite).await;
        let label = Label {
            name: Some(name.to_string()),
            message_list_visibility: Some("show".to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            ..Default::default()
        };
        let (_, created) = self
            .with_timeout("labels_create", async {
                self.hub
                    .users()
                    .labels_create(label, "me")
                    .add_scope(LABELS_SCOPE)
                    .doit()
                    .await
            })
            .await?;

        created
            .id
            .ok_or_else(|| TriageError::ApiError("Created label has no ID".to_string()))
    }

    /// Wrap an API call in the per-call timeout and map its error
    async fn with_timeout<T, F>(&self, operation_name: &str, api_call: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        match tokio::time::timeout(self.call_timeout, api_call).await {
            Ok(result) => result.map_err(TriageError::from),
            Err(_) => {
                warn!(
                    "Gmail API {} call timed out after {:?}",
                    operation_name, self.call_timeout
                );
                Err(TriageError::NetworkError(format!(
                    "{} timed out after {:?}",
                    operation_name, self.call_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl MailClient for GmailMailClient {
    async fn list_unread_page(&self, page_token: Option<String>) -> Result<UnreadPage> {
        self.throttle.acquire(CallCost::MailRead).await;

        let mut call = self
            .hub
            .users()
            .messages_list("me")
            .add_label_ids("UNREAD")
            .max_results(self.page_size);

        if let Some(token) = page_token.as_ref() {
            call = call.page_token(token);
        }

        let (_, response) = self
            .with_timeout("messages_list", async {
                call.add_scope(MODIFY_SCOPE).doit().await
            })
            .await?;

        let ids = response
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        Ok(UnreadPage {
            ids,
            next_page_token: response.next_page_token,
        })
    }

    async fn fetch(&self, id: &str) -> Result<EmailMessage> {
        self.throttle.acquire(CallCost::MailRead).await;

        let (_, msg) = self
            .with_timeout("messages_get", async {
                self.hub
                    .users()
                    .messages_get("me", id)
                    .format("full")
                    .add_scope(MODIFY_SCOPE)
                    .doit()
                    .await
            })
            .await?;

        parse_email(msg)
    }

    async fn apply_action(&self, id: &str, action: &MessageAction) -> Result<()> {
        self.throttle.acquire(CallCost::MailWrite).await;

        let request = ModifyMessageRequest {
            add_label_ids: if action.add_label_ids.is_empty() {
                None
            } else {
                Some(action.add_label_ids.clone())
            },
            remove_label_ids: if action.remove_label_ids.is_empty() {
                None
            } else {
                Some(action.remove_label_ids.clone())
            },
        };

        self.with_timeout("messages_modify", async {
            self.hub
                .users()
                .messages_modify(request, "me", id)
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await
        })
        .await?;

        Ok(())
    }
}

/// Parse a full-format Gmail message into our EmailMessage structure
fn parse_email(msg: Message) -> Result<EmailMessage> {
    let id = msg
        .id
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing message ID".to_string()))?;
    let thread_id = msg
        .thread_id
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing thread ID".to_string()))?;
    let labels = msg.label_ids.unwrap_or_default();

    let payload = msg
        .payload
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing payload".to_string()))?;

    let mut subject = String::new();
    let mut from = String::new();
    let mut to = String::new();
    let mut cc: Option<String> = None;

    for header in payload.headers.as_deref().unwrap_or_default() {
        if let (Some(name), Some(value)) = (&header.name, &header.value) {
            match name.to_lowercase().as_str() {
                "subject" => subject = value.clone(),
                "from" => from = value.clone(),
                "to" => to = value.clone(),
                "cc" => cc = Some(value.clone()),
                _ => {}
            }
        }
    }

    // A message with no text/plain part classifies with an empty body
    let body = extract_plain_text(&payload).unwrap_or_default();

    Ok(EmailMessage {
        id,
        thread_id,
        subject,
        from,
        to,
        cc,
        labels,
        body,
    })
}

/// Walk the MIME tree for the first text/plain part with content
///
/// Single-part messages carry the body on the payload itself; multipart
/// messages nest it arbitrarily deep (multipart/alternative inside
/// multipart/mixed is common).
fn extract_plain_text(part: &MessagePart) -> Option<String> {
    if part.mime_type.as_deref() == Some("text/plain") {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            if !data.is_empty() {
                return Some(String::from_utf8_lossy(data).into_owned());
            }
        }
    }

    for child in part.parts.as_deref().unwrap_or_default() {
        if let Some(text) = extract_plain_text(child) {
            return Some(text);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    fn text_part(mime: &str, data: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessagePartBody {
                data: Some(data.as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn full_message() -> Message {
        Message {
            id: Some("msg1".to_string()),
            thread_id: Some("thread1".to_string()),
            label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
            payload: Some(MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                headers: Some(vec![
                    header("Subject", "Big summer sale"),
                    header("From", "Deals <deals@shop.example>"),
                    header("To", "me@example.com"),
                    header("Cc", "other@example.com"),
                ]),
                parts: Some(vec![
                    text_part("text/plain", "Everything 50% off!"),
                    text_part("text/html", "<b>Everything 50% off!</b>"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_email_full() {
        let email = parse_email(full_message()).unwrap();
        assert_eq!(email.id, "msg1");
        assert_eq!(email.thread_id, "thread1");
        assert_eq!(email.subject, "Big summer sale");
        assert_eq!(email.from, "Deals <deals@shop.example>");
        assert_eq!(email.to, "me@example.com");
        assert_eq!(email.cc.as_deref(), Some("other@example.com"));
        assert_eq!(email.body, "Everything 50% off!");
        assert!(email.labels.contains(&"UNREAD".to_string()));
    }

    #[test]
    fn test_parse_email_missing_id() {
        let mut msg = full_message();
        msg.id = None;
        let result = parse_email(msg);
        assert!(matches!(result, Err(TriageError::InvalidMessageFormat(_))));
    }

    #[test]
    fn test_parse_email_no_plain_text_part() {
        let mut msg = full_message();
        msg.payload.as_mut().unwrap().parts =
            Some(vec![text_part("text/html", "<b>html only</b>")]);

        let email = parse_email(msg).unwrap();
        assert_eq!(email.body, "");
    }

    #[test]
    fn test_parse_email_header_case_insensitive() {
        let mut msg = full_message();
        msg.payload.as_mut().unwrap().headers = Some(vec![
            header("SUBJECT", "shouting"),
            header("from", "a@b.c"),
        ]);

        let email = parse_email(msg).unwrap();
        assert_eq!(email.subject, "shouting");
        assert_eq!(email.from, "a@b.c");
        assert_eq!(email.cc, None);
    }

    #[test]
    fn test_extract_plain_text_single_part() {
        // Non-multipart messages carry the body on the payload itself
        let mut part = text_part("text/plain", "plain body");
        part.headers = Some(vec![header("Subject", "s")]);
        assert_eq!(extract_plain_text(&part).as_deref(), Some("plain body"));
    }

    #[test]
    fn test_extract_plain_text_nested_multipart() {
        let part = MessagePart {
            mime_type: Some("multipart/mixed".to_string()),
            parts: Some(vec![MessagePart {
                mime_type: Some("multipart/alternative".to_string()),
                parts: Some(vec![
                    text_part("text/html", "<p>hi</p>"),
                    text_part("text/plain", "hi"),
                ]),
                ..Default::default()
            }]),
            ..Default::default()
        };

        assert_eq!(extract_plain_text(&part).as_deref(), Some("hi"));
    }

    #[test]
    fn test_extract_plain_text_empty_data_skipped() {
        let part = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            parts: Some(vec![
                text_part("text/plain", ""),
                text_part("text/plain", "second part"),
            ]),
            ..Default::default()
        };

        assert_eq!(extract_plain_text(&part).as_deref(), Some("second part"));
    }
}
