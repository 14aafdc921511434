//! Promotional-email classification via the OpenAI chat API
//!
//! One request per message: a system prompt personalized with the user's
//! name, the message rendered as a short header/body block, and a single
//! completion token constrained to "True"/"False". Anything else comes back
//! as `Verdict::Unknown` and is handled by the configured ambiguity policy.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{ChatCompletionRequestMessageArgs, CreateChatCompletionRequestArgs, Role},
    Client,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, TriageError};
use crate::models::{EmailMessage, Verdict};
use crate::throttle::{CallCost, CallThrottle};

/// The mailbox owner, used to personalize the classification prompt
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub first_name: String,
    pub last_name: String,
}

/// Classification seam the processor works against
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &EmailMessage, user: &UserIdentity) -> Result<Verdict>;
}

/// Production classifier over async-openai
///
/// Reads the API key from `OPENAI_API_KEY`.
pub struct OpenAiClassifier {
    client: Client<OpenAIConfig>,
    model: String,
    max_body_chars: usize,
    throttle: CallThrottle,
    call_timeout: Duration,
}

impl OpenAiClassifier {
    pub fn new(
        model: String,
        max_body_chars: usize,
        throttle: CallThrottle,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            model,
            max_body_chars,
            throttle,
            call_timeout,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, message: &EmailMessage, user: &UserIdentity) -> Result<Verdict> {
        self.throttle.acquire(CallCost::Classify).await;

        let system = ChatCompletionRequestMessageArgs::default()
            .role(Role::System)
            .content(build_system_prompt(user))
            .build()
            .map_err(map_openai_error)?;

        let user_msg = ChatCompletionRequestMessageArgs::default()
            .role(Role::User)
            .content(render_message(message, self.max_body_chars))
            .build()
            .map_err(map_openai_error)?;

        // One token is enough for "True"/"False"; zero temperature keeps the
        // verdict deterministic for a given message
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages([system, user_msg])
            .max_tokens(1u16)
            .temperature(0.0)
            .build()
            .map_err(map_openai_error)?;

        let response = match tokio::time::timeout(
            self.call_timeout,
            self.client.chat().create(request),
        )
        .await
        {
            Ok(result) => result.map_err(map_openai_error)?,
            Err(_) => {
                warn!(
                    "Classifier call timed out after {:?} for message {}",
                    self.call_timeout, message.id
                );
                return Err(TriageError::NetworkError(format!(
                    "classify timed out after {:?}",
                    self.call_timeout
                )));
            }
        };

        let raw = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        let verdict = parse_verdict(&raw);
        debug!(
            "Classified message {} as {:?} (raw: {:?})",
            message.id, verdict, raw
        );
        Ok(verdict)
    }
}

/// Build the personalized system prompt
fn build_system_prompt(user: &UserIdentity) -> String {
    let first = &user.first_name;
    let last = &user.last_name;
    format!(
        "Your task is to assist in managing the inbox of a busy individual, \
         {first} {last}, by filtering out promotional emails from their personal \
         (i.e., not work) account. Your primary focus is to ensure that emails \
         from individual people, whether they are known family members (with the \
         same last name), close acquaintances, or potential contacts {first} \
         might be interested in hearing from, are not ignored. You need to \
         distinguish between promotional, automated, or mass-sent emails and \
         personal communications.\n\n\
         Respond with \"True\" if the email is promotional and should be ignored \
         based on the below criteria, or \"False\" otherwise. Remember to \
         prioritize personal communications and ensure emails from genuine \
         individuals are not filtered out.\n\n\
         Criteria for Ignoring an Email:\n\
         - The email is promotional: It contains offers, discounts, or is \
         marketing a product or service.\n\
         - The email is automated: It is sent by a system or service \
         automatically, and not a real person.\n\
         - The email appears to be mass-sent or from a non-essential mailing \
         list: It does not address {first} by name, lacks personal context that \
         would indicate it's personally written to them, or is from a mailing \
         list that does not pertain to their interests or work.\n\n\
         Special Consideration:\n\
         - Exception: If the email is from an actual person, especially a family \
         member (with the same last name), a close acquaintance, or a potential \
         contact {first} might be interested in, and contains personalized \
         information indicating a one-to-one communication, do not mark it for \
         ignoring regardless of the promotional content.\n\n\
         - Additionally, do not ignore emails requiring an action to be taken \
         for important matters, such as needing to send a payment, but ignore \
         requests for non-essential actions like purchasing discounted items or \
         signing up for rewards programs.\n\n\
         Be cautious: If there's any doubt about whether an email is promotional \
         or personal, respond with \"False\".\n\n\
         The user message you will receive will have the following format:\n\
         Subject: <email subject>\n\
         To: <to names, to emails>\n\
         From: <from name, from email>\n\
         Cc: <cc names, cc emails>\n\
         Labels: <mailbox labels>\n\
         Body: <plaintext body of the email>\n\n\
         Your response must be:\n\
         \"True\" or \"False\""
    )
}

/// Render the message as the prompt's user turn
fn render_message(message: &EmailMessage, max_body_chars: usize) -> String {
    format!(
        "Subject: {}\nTo: {}\nFrom: {}\nCc: {}\nLabels: {}\nBody: {}",
        message.subject,
        message.to,
        message.from,
        message.cc.as_deref().unwrap_or("None"),
        message.labels.join(", "),
        message.truncated_body(max_body_chars),
    )
}

/// Map the single-token completion to a verdict
fn parse_verdict(raw: &str) -> Verdict {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '.' || c == '\'');
    if trimmed.eq_ignore_ascii_case("true") {
        Verdict::Promotional
    } else if trimmed.eq_ignore_ascii_case("false") {
        Verdict::NotPromotional
    } else {
        warn!("Unexpected classifier response {:?}", raw);
        Verdict::Unknown
    }
}

/// Map OpenAI client errors onto the triage taxonomy
fn map_openai_error(error: OpenAIError) -> TriageError {
    match error {
        OpenAIError::Reqwest(e) => TriageError::NetworkError(e.to_string()),
        OpenAIError::ApiError(api) => {
            let message = api.message.clone();
            let lower = message.to_lowercase();
            if lower.contains("rate limit") || lower.contains("rate_limit") {
                TriageError::RateLimitExceeded { retry_after: 5 }
            } else if lower.contains("overloaded") || lower.contains("server had an error") {
                TriageError::ServerError {
                    status: 500,
                    message,
                }
            } else {
                TriageError::ClassificationError(message)
            }
        }
        OpenAIError::JSONDeserialize(e) => {
            TriageError::ClassificationError(format!("Invalid API response: {}", e))
        }
        other => TriageError::ClassificationError(other.to_string()),
    }
}
