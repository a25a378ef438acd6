//! SMS delivery providers.
//!
//! [`SmsSender`] hides the vendor behind a trait; the worker records the
//! returned [`SmsOutcome`] on the message log without needing to know which
//! provider ran. Retries for transient faults happen inside the provider,
//! so a returned outcome is always terminal.

mod mnotify;
mod mock;

pub use mnotify::MnotifySender;
pub use mock::MockSmsSender;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("messaging request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, MessagingError>;

/// Terminal outcome of one send. `status` is `sent` or `failed`;
/// `error_code` explains failures (`rejected`, `retryable_error`,
/// `timeout`, `unknown_error`).
#[derive(Debug, Clone)]
pub struct SmsOutcome {
    pub status: String,
    pub provider_message_id: Option<String>,
    pub cost_cents: Option<i64>,
    pub error_code: Option<String>,
    /// Provider response with recipient identifiers removed, safe to store.
    pub raw: serde_json::Value,
}

impl SmsOutcome {
    pub fn is_sent(&self) -> bool {
        self.status == "sent"
    }
}

/// Per-send parameters beyond the recipient and body.
#[derive(Debug, Clone, Default)]
pub struct SmsOptions {
    pub sender_id: Option<String>,
    pub client_ref: Option<String>,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Send one SMS. The api_key comes from tenant config rather than the
    /// sender itself, because each tenant holds its own provider account.
    async fn send_sms(
        &self,
        to_phone: &str,
        body: &str,
        api_key: &str,
        options: &SmsOptions,
    ) -> Result<SmsOutcome>;
}
