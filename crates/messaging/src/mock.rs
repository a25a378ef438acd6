//! Deterministic sender for dev and tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{Result, SmsOptions, SmsOutcome, SmsSender};

/// Always succeeds; the provider message id is derived from recipient and
/// body so repeated sends are recognizable in logs.
#[derive(Debug, Clone, Default)]
pub struct MockSmsSender;

#[async_trait]
impl SmsSender for MockSmsSender {
    async fn send_sms(
        &self,
        to_phone: &str,
        body: &str,
        _api_key: &str,
        _options: &SmsOptions,
    ) -> Result<SmsOutcome> {
        let digest = hex::encode(Sha256::digest(format!("{to_phone}:{body}")));
        Ok(SmsOutcome {
            status: "sent".to_string(),
            provider_message_id: Some(format!("mock-{}", &digest[..16])),
            cost_cents: Some(0),
            error_code: None,
            raw: serde_json::json!({"status": "sent"}),
        })
    }
}
