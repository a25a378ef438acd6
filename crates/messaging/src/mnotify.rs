//! mNotify SMS gateway client.

use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use crate::{Result, SmsOptions, SmsOutcome, SmsSender};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP_MS: u64 = 500;

pub struct MnotifySender {
    client: reqwest::Client,
    base_url: String,
}

impl MnotifySender {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Strip recipient identifiers from the provider response before it is
    /// persisted, and record the HTTP status alongside.
    fn sanitize(status_code: u16, body: &str) -> serde_json::Value {
        let mut sanitized = match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => {
                let redacted: serde_json::Map<String, serde_json::Value> = map
                    .into_iter()
                    .filter(|(key, _)| {
                        !matches!(key.to_ascii_lowercase().as_str(), "to" | "phone" | "msisdn")
                    })
                    .collect();
                serde_json::Value::Object(redacted)
            }
            _ => serde_json::json!({ "body": body }),
        };
        if let Some(map) = sanitized.as_object_mut() {
            map.insert("status_code".to_string(), serde_json::json!(status_code));
        }
        sanitized
    }

    fn failed(error_code: &str, raw: serde_json::Value) -> SmsOutcome {
        SmsOutcome {
            status: "failed".to_string(),
            provider_message_id: None,
            cost_cents: None,
            error_code: Some(error_code.to_string()),
            raw,
        }
    }
}

#[async_trait]
impl SmsSender for MnotifySender {
    async fn send_sms(
        &self,
        to_phone: &str,
        body: &str,
        api_key: &str,
        options: &SmsOptions,
    ) -> Result<SmsOutcome> {
        let mut form = vec![
            ("key".to_string(), api_key.to_string()),
            ("to".to_string(), to_phone.to_string()),
            ("msg".to_string(), body.to_string()),
        ];
        if let Some(sender_id) = &options.sender_id {
            form.push(("sender_id".to_string(), sender_id.clone()));
        }
        if let Some(client_ref) = &options.client_ref {
            form.push(("client_ref".to_string(), client_ref.clone()));
        }

        let url = format!("{}/sms/quick", self.base_url);
        let mut error_code = "unknown_error";
        let mut raw = serde_json::json!({});

        for attempt in 1..=MAX_ATTEMPTS {
            let response = match self.client.post(&url).form(&form).send().await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "sms request failed");
                    error_code = "timeout";
                    sleep(Duration::from_millis(BACKOFF_STEP_MS * attempt as u64)).await;
                    continue;
                }
            };

            let status_code = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            raw = Self::sanitize(status_code, &text);

            if status_code == 200 {
                let provider_message_id = raw
                    .get("message_id")
                    .or_else(|| raw.get("code"))
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .filter(|s| !s.is_empty());
                return Ok(SmsOutcome {
                    status: "sent".to_string(),
                    provider_message_id,
                    cost_cents: None,
                    error_code: None,
                    raw,
                });
            }
            if matches!(status_code, 400 | 401 | 403) {
                error_code = "rejected";
                break;
            }
            if status_code == 429 || status_code >= 500 {
                tracing::warn!(attempt, status_code, "sms gateway transient failure");
                error_code = "retryable_error";
                sleep(Duration::from_millis(BACKOFF_STEP_MS * attempt as u64)).await;
                continue;
            }
            error_code = "unknown_error";
            break;
        }

        Ok(Self::failed(error_code, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_drops_recipient_fields() {
        let raw = MnotifySender::sanitize(
            200,
            r#"{"message_id":"m-1","to":"+233200000001","Phone":"x","status":"sent"}"#,
        );
        assert_eq!(raw.get("message_id"), Some(&serde_json::json!("m-1")));
        assert_eq!(raw.get("status_code"), Some(&serde_json::json!(200)));
        assert!(raw.get("to").is_none());
        assert!(raw.get("Phone").is_none());
    }

    #[test]
    fn sanitize_keeps_non_json_bodies() {
        let raw = MnotifySender::sanitize(502, "Bad Gateway");
        assert_eq!(raw.get("body"), Some(&serde_json::json!("Bad Gateway")));
        assert_eq!(raw.get("status_code"), Some(&serde_json::json!(502)));
    }
}
