//! Message delivery job.
//!
//! Takes a queued message log entry through its terminal status. Every exit
//! path records an outcome on the log row; a log that is already terminal
//! is left untouched, so re-delivering a job id is safe.

use database::{config, idempotency, message, person};
use messaging::SmsOptions;

use crate::runner::{rfc3339, JobRunner};
use crate::Result;

const MESSAGE_SCOPE: &str = "message_send";

impl JobRunner {
    pub(crate) async fn deliver_message(
        &self,
        tenant_slug: &str,
        message_log_id: &str,
        body: Option<&str>,
    ) -> Result<()> {
        let db = self.database_for_slug(tenant_slug).await?;
        let pool = db.pool();

        let log = match message::find_log(pool, message_log_id).await? {
            Some(log) => log,
            None => {
                tracing::warn!(tenant = tenant_slug, log = message_log_id, "message log missing");
                return Ok(());
            }
        };
        if log.status != "queued" && log.status != "retry" {
            tracing::debug!(
                tenant = tenant_slug,
                log = message_log_id,
                status = %log.status,
                "message already terminal"
            );
            return Ok(());
        }

        let body = match body.filter(|b| !b.is_empty()) {
            Some(body) => body,
            None => return self.fail(pool, message_log_id, "missing_body").await,
        };

        // The log may carry the recipient directly; fall back to the
        // person's stored contact.
        let mut to_phone_enc = log.to_phone_enc.clone();
        if to_phone_enc.is_none() {
            if let Some(person_id) = &log.person_id {
                if let Some(person) = person::find_person(pool, person_id).await? {
                    to_phone_enc = person.phone_enc;
                }
            }
        }
        let to_phone_enc = match to_phone_enc {
            Some(enc) => enc,
            None => return self.fail(pool, message_log_id, "missing_phone").await,
        };
        let to_phone = match self.cipher.decrypt(&to_phone_enc) {
            Ok(phone) => phone,
            Err(_) => return self.fail(pool, message_log_id, "decrypt_error").await,
        };

        let sender_id = config::get_string(pool, "sms_sender_id").await?;
        let api_key = config::get_string(pool, "sms_api_key")
            .await?
            .and_then(|value| resolve_secret_value(self.secrets.as_ref(), value));
        if self.sms_requires_api_key && api_key.is_none() {
            tracing::error!(tenant = tenant_slug, "sms gateway key not configured");
            return self.fail(pool, message_log_id, "messaging_not_configured").await;
        }

        let outcome = self
            .sms
            .send_sms(
                &to_phone,
                body,
                api_key.as_deref().unwrap_or(""),
                &SmsOptions {
                    sender_id,
                    client_ref: Some(message_log_id.to_string()),
                },
            )
            .await?;

        let sent_at = outcome.is_sent().then(|| rfc3339(chrono::Utc::now()));
        message::record_delivery(
            pool,
            message_log_id,
            &outcome.status,
            outcome.provider_message_id.as_deref(),
            outcome.cost_cents,
            outcome.error_code.as_deref(),
            Some(&outcome.raw.to_string()),
            sent_at.as_deref(),
        )
        .await?;
        idempotency::mark_status_by_response_ref(
            pool,
            MESSAGE_SCOPE,
            message_log_id,
            if outcome.is_sent() { "succeeded" } else { "failed" },
        )
        .await?;

        tracing::info!(
            tenant = tenant_slug,
            log = message_log_id,
            status = %outcome.status,
            error_code = outcome.error_code.as_deref().unwrap_or(""),
            "message delivery finished"
        );
        Ok(())
    }

    /// Terminal failure before the provider was reached.
    async fn fail(
        &self,
        pool: &sqlx::SqlitePool,
        message_log_id: &str,
        error_code: &str,
    ) -> Result<()> {
        message::record_delivery(pool, message_log_id, "failed", None, None, Some(error_code), None, None)
            .await?;
        idempotency::mark_status_by_response_ref(pool, MESSAGE_SCOPE, message_log_id, "failed")
            .await?;
        tracing::warn!(log = message_log_id, error_code, "message delivery failed");
        Ok(())
    }
}

/// Secret-valued config entries may name a secret (`env:NAME`) instead of
/// holding it inline. A ref that fails to resolve counts as absent.
fn resolve_secret_value(
    secrets: &dyn secret_store::SecretStore,
    value: String,
) -> Option<String> {
    if !value.starts_with("env:") {
        return Some(value);
    }
    match secrets.get(&value) {
        Ok(resolved) => Some(resolved),
        Err(err) => {
            tracing::warn!(secret_ref = %value, error = %err, "config secret ref did not resolve");
            None
        }
    }
}
