//! Shared services and helpers for job execution.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use database::{Database, MessageTemplate, Person};
use face_matcher::FaceMatcher;
use messaging::SmsSender;
use registry::TenantRegistryClient;
use secret_store::SecretStore;
use tenant_core::ContactCipher;
use tenant_db::TenantSessionManager;

use crate::{Job, JobQueue, Result};

pub struct JobRunner {
    registry: Arc<TenantRegistryClient>,
    sessions: Arc<TenantSessionManager>,
    pub(crate) matcher: Arc<dyn FaceMatcher>,
    pub(crate) sms: Arc<dyn SmsSender>,
    pub(crate) cipher: ContactCipher,
    /// Resolves `env:`-style refs in secret-valued tenant config entries.
    pub(crate) secrets: Arc<dyn SecretStore>,
    pub(crate) queue: JobQueue,
    /// With the mock sender a missing tenant API key is fine; with a real
    /// gateway it is a terminal configuration failure.
    pub(crate) sms_requires_api_key: bool,
}

impl JobRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<TenantRegistryClient>,
        sessions: Arc<TenantSessionManager>,
        matcher: Arc<dyn FaceMatcher>,
        sms: Arc<dyn SmsSender>,
        cipher: ContactCipher,
        secrets: Arc<dyn SecretStore>,
        queue: JobQueue,
        sms_requires_api_key: bool,
    ) -> Self {
        Self {
            registry,
            sessions,
            matcher,
            sms,
            cipher,
            secrets,
            queue,
            sms_requires_api_key,
        }
    }

    pub async fn run(&self, job: Job) -> Result<()> {
        match job {
            Job::Recognition {
                tenant_slug,
                frame_id,
                gate_id,
                captured_at,
                request_hash,
                job_id,
                image,
                session_id,
                face_present,
                motion_score,
            } => {
                self.process_frame(
                    &tenant_slug,
                    &frame_id,
                    &gate_id,
                    &captured_at,
                    &request_hash,
                    &job_id,
                    image,
                    session_id.as_deref(),
                    face_present,
                    motion_score,
                )
                .await
            }
            Job::SendMessage {
                tenant_slug,
                message_log_id,
                body,
            } => {
                self.deliver_message(&tenant_slug, &message_log_id, body.as_deref())
                    .await
            }
            Job::RunRule {
                tenant_slug,
                rule_id,
                run_id,
            } => self.execute_rule(&tenant_slug, &rule_id, &run_id).await,
        }
    }

    /// Resolve the tenant and open (or reuse) its database pool.
    pub(crate) async fn database_for_slug(&self, slug: &str) -> Result<Database> {
        let record = self.registry.get_tenant(slug).await?;
        let context = record.into_context();
        Ok(self.sessions.database_for(&context).await?)
    }
}

pub(crate) fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render a template body for a person. Returns None when a declared
/// variable has no value, which callers count as a skip rather than a
/// failure.
pub(crate) fn render_template(template: &MessageTemplate, person: &Person) -> Option<String> {
    let full_name = person.full_name.clone();
    let first_name = full_name
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string();
    let context = [("full_name", full_name), ("first_name", first_name)];

    let variables: Vec<String> = template
        .variables_json
        .as_deref()
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();
    for name in &variables {
        let known = context.iter().any(|(key, _)| key == name);
        if !known {
            return None;
        }
    }

    let mut body = template.body.clone();
    for (key, value) in &context {
        body = body.replace(&format!("{{{key}}}"), value);
    }
    Some(body)
}

/// Pull a named string out of a rule's JSON config.
pub(crate) fn rule_config_string(config_json: Option<&str>, key: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(config_json?).ok()?;
    value.get(key)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::now_rfc3339;

    fn person(name: &str) -> Person {
        Person {
            id: "p-1".into(),
            full_name: name.into(),
            consent_status: "consented".into(),
            phone_enc: None,
            phone_hash: None,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        }
    }

    fn template(body: &str, variables: &[&str]) -> MessageTemplate {
        MessageTemplate {
            id: "t-1".into(),
            name: "welcome_default".into(),
            channel: "sms".into(),
            body: body.into(),
            variables_json: Some(serde_json::to_string(variables).unwrap()),
            active: true,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        }
    }

    #[test]
    fn renders_known_variables() {
        let rendered = render_template(
            &template("Hi {first_name}, welcome!", &["first_name"]),
            &person("Ama Mensah"),
        );
        assert_eq!(rendered.as_deref(), Some("Hi Ama, welcome!"));
    }

    #[test]
    fn unknown_variable_skips_rendering() {
        let rendered = render_template(
            &template("Hi {nickname}!", &["nickname"]),
            &person("Ama Mensah"),
        );
        assert!(rendered.is_none());
    }

    #[test]
    fn rule_config_lookup_tolerates_missing_config() {
        assert_eq!(rule_config_string(None, "template_name"), None);
        assert_eq!(rule_config_string(Some("not json"), "template_name"), None);
        assert_eq!(
            rule_config_string(Some(r#"{"template_name":"custom"}"#), "template_name"),
            Some("custom".to_string())
        );
    }
}
