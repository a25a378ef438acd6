//! Rule evaluation job.
//!
//! Two rule types ship today. `welcome` messages every consented person who
//! has at least one recorded visit, with a per-template cooldown. `absence`
//! opens follow-up tasks for people who have stopped showing up, optionally
//! messages them, and escalates stale open tasks to a staff member.
//!
//! Everything a run produces commits in a single transaction; queued
//! delivery jobs are dispatched only after that commit, so a crashed run
//! never sends for rows that were rolled back.

use chrono::{Duration, Utc};
use database::{config, message, person, recognition, rule, staff, MessageTemplate, Person, Rule, RuleRun};
use serde::Serialize;
use tenant_core::{message_request_hash, sha256_hex};

use crate::runner::{render_template, rfc3339, rule_config_string, JobRunner};
use crate::{Job, Result};

const MESSAGE_SCOPE: &str = "message_send";
/// Roles tried in order when escalating stale follow-up tasks.
const ESCALATION_ROLES: [&str; 2] = ["Pastor", "BranchAdmin"];

#[derive(Debug, Default, Serialize)]
struct RunStats {
    candidates: usize,
    messages_queued: usize,
    messages_skipped: usize,
    tasks_created: usize,
}

/// A message queued during the run, dispatched after commit.
type QueuedSend = (String, String);

impl JobRunner {
    pub(crate) async fn execute_rule(
        &self,
        tenant_slug: &str,
        rule_id: &str,
        run_id: &str,
    ) -> Result<()> {
        let db = self.database_for_slug(tenant_slug).await?;
        let pool = db.pool();

        let Some(rule) = rule::find_rule(pool, rule_id).await? else {
            tracing::warn!(tenant = tenant_slug, rule = rule_id, "rule missing, skipping run");
            return Ok(());
        };
        let Some(run) = rule::find_run(pool, run_id).await? else {
            tracing::warn!(tenant = tenant_slug, run = run_id, "rule run missing");
            return Ok(());
        };
        if rule.status != "active" {
            rule::finish_run(pool, run_id, "skipped", "{}").await?;
            return Ok(());
        }

        let queued = match self.evaluate(pool, tenant_slug, &rule, &run).await {
            Ok(queued) => queued,
            Err(err) => {
                // The transaction already rolled back; record the failure on
                // the run so operators can see it.
                let stats = serde_json::json!({ "error": err.to_string() });
                rule::finish_run(pool, run_id, "failed", &stats.to_string()).await?;
                return Err(err);
            }
        };

        for (log_id, body) in queued {
            self.queue.dispatch(Job::SendMessage {
                tenant_slug: tenant_slug.to_string(),
                message_log_id: log_id,
                body: Some(body),
            });
        }
        Ok(())
    }

    async fn evaluate(
        &self,
        pool: &sqlx::SqlitePool,
        tenant_slug: &str,
        rule: &Rule,
        run: &RuleRun,
    ) -> Result<Vec<QueuedSend>> {
        let mut tx = pool.begin().await.map_err(database::DatabaseError::from)?;
        let mut stats = RunStats::default();
        let mut queued: Vec<QueuedSend> = Vec::new();
        let sms_enabled = config::get_bool(&mut *tx, "sms_enabled", true).await?;

        match rule.rule_type.as_str() {
            "welcome" => {
                let template_name = rule_config_string(rule.config_json.as_deref(), "template_name")
                    .unwrap_or_else(|| "welcome_default".to_string());
                let Some(template) =
                    message::find_active_template_by_name(&mut *tx, &template_name).await?
                else {
                    let stats = serde_json::json!({ "template_missing": template_name });
                    rule::finish_run(&mut *tx, &run.id, "completed", &stats.to_string()).await?;
                    tx.commit().await.map_err(database::DatabaseError::from)?;
                    return Ok(queued);
                };

                let cooldown_minutes =
                    config::get_i64(&mut *tx, "welcome_cooldown_minutes", 1440).await?;
                let cutoff = rfc3339(Utc::now() - Duration::minutes(cooldown_minutes));

                let candidates = person::list_people_with_visits(&mut *tx).await?;
                stats.candidates = candidates.len();
                for person in &candidates {
                    if !sms_enabled
                        || person.consent_status != "consented"
                        || person.phone_enc.is_none()
                    {
                        stats.messages_skipped += 1;
                        continue;
                    }
                    if message::recent_log_exists(&mut *tx, &person.id, &template.id, &cutoff)
                        .await?
                    {
                        stats.messages_skipped += 1;
                        continue;
                    }
                    self.queue_rule_message(&mut tx, person, &template, &run.id, &mut stats, &mut queued)
                        .await?;
                }
            }
            "absence" => {
                let mode = config::get_string(&mut *tx, "absence_threshold_mode")
                    .await?
                    .unwrap_or_else(|| "sessions".to_string());
                let template_name = rule_config_string(rule.config_json.as_deref(), "template_name")
                    .unwrap_or_else(|| "absence_default".to_string());
                let template =
                    message::find_active_template_by_name(&mut *tx, &template_name).await?;

                let threshold_sessions =
                    config::get_i64(&mut *tx, "absence_threshold_sessions", 6).await?;
                let threshold_weeks =
                    config::get_i64(&mut *tx, "absence_threshold_weeks", 3).await?;
                let escalation_days =
                    config::get_i64(&mut *tx, "followup_escalation_days", 3).await?;

                let session_dates = if mode == "sessions" && threshold_sessions > 0 {
                    recognition::recent_visit_dates(&mut *tx, threshold_sessions).await?
                } else {
                    Vec::new()
                };
                let week_cutoff = rfc3339(Utc::now() - Duration::weeks(threshold_weeks));
                let due_at = rfc3339(Utc::now() + Duration::days(escalation_days));

                let mut open_tasks = rule::people_with_open_tasks(&mut *tx).await?;
                let candidates = person::list_people(&mut *tx).await?;
                stats.candidates = candidates.len();

                for person in &candidates {
                    let Some(last_seen) = recognition::last_visit_at(&mut *tx, &person.id).await?
                    else {
                        continue;
                    };
                    let absent = match mode.as_str() {
                        "sessions" => {
                            if session_dates.is_empty() {
                                continue;
                            }
                            let last_seen_date = &last_seen[..10.min(last_seen.len())];
                            !session_dates.iter().any(|d| d == last_seen_date)
                        }
                        // "weeks" and anything unrecognized compare against
                        // the week cutoff.
                        _ => last_seen < week_cutoff,
                    };
                    if !absent {
                        continue;
                    }
                    if open_tasks.contains(&person.id) {
                        stats.messages_skipped += 1;
                        continue;
                    }

                    rule::insert_task(&mut *tx, &person.id, Some(&rule.id), Some(&due_at)).await?;
                    open_tasks.insert(person.id.clone());
                    stats.tasks_created += 1;

                    let Some(template) = &template else {
                        stats.messages_skipped += 1;
                        continue;
                    };
                    if !sms_enabled
                        || person.consent_status != "consented"
                        || person.phone_enc.is_none()
                    {
                        stats.messages_skipped += 1;
                        continue;
                    }
                    self.queue_rule_message(&mut tx, person, template, &run.id, &mut stats, &mut queued)
                        .await?;
                }

                let escalation_cutoff = rfc3339(Utc::now() - Duration::days(escalation_days));
                if let Some(user_id) = escalation_user(&mut tx).await? {
                    let escalated =
                        rule::escalate_open_tasks(&mut *tx, &user_id, &escalation_cutoff).await?;
                    if escalated > 0 {
                        tracing::info!(
                            tenant = tenant_slug,
                            escalated,
                            assignee = %user_id,
                            "escalated stale follow-up tasks"
                        );
                    }
                }
            }
            other => {
                tracing::error!(tenant = tenant_slug, rule_type = other, "unsupported rule type");
                let stats = serde_json::json!({ "error": "unsupported rule" });
                rule::finish_run(&mut *tx, &run.id, "failed", &stats.to_string()).await?;
                tx.commit().await.map_err(database::DatabaseError::from)?;
                return Ok(Vec::new());
            }
        }

        let stats_json = serde_json::to_string(&stats)
            .map_err(|err| database::DatabaseError::InvalidData(err.to_string()))?;
        rule::finish_run(&mut *tx, &run.id, "completed", &stats_json).await?;
        tx.commit().await.map_err(database::DatabaseError::from)?;
        tracing::info!(
            tenant = tenant_slug,
            run = %run.id,
            candidates = stats.candidates,
            queued = stats.messages_queued,
            skipped = stats.messages_skipped,
            tasks = stats.tasks_created,
            "rule run completed"
        );
        Ok(queued)
    }

    /// Render and queue one message under a run-scoped idempotency key.
    /// A replayed key returns the existing log; a key collision with a
    /// different payload counts as skipped.
    async fn queue_rule_message(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        person: &Person,
        template: &MessageTemplate,
        run_id: &str,
        stats: &mut RunStats,
        queued: &mut Vec<QueuedSend>,
    ) -> Result<()> {
        let Some(body) = render_template(template, person) else {
            stats.messages_skipped += 1;
            return Ok(());
        };
        let key_material = format!("{}:{}:{}:sms", person.id, template.id, run_id);
        let idempotency_key = format!("message_send:auto:{}", sha256_hex(key_material.as_bytes()));
        let request_hash = message_request_hash(
            Some(&person.id),
            person.phone_hash.as_deref(),
            Some(&template.id),
            "sms",
            &body,
        );

        if let Some(existing) = database::idempotency::find_by_key(&mut **tx, &idempotency_key).await? {
            if existing.request_hash != request_hash {
                stats.messages_skipped += 1;
                return Ok(());
            }
            if let Some(log_id) = existing.response_ref {
                queued.push((log_id, body));
                stats.messages_queued += 1;
            }
            return Ok(());
        }

        let log_id = uuid::Uuid::new_v4().to_string();
        message::insert_queued_log(
            &mut **tx,
            &log_id,
            Some(&person.id),
            Some(&template.id),
            "sms",
            person.phone_enc.as_deref(),
            person.phone_hash.as_deref(),
        )
        .await?;
        database::idempotency::insert(
            &mut **tx,
            MESSAGE_SCOPE,
            &idempotency_key,
            &request_hash,
            &log_id,
            "accepted",
        )
        .await?;
        queued.push((log_id, body));
        stats.messages_queued += 1;
        Ok(())
    }
}

async fn escalation_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
) -> Result<Option<String>> {
    for role in ESCALATION_ROLES {
        if let Some(user_id) = staff::find_user_id_with_role(&mut **tx, role).await? {
            return Ok(Some(user_id));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use crate::testutil::harness;
    use crate::Job;
    use database::{config, gate, message, person, recognition, rule, staff};

    async fn seed_welcome(pool: &sqlx::SqlitePool) -> (String, String) {
        message::create_template(
            pool,
            "welcome_default",
            "sms",
            "Hi {first_name}, great to see you!",
            &["first_name".to_string()],
            true,
        )
        .await
        .unwrap();
        let r = rule::create_rule(pool, "Welcome newcomers", "welcome", "active", None)
            .await
            .unwrap();
        let run = rule::create_run(pool, &r.id).await.unwrap();
        (r.id, run.id)
    }

    #[tokio::test]
    async fn welcome_rule_queues_for_consented_visitors_only() {
        let mut h = harness().await;
        let db = h.db().await;
        let pool = db.pool();
        let g = gate::create_gate(pool, None, "active").await.unwrap();

        let enc = h.runner.cipher.encrypt("+233200000001");
        let consented = person::create_person(pool, "Ama Mensah", "consented", Some(&enc), None)
            .await
            .unwrap();
        let declined = person::create_person(pool, "Kojo Boateng", "declined", Some(&enc), None)
            .await
            .unwrap();
        let no_phone = person::create_person(pool, "Efua Owusu", "consented", None, None)
            .await
            .unwrap();
        for (i, p) in [&consented, &declined, &no_phone].iter().enumerate() {
            recognition::insert_visit(pool, &format!("f{i}"), &g.id, "2026-08-20T09:00:00.000Z", Some(&p.id), "matched")
                .await
                .unwrap();
        }

        let (rule_id, run_id) = seed_welcome(pool).await;
        h.runner.execute_rule("acme", &rule_id, &run_id).await.unwrap();

        let run = rule::find_run(pool, &run_id).await.unwrap().unwrap();
        assert_eq!(run.status, "completed");
        let stats: serde_json::Value = serde_json::from_str(run.stats_json.as_deref().unwrap()).unwrap();
        assert_eq!(stats["candidates"], 3);
        assert_eq!(stats["messages_queued"], 1);
        assert_eq!(stats["messages_skipped"], 2);

        // The delivery job for the consented person is dispatched after commit.
        let job = h.rx.try_recv().unwrap();
        match job {
            Job::SendMessage { body, message_log_id, .. } => {
                assert_eq!(body.as_deref(), Some("Hi Ama, great to see you!"));
                let log = message::find_log(pool, &message_log_id).await.unwrap().unwrap();
                assert_eq!(log.person_id.as_deref(), Some(consented.id.as_str()));
            }
            other => panic!("unexpected job: {other:?}"),
        }
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn welcome_cooldown_suppresses_repeat_sends() {
        let mut h = harness().await;
        let db = h.db().await;
        let pool = db.pool();
        let g = gate::create_gate(pool, None, "active").await.unwrap();

        let enc = h.runner.cipher.encrypt("+233200000001");
        let p = person::create_person(pool, "Ama", "consented", Some(&enc), None)
            .await
            .unwrap();
        recognition::insert_visit(pool, "f1", &g.id, "2026-08-20T09:00:00.000Z", Some(&p.id), "matched")
            .await
            .unwrap();

        let (rule_id, run_id) = seed_welcome(pool).await;
        h.runner.execute_rule("acme", &rule_id, &run_id).await.unwrap();
        assert!(h.rx.try_recv().is_ok());

        // A second run inside the cooldown window queues nothing.
        let run2 = rule::create_run(pool, &rule_id).await.unwrap();
        h.runner.execute_rule("acme", &rule_id, &run2.id).await.unwrap();
        let run2 = rule::find_run(pool, &run2.id).await.unwrap().unwrap();
        let stats: serde_json::Value = serde_json::from_str(run2.stats_json.as_deref().unwrap()).unwrap();
        assert_eq!(stats["messages_queued"], 0);
        assert_eq!(stats["messages_skipped"], 1);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_template_completes_without_sending() {
        let mut h = harness().await;
        let db = h.db().await;
        let pool = db.pool();

        let r = rule::create_rule(pool, "Welcome", "welcome", "active", None).await.unwrap();
        let run = rule::create_run(pool, &r.id).await.unwrap();
        h.runner.execute_rule("acme", &r.id, &run.id).await.unwrap();

        let run = rule::find_run(pool, &run.id).await.unwrap().unwrap();
        assert_eq!(run.status, "completed");
        assert!(run.stats_json.unwrap().contains("template_missing"));
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn inactive_rule_is_skipped() {
        let h = harness().await;
        let db = h.db().await;
        let pool = db.pool();

        let r = rule::create_rule(pool, "Paused", "welcome", "paused", None).await.unwrap();
        let run = rule::create_run(pool, &r.id).await.unwrap();
        h.runner.execute_rule("acme", &r.id, &run.id).await.unwrap();

        let run = rule::find_run(pool, &run.id).await.unwrap().unwrap();
        assert_eq!(run.status, "skipped");
    }

    #[tokio::test]
    async fn absence_rule_opens_tasks_once_per_person() {
        let h = harness().await;
        let db = h.db().await;
        let pool = db.pool();
        let g = gate::create_gate(pool, None, "active").await.unwrap();

        // Recent sessions happened on two dates; Ama last attended long before.
        let ama = person::create_person(pool, "Ama", "unknown", None, None).await.unwrap();
        let kofi = person::create_person(pool, "Kofi", "unknown", None, None).await.unwrap();
        recognition::insert_visit(pool, "f1", &g.id, "2026-01-05T09:00:00.000Z", Some(&ama.id), "matched")
            .await
            .unwrap();
        recognition::insert_visit(pool, "f2", &g.id, "2026-08-17T09:00:00.000Z", Some(&kofi.id), "matched")
            .await
            .unwrap();
        recognition::insert_visit(pool, "f3", &g.id, "2026-08-24T09:00:00.000Z", Some(&kofi.id), "matched")
            .await
            .unwrap();
        config::set_value(pool, "absence_threshold_sessions", &serde_json::json!(2))
            .await
            .unwrap();

        let r = rule::create_rule(pool, "Absence", "absence", "active", None).await.unwrap();
        let run = rule::create_run(pool, &r.id).await.unwrap();
        h.runner.execute_rule("acme", &r.id, &run.id).await.unwrap();

        let tasks = rule::list_tasks(pool, Some("open")).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].person_id, ama.id);

        // A second run must not duplicate the open task.
        let run2 = rule::create_run(pool, &r.id).await.unwrap();
        h.runner.execute_rule("acme", &r.id, &run2.id).await.unwrap();
        assert_eq!(rule::list_tasks(pool, Some("open")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_open_tasks_escalate_to_pastor() {
        let h = harness().await;
        let db = h.db().await;
        let pool = db.pool();

        let pastor_role = staff::create_role(pool, "Pastor").await.unwrap();
        let pastor = staff::create_user(pool, "pastor@example.org").await.unwrap();
        staff::assign_role(pool, &pastor, &pastor_role).await.unwrap();

        let p = person::create_person(pool, "Ama", "unknown", None, None).await.unwrap();
        rule::insert_task(pool, &p.id, None, None).await.unwrap();
        // Zero-day escalation window makes the just-created task stale.
        config::set_value(pool, "followup_escalation_days", &serde_json::json!(0))
            .await
            .unwrap();

        let r = rule::create_rule(pool, "Absence", "absence", "active", None).await.unwrap();
        let run = rule::create_run(pool, &r.id).await.unwrap();
        h.runner.execute_rule("acme", &r.id, &run.id).await.unwrap();

        let tasks = rule::list_tasks(pool, Some("open")).await.unwrap();
        assert_eq!(tasks[0].assigned_to_user_id.as_deref(), Some(pastor.as_str()));
    }
}
