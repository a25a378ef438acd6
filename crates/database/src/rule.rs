//! Rules, rule runs, and follow-up tasks.

use std::collections::HashSet;

use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::models::{FollowUpTask, Rule, RuleRun};
use crate::{now_rfc3339, Result};

pub async fn create_rule(
    executor: impl SqliteExecutor<'_>,
    name: &str,
    rule_type: &str,
    status: &str,
    config_json: Option<&str>,
) -> Result<Rule> {
    let now = now_rfc3339();
    let rule = Rule {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        rule_type: rule_type.to_string(),
        status: status.to_string(),
        config_json: config_json.map(str::to_string),
        created_at: now.clone(),
        updated_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO rules (id, name, rule_type, status, config_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&rule.id)
    .bind(&rule.name)
    .bind(&rule.rule_type)
    .bind(&rule.status)
    .bind(&rule.config_json)
    .bind(&rule.created_at)
    .bind(&rule.updated_at)
    .execute(executor)
    .await?;
    Ok(rule)
}

pub async fn find_rule(executor: impl SqliteExecutor<'_>, id: &str) -> Result<Option<Rule>> {
    let rule = sqlx::query_as::<_, Rule>(
        r#"
        SELECT id, name, rule_type, status, config_json, created_at, updated_at
        FROM rules WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(rule)
}

pub async fn list_rules(executor: impl SqliteExecutor<'_>) -> Result<Vec<Rule>> {
    let rules = sqlx::query_as::<_, Rule>(
        r#"
        SELECT id, name, rule_type, status, config_json, created_at, updated_at
        FROM rules ORDER BY created_at
        "#,
    )
    .fetch_all(executor)
    .await?;
    Ok(rules)
}

/// Create a queued run for a rule.
pub async fn create_run(executor: impl SqliteExecutor<'_>, rule_id: &str) -> Result<RuleRun> {
    let now = now_rfc3339();
    let run = RuleRun {
        id: Uuid::new_v4().to_string(),
        rule_id: rule_id.to_string(),
        run_at: now.clone(),
        status: "queued".to_string(),
        stats_json: None,
        created_at: now,
    };
    sqlx::query(
        r#"
        INSERT INTO rule_runs (id, rule_id, run_at, status, stats_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&run.id)
    .bind(&run.rule_id)
    .bind(&run.run_at)
    .bind(&run.status)
    .bind(&run.stats_json)
    .bind(&run.created_at)
    .execute(executor)
    .await?;
    Ok(run)
}

pub async fn find_run(executor: impl SqliteExecutor<'_>, id: &str) -> Result<Option<RuleRun>> {
    let run = sqlx::query_as::<_, RuleRun>(
        r#"
        SELECT id, rule_id, run_at, status, stats_json, created_at
        FROM rule_runs WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(run)
}

/// Record a run's terminal status and stats summary.
pub async fn finish_run(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    status: &str,
    stats_json: &str,
) -> Result<()> {
    sqlx::query("UPDATE rule_runs SET status = ?, stats_json = ? WHERE id = ?")
        .bind(status)
        .bind(stats_json)
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// People who already have a follow-up task that is not closed/resolved.
/// The absence rule must not open a second task for them.
pub async fn people_with_open_tasks(
    executor: impl SqliteExecutor<'_>,
) -> Result<HashSet<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT person_id FROM follow_up_tasks WHERE status NOT IN ('closed', 'resolved')",
    )
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn insert_task(
    executor: impl SqliteExecutor<'_>,
    person_id: &str,
    rule_id: Option<&str>,
    due_at: Option<&str>,
) -> Result<FollowUpTask> {
    let task = FollowUpTask {
        id: Uuid::new_v4().to_string(),
        person_id: person_id.to_string(),
        rule_id: rule_id.map(str::to_string),
        assigned_to_user_id: None,
        status: "open".to_string(),
        priority: 0,
        due_at: due_at.map(str::to_string),
        created_at: now_rfc3339(),
        closed_at: None,
        notes: None,
    };
    sqlx::query(
        r#"
        INSERT INTO follow_up_tasks
            (id, person_id, rule_id, assigned_to_user_id, status, priority, due_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&task.id)
    .bind(&task.person_id)
    .bind(&task.rule_id)
    .bind(&task.assigned_to_user_id)
    .bind(&task.status)
    .bind(task.priority)
    .bind(&task.due_at)
    .bind(&task.created_at)
    .execute(executor)
    .await?;
    Ok(task)
}

pub async fn find_task(
    executor: impl SqliteExecutor<'_>,
    id: &str,
) -> Result<Option<FollowUpTask>> {
    let task = sqlx::query_as::<_, FollowUpTask>(
        r#"
        SELECT id, person_id, rule_id, assigned_to_user_id, status, priority, due_at,
               created_at, closed_at, notes
        FROM follow_up_tasks WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(task)
}

pub async fn list_tasks(
    executor: impl SqliteExecutor<'_>,
    status: Option<&str>,
) -> Result<Vec<FollowUpTask>> {
    let tasks = sqlx::query_as::<_, FollowUpTask>(
        r#"
        SELECT id, person_id, rule_id, assigned_to_user_id, status, priority, due_at,
               created_at, closed_at, notes
        FROM follow_up_tasks
        WHERE (?1 IS NULL OR status = ?1)
        ORDER BY created_at DESC
        "#,
    )
    .bind(status)
    .fetch_all(executor)
    .await?;
    Ok(tasks)
}

pub async fn update_task_status(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    status: &str,
    closed_at: Option<&str>,
    notes: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE follow_up_tasks
        SET status = ?,
            closed_at = COALESCE(?, closed_at),
            notes = COALESCE(?, notes)
        WHERE id = ?
        "#,
    )
    .bind(status)
    .bind(closed_at)
    .bind(notes)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn insert_outcome(
    executor: impl SqliteExecutor<'_>,
    task_id: &str,
    outcome_type: &str,
    notes: Option<&str>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO follow_up_outcomes (id, task_id, outcome_type, notes, recorded_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(task_id)
    .bind(outcome_type)
    .bind(notes)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(id)
}

/// Reassign still-open tasks created at or before `cutoff` to a staff user.
pub async fn escalate_open_tasks(
    executor: impl SqliteExecutor<'_>,
    assignee_user_id: &str,
    cutoff: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE follow_up_tasks SET assigned_to_user_id = ?
        WHERE status NOT IN ('closed', 'resolved') AND created_at <= ?
        "#,
    )
    .bind(assignee_user_id)
    .bind(cutoff)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
