//! Recognition results and visit events.

use sqlx::SqliteExecutor;
use uuid::Uuid;

use crate::models::{RecognitionResult, VisitEvent};
use crate::{now_rfc3339, Result};

/// Fields for one recognition decision. The id is minted on insert.
#[derive(Debug, Clone)]
pub struct NewRecognitionResult {
    pub frame_id: String,
    pub gate_id: String,
    pub session_id: Option<String>,
    pub processed_at: String,
    pub latency_ms: i64,
    pub best_confidence: Option<f64>,
    pub best_face_id: Option<String>,
    pub person_id: Option<String>,
    pub decision: String,
    pub rejection_reason: Option<String>,
    pub provider_response_code: Option<String>,
    pub metadata_json: Option<String>,
}

/// Insert the decision row. Runs in the same transaction as the visit event
/// and the ledger update; `frame_id` is unique so a duplicate write fails
/// rather than producing a second result.
pub async fn insert_result(
    executor: impl SqliteExecutor<'_>,
    new: &NewRecognitionResult,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO recognition_results
            (id, frame_id, gate_id, session_id, processed_at, latency_ms, best_confidence,
             best_face_id, person_id, decision, rejection_reason, provider_response_code,
             metadata_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&new.frame_id)
    .bind(&new.gate_id)
    .bind(&new.session_id)
    .bind(&new.processed_at)
    .bind(new.latency_ms)
    .bind(new.best_confidence)
    .bind(&new.best_face_id)
    .bind(&new.person_id)
    .bind(&new.decision)
    .bind(&new.rejection_reason)
    .bind(&new.provider_response_code)
    .bind(&new.metadata_json)
    .execute(executor)
    .await?;
    Ok(id)
}

/// Defensive existence check: a duplicate job invocation that slipped past
/// the HTTP ledger must not write a second result for the frame.
pub async fn result_exists_for_frame(
    executor: impl SqliteExecutor<'_>,
    frame_id: &str,
) -> Result<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT id FROM recognition_results WHERE frame_id = ?")
            .bind(frame_id)
            .fetch_optional(executor)
            .await?;
    Ok(row.is_some())
}

pub async fn find_result_by_frame(
    executor: impl SqliteExecutor<'_>,
    frame_id: &str,
) -> Result<Option<RecognitionResult>> {
    let result = sqlx::query_as::<_, RecognitionResult>(
        r#"
        SELECT id, frame_id, gate_id, session_id, processed_at, latency_ms, best_confidence,
               best_face_id, person_id, decision, rejection_reason, provider_response_code,
               metadata_json
        FROM recognition_results WHERE frame_id = ?
        "#,
    )
    .bind(frame_id)
    .fetch_optional(executor)
    .await?;
    Ok(result)
}

pub async fn list_results(
    executor: impl SqliteExecutor<'_>,
    limit: i64,
) -> Result<Vec<RecognitionResult>> {
    let results = sqlx::query_as::<_, RecognitionResult>(
        r#"
        SELECT id, frame_id, gate_id, session_id, processed_at, latency_ms, best_confidence,
               best_face_id, person_id, decision, rejection_reason, provider_response_code,
               metadata_json
        FROM recognition_results ORDER BY processed_at DESC LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(results)
}

/// Insert the visit event paired with a recognition result.
pub async fn insert_visit(
    executor: impl SqliteExecutor<'_>,
    frame_id: &str,
    gate_id: &str,
    captured_at: &str,
    person_id: Option<&str>,
    status: &str,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO visit_events (id, frame_id, gate_id, captured_at, person_id, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(frame_id)
    .bind(gate_id)
    .bind(captured_at)
    .bind(person_id)
    .bind(status)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(id)
}

pub async fn find_visit_by_frame(
    executor: impl SqliteExecutor<'_>,
    frame_id: &str,
) -> Result<Option<VisitEvent>> {
    let visit = sqlx::query_as::<_, VisitEvent>(
        r#"
        SELECT id, frame_id, gate_id, captured_at, person_id, status, created_at
        FROM visit_events WHERE frame_id = ?
        "#,
    )
    .bind(frame_id)
    .fetch_optional(executor)
    .await?;
    Ok(visit)
}

/// Most recent attributed visit for a person, as an RFC 3339 timestamp.
pub async fn last_visit_at(
    executor: impl SqliteExecutor<'_>,
    person_id: &str,
) -> Result<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT MAX(captured_at) FROM visit_events WHERE person_id = ?")
            .bind(person_id)
            .fetch_optional(executor)
            .await?;
    Ok(row.and_then(|(max,)| max))
}

/// The `limit` most recent distinct dates with any attributed visit,
/// newest first. Drives the session-count absence mode.
pub async fn recent_visit_dates(
    executor: impl SqliteExecutor<'_>,
    limit: i64,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT date(captured_at) AS day
        FROM visit_events
        WHERE person_id IS NOT NULL
        GROUP BY day
        ORDER BY day DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(day,)| day).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::create_gate;
    use crate::test_db;

    fn new_result(frame_id: &str, gate_id: &str) -> NewRecognitionResult {
        NewRecognitionResult {
            frame_id: frame_id.to_string(),
            gate_id: gate_id.to_string(),
            session_id: None,
            processed_at: now_rfc3339(),
            latency_ms: 12,
            best_confidence: Some(97.5),
            best_face_id: Some("face-1".to_string()),
            person_id: None,
            decision: "unknown".to_string(),
            rejection_reason: Some("no_match".to_string()),
            provider_response_code: None,
            metadata_json: None,
        }
    }

    #[tokio::test]
    async fn frame_id_is_unique_per_result() {
        let db = test_db().await;
        let pool = db.pool();
        let gate = create_gate(pool, None, "active").await.unwrap();

        insert_result(pool, &new_result("frame-1", &gate.id)).await.unwrap();
        assert!(result_exists_for_frame(pool, "frame-1").await.unwrap());
        let err = insert_result(pool, &new_result("frame-1", &gate.id))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn visit_queries_cover_absence_modes() {
        let db = test_db().await;
        let pool = db.pool();
        let gate = create_gate(pool, None, "active").await.unwrap();

        insert_visit(pool, "f1", &gate.id, "2026-08-01T09:00:00.000Z", Some("p1"), "matched")
            .await
            .unwrap();
        insert_visit(pool, "f2", &gate.id, "2026-08-10T09:00:00.000Z", Some("p1"), "matched")
            .await
            .unwrap();
        insert_visit(pool, "f3", &gate.id, "2026-08-10T10:00:00.000Z", Some("p2"), "matched")
            .await
            .unwrap();
        insert_visit(pool, "f4", &gate.id, "2026-08-12T10:00:00.000Z", None, "unknown")
            .await
            .unwrap();

        assert_eq!(
            last_visit_at(pool, "p1").await.unwrap().as_deref(),
            Some("2026-08-10T09:00:00.000Z")
        );
        // Unattributed visits do not contribute distinct dates.
        let dates = recent_visit_dates(pool, 5).await.unwrap();
        assert_eq!(dates, vec!["2026-08-10".to_string(), "2026-08-01".to_string()]);
    }
}
