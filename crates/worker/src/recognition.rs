//! Frame recognition job.
//!
//! Decides what a gate frame means for attendance: matched to a person,
//! unknown, or an error. The decision row, the visit event, and the ledger
//! status update commit in one transaction, so a frame either has its full
//! outcome or none of it. Raw image bytes are dropped as soon as the
//! provider call returns and are never written to the tenant database.

use std::time::Instant;

use database::{config, face_profile, idempotency, recognition};
use face_matcher::FaceMatchError;

use crate::runner::{rfc3339, JobRunner};
use crate::Result;

struct Decision {
    decision: String,
    rejection_reason: Option<String>,
    person_id: Option<String>,
    best_face_id: Option<String>,
    best_confidence: Option<f64>,
    matches: Vec<serde_json::Value>,
    provider_code: Option<String>,
}

impl Decision {
    fn unknown(reason: &str) -> Self {
        Self {
            decision: "unknown".to_string(),
            rejection_reason: Some(reason.to_string()),
            person_id: None,
            best_face_id: None,
            best_confidence: None,
            matches: Vec::new(),
            provider_code: None,
        }
    }

    fn error(code: String) -> Self {
        Self {
            decision: "error".to_string(),
            rejection_reason: Some("error".to_string()),
            person_id: None,
            best_face_id: None,
            best_confidence: None,
            matches: Vec::new(),
            provider_code: Some(code),
        }
    }
}

impl JobRunner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn process_frame(
        &self,
        tenant_slug: &str,
        frame_id: &str,
        gate_id: &str,
        captured_at: &str,
        request_hash: &str,
        job_id: &str,
        image: Vec<u8>,
        session_id: Option<&str>,
        face_present: Option<bool>,
        motion_score: Option<f64>,
    ) -> Result<()> {
        let started = Instant::now();
        let db = self.database_for_slug(tenant_slug).await?;
        let pool = db.pool();

        let min_confidence = effective_min_confidence(pool).await?;

        let mut outcome = if face_present == Some(false) {
            // Agent-side detection already said there is no face; skip the
            // provider entirely.
            Decision::unknown("no_face")
        } else {
            self.recognize(pool, image, min_confidence).await?
        };

        if outcome.decision == "matched" {
            tracing::info!(
                tenant = tenant_slug,
                frame = frame_id,
                person = outcome.person_id.as_deref().unwrap_or(""),
                "frame matched"
            );
        }

        let processed_at = rfc3339(chrono::Utc::now());
        let latency_ms = started.elapsed().as_millis() as i64;
        let metadata = serde_json::json!({
            "job_id": job_id,
            "request_hash": request_hash,
            "face_present": face_present,
            "motion_score": motion_score,
            "matches": std::mem::take(&mut outcome.matches),
        });

        let mut tx = pool.begin().await.map_err(database::DatabaseError::from)?;

        // A duplicate invocation that slipped past the ledger must not write
        // a second outcome for the frame.
        if recognition::result_exists_for_frame(&mut *tx, frame_id).await? {
            tracing::warn!(tenant = tenant_slug, frame = frame_id, "frame already processed");
            return Ok(());
        }

        recognition::insert_result(
            &mut *tx,
            &recognition::NewRecognitionResult {
                frame_id: frame_id.to_string(),
                gate_id: gate_id.to_string(),
                session_id: session_id.map(str::to_string),
                processed_at,
                latency_ms,
                best_confidence: outcome.best_confidence,
                best_face_id: outcome.best_face_id.clone(),
                person_id: outcome.person_id.clone(),
                decision: outcome.decision.clone(),
                rejection_reason: outcome.rejection_reason.clone(),
                provider_response_code: outcome.provider_code.clone(),
                metadata_json: Some(metadata.to_string()),
            },
        )
        .await?;

        let visit_status = if outcome.person_id.is_some() {
            "matched"
        } else {
            "unknown"
        };
        recognition::insert_visit(
            &mut *tx,
            frame_id,
            gate_id,
            captured_at,
            outcome.person_id.as_deref(),
            visit_status,
        )
        .await?;

        idempotency::mark_status_by_key(&mut *tx, frame_id, "succeeded", job_id).await?;
        tx.commit().await.map_err(database::DatabaseError::from)?;
        Ok(())
    }

    /// Run the provider and fold its answer into a decision. Provider faults
    /// become an `error` decision rather than a job failure, so the frame
    /// still gets a recorded outcome.
    async fn recognize(
        &self,
        pool: &sqlx::SqlitePool,
        image: Vec<u8>,
        min_confidence: f64,
    ) -> Result<Decision> {
        if let Err(err) = self.matcher.ensure_collection().await {
            tracing::error!(error = %err, "face collection unavailable");
            return Ok(Decision::error(provider_code(&err)));
        }

        let result = self.matcher.recognize(&image).await;
        drop(image);

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                tracing::error!(error = %err, "face recognition failed");
                return Ok(Decision::error(provider_code(&err)));
            }
        };

        let matches: Vec<serde_json::Value> = output
            .matches
            .iter()
            .map(|m| serde_json::json!({"face_id": m.face_id, "confidence": m.confidence}))
            .collect();

        let best = match output.best() {
            Some(best) => best.clone(),
            None => {
                let mut decision = Decision::unknown("no_match");
                decision.matches = matches;
                return Ok(decision);
            }
        };

        let mut decision = Decision {
            decision: "unknown".to_string(),
            rejection_reason: None,
            person_id: None,
            best_face_id: Some(best.face_id.clone()),
            best_confidence: Some(best.confidence),
            matches,
            provider_code: None,
        };

        if best.confidence < min_confidence {
            decision.rejection_reason = Some("below_threshold".to_string());
            return Ok(decision);
        }

        match face_profile::find_active_by_face_id(pool, self.matcher.provider_name(), &best.face_id)
            .await?
        {
            Some(profile) => {
                decision.decision = "matched".to_string();
                decision.person_id = Some(profile.person_id);
            }
            None => decision.rejection_reason = Some("no_match".to_string()),
        }
        Ok(decision)
    }
}

/// Tenant-tunable confidence floor. A `recognition_threshold` override given
/// as a fraction is rescaled to the provider's 0-100 range; otherwise
/// `min_confidence` applies.
async fn effective_min_confidence(pool: &sqlx::SqlitePool) -> Result<f64> {
    let threshold = config::get_value(pool, "recognition_threshold")
        .await?
        .and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
    match threshold {
        Some(t) if t <= 1.0 => Ok(t * 100.0),
        Some(t) => Ok(t),
        None => Ok(config::get_f64(pool, "min_confidence", 90.0).await?),
    }
}

fn provider_code(err: &FaceMatchError) -> String {
    match err {
        FaceMatchError::NotConfigured { .. } => "face_provider_not_configured".to_string(),
        FaceMatchError::Provider { code, .. } => code
            .clone()
            .unwrap_or_else(|| "provider_error".to_string()),
        FaceMatchError::Transport(_) => "transport_error".to_string(),
    }
}
