//! Hosted face recognition service client.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use crate::{EnrollmentOutput, FaceMatch, FaceMatcher, FaceMatchError, RecognitionOutput, Result};

const MAX_SEARCH_FACES: u32 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Connection settings for the hosted service.
#[derive(Debug, Clone)]
pub struct HttpFaceMatcherConfig {
    pub base_url: String,
    pub api_key: String,
    pub collection_ref: String,
}

impl HttpFaceMatcherConfig {
    /// Validate that every required setting is present, reporting the names
    /// of the missing ones.
    pub fn from_parts(
        base_url: Option<String>,
        api_key: Option<String>,
        collection_ref: String,
    ) -> Result<Self> {
        let mut missing = Vec::new();
        let base_url = match base_url.filter(|v| !v.trim().is_empty()) {
            Some(v) => v,
            None => {
                missing.push("FACE_API_URL".to_string());
                String::new()
            }
        };
        let api_key = match api_key.filter(|v| !v.trim().is_empty()) {
            Some(v) => v,
            None => {
                missing.push("FACE_API_KEY".to_string());
                String::new()
            }
        };
        if !missing.is_empty() {
            return Err(FaceMatchError::NotConfigured { missing });
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            collection_ref,
        })
    }
}

pub struct HttpFaceMatcher {
    client: reqwest::Client,
    config: HttpFaceMatcherConfig,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct EnrollResponse {
    #[serde(default)]
    face_ids: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Deserialize)]
struct SearchMatch {
    face_id: String,
    similarity: f64,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    matches: Vec<SearchMatch>,
}

#[derive(Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted: Vec<String>,
}

impl HttpFaceMatcher {
    pub fn new(config: HttpFaceMatcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, config })
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/collections/{}{}",
            self.config.base_url, self.config.collection_ref, suffix
        )
    }

    /// Turn a non-success response into a provider error. Throttling and
    /// server faults are retryable; client errors are not.
    async fn provider_error(action: &str, response: reqwest::Response) -> FaceMatchError {
        let status = response.status();
        let retryable = status.as_u16() == 429 || status.is_server_error();
        let body: Option<ErrorBody> = response.json().await.ok();
        let (code, message) = match body {
            Some(b) => (b.code, b.message.unwrap_or_else(|| status.to_string())),
            None => (None, status.to_string()),
        };
        tracing::warn!(action, %status, code = ?code, retryable, "face provider error");
        FaceMatchError::Provider {
            action: action.to_string(),
            code,
            retryable,
            message,
        }
    }
}

#[async_trait]
impl FaceMatcher for HttpFaceMatcher {
    fn provider_name(&self) -> &str {
        "hosted"
    }

    async fn ensure_collection(&self) -> Result<()> {
        let response = self
            .client
            .put(self.url(""))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;
        // 409 means the collection already exists, which is the goal state.
        if response.status().is_success() || response.status().as_u16() == 409 {
            return Ok(());
        }
        Err(Self::provider_error("ensure_collection", response).await)
    }

    async fn enroll(&self, person_id: &str, images: &[Vec<u8>]) -> Result<EnrollmentOutput> {
        let payload = serde_json::json!({
            "external_ref": person_id,
            "images": images.iter().map(|i| BASE64.encode(i)).collect::<Vec<_>>(),
        });
        let response = self
            .client
            .post(self.url("/faces"))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::provider_error("enroll", response).await);
        }
        let body: EnrollResponse = response.json().await?;
        Ok(EnrollmentOutput {
            face_ids: body.face_ids,
            warnings: body.warnings,
        })
    }

    async fn recognize(&self, image: &[u8]) -> Result<RecognitionOutput> {
        let payload = serde_json::json!({
            "image": BASE64.encode(image),
            "max_faces": MAX_SEARCH_FACES,
            "min_similarity": 0,
        });
        let response = self
            .client
            .post(self.url("/search"))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::provider_error("recognize", response).await);
        }
        let body: SearchResponse = response.json().await?;
        let mut matches: Vec<FaceMatch> = body
            .matches
            .into_iter()
            .map(|m| FaceMatch {
                face_id: m.face_id,
                confidence: m.similarity,
            })
            .collect();
        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(RecognitionOutput { matches })
    }

    async fn delete_face_ids(&self, face_ids: &[String]) -> Result<Vec<String>> {
        if face_ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .delete(self.url("/faces"))
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({ "face_ids": face_ids }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::provider_error("delete_face_ids", response).await);
        }
        let body: DeleteResponse = response.json().await?;
        Ok(body.deleted)
    }
}
