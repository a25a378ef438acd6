//! Deterministic in-memory matcher for dev and tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{EnrollmentOutput, FaceMatch, FaceMatcher, RecognitionOutput, Result};

/// Derives face ids from image bytes, so the same image always enrolls and
/// recognizes as the same face. Confidence is fixed at construction.
#[derive(Debug, Clone)]
pub struct MockFaceMatcher {
    collection_ref: String,
    confidence: f64,
}

impl MockFaceMatcher {
    pub fn new(collection_ref: impl Into<String>, confidence: f64) -> Self {
        Self {
            collection_ref: collection_ref.into(),
            confidence,
        }
    }

    fn face_id(image: &[u8]) -> String {
        let digest = hex::encode(Sha256::digest(image));
        format!("mock_{}", &digest[..32])
    }
}

#[async_trait]
impl FaceMatcher for MockFaceMatcher {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn ensure_collection(&self) -> Result<()> {
        tracing::debug!(collection = %self.collection_ref, "mock collection ready");
        Ok(())
    }

    async fn enroll(&self, _person_id: &str, images: &[Vec<u8>]) -> Result<EnrollmentOutput> {
        let mut out = EnrollmentOutput::default();
        for image in images {
            let face_id = Self::face_id(image);
            if out.face_ids.contains(&face_id) {
                out.warnings.push("duplicate_image".to_string());
                continue;
            }
            out.face_ids.push(face_id);
        }
        Ok(out)
    }

    async fn recognize(&self, image: &[u8]) -> Result<RecognitionOutput> {
        Ok(RecognitionOutput {
            matches: vec![FaceMatch {
                face_id: Self::face_id(image),
                confidence: self.confidence,
            }],
        })
    }

    async fn delete_face_ids(&self, face_ids: &[String]) -> Result<Vec<String>> {
        Ok(face_ids.to_vec())
    }
}
