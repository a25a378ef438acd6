//! Face recognition providers.
//!
//! The [`FaceMatcher`] trait is the seam between the pipelines and whatever
//! actually does face search. [`MockFaceMatcher`] gives deterministic ids
//! derived from image bytes so tests and dev environments need no vendor
//! account; [`HttpFaceMatcher`] talks to a hosted recognition service.

mod http;
mod mock;

pub use http::{HttpFaceMatcher, HttpFaceMatcherConfig};
pub use mock::MockFaceMatcher;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaceMatchError {
    /// The provider is selected but its credentials are absent. Carries the
    /// names of the missing settings so the API can report them.
    #[error("face provider not configured, missing: {missing:?}")]
    NotConfigured { missing: Vec<String> },

    /// The provider answered with an error. `retryable` distinguishes
    /// throttling and transient faults from permanent rejections.
    #[error("face provider error during {action}: {message}")]
    Provider {
        action: String,
        code: Option<String>,
        retryable: bool,
        message: String,
    },

    #[error("face provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, FaceMatchError>;

/// One candidate match from a recognition call.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub face_id: String,
    pub confidence: f64,
}

/// Recognition outcome. `matches` is sorted best-first; `best()` is the
/// head of that list.
#[derive(Debug, Clone, Default)]
pub struct RecognitionOutput {
    pub matches: Vec<FaceMatch>,
}

impl RecognitionOutput {
    pub fn best(&self) -> Option<&FaceMatch> {
        self.matches.first()
    }
}

/// Result of enrolling one or more images for a person.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentOutput {
    pub face_ids: Vec<String>,
    /// Non-fatal notes such as `duplicate_image` or `no_face_detected`.
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait FaceMatcher: Send + Sync {
    /// Stable provider name recorded alongside face profiles.
    fn provider_name(&self) -> &str;

    /// Create the backing collection if it does not exist. Idempotent.
    async fn ensure_collection(&self) -> Result<()>;

    /// Index images for a person, returning the provider face ids.
    async fn enroll(&self, person_id: &str, images: &[Vec<u8>]) -> Result<EnrollmentOutput>;

    /// Search the collection for faces matching the image.
    async fn recognize(&self, image: &[u8]) -> Result<RecognitionOutput>;

    /// Remove face ids from the collection, returning those actually deleted.
    async fn delete_face_ids(&self, face_ids: &[String]) -> Result<Vec<String>>;
}
