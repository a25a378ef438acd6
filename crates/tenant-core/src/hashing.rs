//! Request-hash helpers shared by the API handlers and the worker.
//!
//! An idempotency key alone cannot catch a client reusing a key for a
//! different payload; every ledger entry therefore stores a digest over all
//! fields that determine side effects. The API and the worker must compute
//! these digests identically, so they live here.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest over everything that determines a frame's side effects.
pub fn frame_request_hash(
    frame_id: &str,
    gate_id: &str,
    captured_at: &str,
    image_bytes: &[u8],
    motion_score: Option<f64>,
    face_present: Option<bool>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(frame_id.as_bytes());
    hasher.update(b"|");
    hasher.update(gate_id.as_bytes());
    hasher.update(b"|");
    hasher.update(captured_at.as_bytes());
    hasher.update(b"|");
    if let Some(score) = motion_score {
        hasher.update(score.to_string().as_bytes());
    }
    hasher.update(b"|");
    if let Some(present) = face_present {
        hasher.update(if present { b"true" as &[u8] } else { b"false" });
    }
    hasher.update(b"|");
    hasher.update(image_bytes);
    hex::encode(hasher.finalize())
}

/// Digest over everything that determines a message send.
pub fn message_request_hash(
    person_id: Option<&str>,
    to_contact_hash: Option<&str>,
    template_id: Option<&str>,
    channel: &str,
    body: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [person_id, to_contact_hash, template_id] {
        hasher.update(part.unwrap_or("").as_bytes());
        hasher.update(b"|");
    }
    hasher.update(channel.as_bytes());
    hasher.update(b"|");
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_hash_changes_with_image_bytes() {
        let a = frame_request_hash("f", "g", "2026-01-01T00:00:00Z", b"img-a", None, None);
        let b = frame_request_hash("f", "g", "2026-01-01T00:00:00Z", b"img-b", None, None);
        assert_ne!(a, b);
    }

    #[test]
    fn frame_hash_distinguishes_hint_fields() {
        let base = frame_request_hash("f", "g", "t", b"img", None, None);
        let with_face = frame_request_hash("f", "g", "t", b"img", None, Some(true));
        let with_motion = frame_request_hash("f", "g", "t", b"img", Some(0.5), None);
        assert_ne!(base, with_face);
        assert_ne!(base, with_motion);
        assert_ne!(with_face, with_motion);
    }

    #[test]
    fn message_hash_is_deterministic() {
        let a = message_request_hash(Some("p1"), Some("h1"), None, "sms", "hello");
        let b = message_request_hash(Some("p1"), Some("h1"), None, "sms", "hello");
        assert_eq!(a, b);
        let c = message_request_hash(Some("p1"), Some("h1"), None, "sms", "goodbye");
        assert_ne!(a, c);
    }
}
