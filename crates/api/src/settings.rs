//! Process configuration, read once at startup from the environment.

use tenant_core::RuntimeEnv;

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub env: RuntimeEnv,

    pub registry_base_url: String,
    pub registry_token: String,
    pub registry_cache_ttl_seconds: u64,

    pub data_dir: String,
    pub secrets_file: Option<String>,

    pub contact_encryption_key: String,
    pub contact_hash_secret: String,

    /// `mock`, `http`, or `auto` (http when FACE_API_URL is set).
    pub provider_mode: String,
    pub face_api_url: Option<String>,
    pub face_api_key: Option<String>,
    pub face_collection_ref: String,
    pub mock_face_confidence: f64,

    /// `mock` or `mnotify`.
    pub messaging_mode: String,
    pub mnotify_base_url: String,
    pub mnotify_timeout_seconds: u64,

    pub gate_bootstrap_token: String,
    pub gate_session_ttl_seconds: i64,
    pub gate_heartbeat_interval_seconds: u64,
    pub gate_frame_cooldown_seconds: i64,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            bind_addr: string("PRESENCE_BIND_ADDR", "0.0.0.0:8080"),
            env: RuntimeEnv::parse(&string("ENV", "dev")),
            registry_base_url: string("TENANT_REGISTRY_URL", "http://localhost:9000"),
            registry_token: string("TENANT_REGISTRY_TOKEN", ""),
            registry_cache_ttl_seconds: parse("TENANT_REGISTRY_CACHE_TTL_SECONDS", 30),
            data_dir: string("TENANT_DATA_DIR", "data"),
            secrets_file: optional("SECRETS_FILE"),
            contact_encryption_key: string("CONTACT_ENCRYPTION_KEY", ""),
            contact_hash_secret: string("CONTACT_HASH_SECRET", ""),
            provider_mode: string("PROVIDER_MODE", "auto"),
            face_api_url: optional("FACE_API_URL"),
            face_api_key: optional("FACE_API_KEY"),
            face_collection_ref: string("FACE_COLLECTION_REF", "presence"),
            mock_face_confidence: parse("MOCK_FACE_CONFIDENCE", 99.0),
            messaging_mode: string("MESSAGING_MODE", "mnotify"),
            mnotify_base_url: string("MNOTIFY_BASE_URL", "https://api.mnotify.com/api"),
            mnotify_timeout_seconds: parse("MNOTIFY_TIMEOUT_SECONDS", 10),
            gate_bootstrap_token: string("GATE_BOOTSTRAP_TOKEN", ""),
            gate_session_ttl_seconds: parse("GATE_SESSION_TTL_SECONDS", 3600),
            gate_heartbeat_interval_seconds: parse("GATE_HEARTBEAT_INTERVAL_SECONDS", 30),
            gate_frame_cooldown_seconds: parse("GATE_FRAME_COOLDOWN_SECONDS", 1),
        }
    }
}

fn string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
