//! Per-tenant SQLite persistence layer for Presence.
//!
//! Each tenant has its own isolated database; this crate provides the schema
//! migrations, the row models, and async query functions grouped by entity.
//! Connection pooling across tenants lives in the `tenant-db` crate.
//!
//! # Example
//!
//! ```no_run
//! use database::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("sqlite:data/tenant_acme.db?mode=rwc").await?;
//!     db.migrate().await?;
//!     let people = database::person::list_people(db.pool()).await?;
//!     println!("{} people", people.len());
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod face_profile;
pub mod gate;
pub mod idempotency;
pub mod message;
pub mod models;
pub mod person;
pub mod recognition;
pub mod rule;
pub mod staff;

pub use error::{DatabaseError, Result};
pub use models::{
    ConsentEvent, FaceProfile, FollowUpTask, Gate, GateAgentSession, IdempotencyRecord,
    MessageLog, MessageTemplate, Person, RecognitionResult, Rule, RuleRun, TenantConfigEntry,
    VisitEvent,
};

use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Current UTC time in the canonical stored format (RFC 3339, millisecond
/// precision, `Z` suffix). All timestamps in tenant databases use this
/// format so string comparison orders correctly in SQL.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Database connection wrapper.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Pool size per tenant database. Tenant pools are long-lived and small;
    /// fan-out across tenants happens at the session-manager level.
    const DEFAULT_POOL_SIZE: u32 = 5;

    /// Connect to a tenant database. Use `?mode=rwc` to create the file on
    /// first connection, or `sqlite::memory:` in tests.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::DEFAULT_POOL_SIZE)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::debug!(url, "connected to tenant database");
        Ok(Self { pool })
    }

    /// Run schema migrations. Called once per tenant database when its pool
    /// is first created.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> Database {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    db
}
