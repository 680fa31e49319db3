//! Persistence layer for `roastd`.
//!
//! Everything durable in the fabric lives behind this crate: the mission
//! kernel's leased queue, traces, command proposals (with their embedded
//! audit logs), and the governance records the autonomy governor maintains.
//!
//! The SQL dialect is a runtime parameter — SQLite for development,
//! PostgreSQL for production — carried by a [`Db`] handle over
//! `sqlx::AnyPool`. Queries are written once with `?` placeholders and
//! normalized per dialect ([`Db::normalize`]). Timestamps are persisted as
//! epoch milliseconds and JSON documents as TEXT, the portable intersection
//! of both backends.

pub mod error;
pub mod governance;
pub mod missions;
pub mod proposals;
pub mod traces;

pub use error::StoreError;
pub use governance::GovernanceStore;
pub use missions::MissionStore;
pub use proposals::ProposalStore;
pub use traces::TraceStore;

use chrono::{DateTime, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::info;

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Development and tests. A single pooled connection, which also makes
    /// `sqlite::memory:` databases behave.
    Sqlite,
    /// Production.
    Postgres,
}

impl Dialect {
    /// Parse a `DATABASE_TYPE` value.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(StoreError::Config {
                reason: format!("unknown DATABASE_TYPE '{other}'"),
            }),
        }
    }
}

/// A database handle: pool plus dialect.
#[derive(Clone)]
pub struct Db {
    pool: AnyPool,
    dialect: Dialect,
}

impl Db {
    /// Connect to the database named by `url`.
    pub async fn connect(dialect: Dialect, url: &str) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();

        let max_connections = match dialect {
            Dialect::Sqlite => 1,
            Dialect::Postgres => 10,
        };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        info!(dialect = ?dialect, "database connected");
        Ok(Self { pool, dialect })
    }

    #[must_use]
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Normalize `?` placeholders for the active dialect.
    ///
    /// SQLite takes `?` verbatim; PostgreSQL needs `$1..$n`. The rewriter is
    /// aware of single-quoted string literals and double-quoted identifiers
    /// so a `?` inside either is left alone.
    #[must_use]
    pub fn normalize(&self, sql: &str) -> String {
        match self.dialect {
            Dialect::Sqlite => sql.to_owned(),
            Dialect::Postgres => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut n = 0u32;
                let mut in_single = false;
                let mut in_double = false;
                for ch in sql.chars() {
                    match ch {
                        '\'' if !in_double => {
                            in_single = !in_single;
                            out.push(ch);
                        }
                        '"' if !in_single => {
                            in_double = !in_double;
                            out.push(ch);
                        }
                        '?' if !in_single && !in_double => {
                            n += 1;
                            out.push('$');
                            out.push_str(&n.to_string());
                        }
                        _ => out.push(ch),
                    }
                }
                out
            }
        }
    }

    /// Create every table the fabric needs. Idempotent.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        info!("schema ensured");
        Ok(())
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

/// Idempotent DDL, restricted to the type vocabulary both dialects accept.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS missions (
        mission_id TEXT PRIMARY KEY,
        goal TEXT NOT NULL,
        params TEXT NOT NULL,
        subject_id TEXT,
        priority BIGINT NOT NULL,
        constraints TEXT NOT NULL,
        context TEXT NOT NULL,
        idempotency_key TEXT,
        created_at BIGINT NOT NULL,
        status TEXT NOT NULL,
        attempts BIGINT NOT NULL,
        max_attempts BIGINT NOT NULL,
        lease_id TEXT,
        lease_expires_at BIGINT,
        last_heartbeat_at BIGINT,
        claimed_by TEXT,
        claimed_at BIGINT,
        next_retry_at BIGINT,
        result_meta TEXT,
        error_meta TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_missions_claim
        ON missions (status, priority, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_missions_idempotency
        ON missions (idempotency_key)",
    "CREATE TABLE IF NOT EXISTS traces (
        trace_id TEXT PRIMARY KEY,
        mission_id TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at BIGINT NOT NULL,
        completed_at BIGINT NOT NULL,
        payload TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_traces_mission ON traces (mission_id)",
    "CREATE TABLE IF NOT EXISTS command_proposals (
        proposal_id TEXT PRIMARY KEY,
        machine_id TEXT NOT NULL,
        command_type TEXT NOT NULL,
        proposed_by TEXT NOT NULL,
        status TEXT NOT NULL,
        approval_required BIGINT NOT NULL,
        proposed_at BIGINT NOT NULL,
        execution_completed_at BIGINT,
        rejection_reason TEXT,
        rolled_back BIGINT NOT NULL DEFAULT 0,
        payload TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_proposals_window
        ON command_proposals (proposed_at)",
    "CREATE INDEX IF NOT EXISTS idx_proposals_status
        ON command_proposals (status)",
    "CREATE TABLE IF NOT EXISTS governance_state (
        id BIGINT PRIMARY KEY,
        payload TEXT NOT NULL,
        updated_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS circuit_breaker_rules (
        name TEXT PRIMARY KEY,
        enabled BIGINT NOT NULL,
        payload TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS circuit_breaker_events (
        id TEXT PRIMARY KEY,
        rule TEXT NOT NULL,
        bucket BIGINT NOT NULL,
        occurred_at BIGINT NOT NULL,
        severity TEXT NOT NULL,
        resolved BIGINT NOT NULL DEFAULT 0,
        payload TEXT NOT NULL,
        UNIQUE (rule, bucket)
    )",
    "CREATE TABLE IF NOT EXISTS metrics_snapshots (
        id TEXT PRIMARY KEY,
        collected_at BIGINT NOT NULL,
        period_start BIGINT NOT NULL,
        period_end BIGINT NOT NULL,
        payload TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS readiness_assessments (
        id TEXT PRIMARY KEY,
        assessed_at BIGINT NOT NULL,
        payload TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS scope_expansion_proposals (
        proposal_id TEXT PRIMARY KEY,
        created_at BIGINT NOT NULL,
        status TEXT NOT NULL,
        payload TEXT NOT NULL
    )",
];

// ── Column codec helpers shared by the stores ────────────────────────

/// Epoch milliseconds for persistence.
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Decode persisted epoch milliseconds.
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        reason: format!("timestamp out of range: {ms}"),
    })
}

pub(crate) fn opt_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(from_millis).transpose()
}

/// Decode a persisted JSON document.
pub(crate) fn from_json<T: serde::de::DeserializeOwned>(
    column: &str,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        reason: format!("bad JSON in column {column}: {e}"),
    })
}

/// Encode a JSON document for persistence.
pub(crate) fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
        reason: format!("cannot serialize column {column}: {e}"),
    })
}

pub(crate) fn parse_uuid(column: &str, raw: &str) -> Result<uuid::Uuid, StoreError> {
    raw.parse().map_err(|_| StoreError::Corrupt {
        reason: format!("bad UUID in column {column}: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sqlite() -> Db {
        Db::connect(Dialect::Sqlite, "sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let db = sqlite().await;
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_normalize_is_identity() {
        sqlx::any::install_default_drivers();
        let db = Db {
            pool: AnyPool::connect_lazy("sqlite::memory:").unwrap(),
            dialect: Dialect::Sqlite,
        };
        assert_eq!(db.normalize("SELECT ? WHERE a = ?"), "SELECT ? WHERE a = ?");
    }

    #[tokio::test]
    async fn postgres_normalize_numbers_placeholders() {
        sqlx::any::install_default_drivers();
        let db = Db {
            pool: AnyPool::connect_lazy("sqlite::memory:").unwrap(),
            dialect: Dialect::Postgres,
        };
        assert_eq!(
            db.normalize("UPDATE t SET a = ?, b = ? WHERE c = ?"),
            "UPDATE t SET a = $1, b = $2 WHERE c = $3"
        );
    }

    #[tokio::test]
    async fn postgres_normalize_skips_string_literals() {
        sqlx::any::install_default_drivers();
        let db = Db {
            pool: AnyPool::connect_lazy("sqlite::memory:").unwrap(),
            dialect: Dialect::Postgres,
        };
        assert_eq!(
            db.normalize("SELECT '?' , ? FROM t"),
            "SELECT '?' , $1 FROM t"
        );
    }

    #[test]
    fn dialect_parse_accepts_both_spellings() {
        assert_eq!(Dialect::parse("sqlite").unwrap(), Dialect::Sqlite);
        assert_eq!(Dialect::parse("postgres").unwrap(), Dialect::Postgres);
        assert_eq!(Dialect::parse("PostgreSQL").unwrap(), Dialect::Postgres);
        assert!(Dialect::parse("oracle").is_err());
    }
}
