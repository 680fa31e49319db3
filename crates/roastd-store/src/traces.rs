//! Trace persistence.
//!
//! Traces are stored whole as JSON with a few indexed columns broken out for
//! querying. The store doubles as the worker's [`TraceSink`].

use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use roastd_core::trace::{Trace, TraceSink};
use roastd_core::SinkError;

use crate::{from_json, to_json, to_millis, Db, StoreError};

/// SQL trace store. Cheap to clone.
#[derive(Clone, Debug)]
pub struct TraceStore {
    db: Db,
}

impl TraceStore {
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append a trace. Re-recording the same `trace_id` is a no-op, which
    /// keeps at-least-once submission idempotent.
    pub async fn append(&self, trace: &Trace) -> Result<(), StoreError> {
        let sql = self.db.normalize(
            "INSERT INTO traces (
                trace_id, mission_id, agent_id, status, started_at,
                completed_at, payload
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (trace_id) DO NOTHING",
        );
        sqlx::query(&sql)
            .bind(trace.trace_id.to_string())
            .bind(trace.mission_id.to_string())
            .bind(&trace.agent_id)
            .bind(trace.status.to_string())
            .bind(to_millis(trace.started_at))
            .bind(to_millis(trace.completed_at))
            .bind(to_json("payload", trace)?)
            .execute(self.db.pool())
            .await?;

        debug!(
            trace_id = %trace.trace_id,
            mission_id = %trace.mission_id,
            status = ?trace.status,
            entries = trace.entries.len(),
            "trace recorded"
        );
        Ok(())
    }

    /// All traces for a mission, oldest first.
    pub async fn for_mission(&self, mission_id: Uuid) -> Result<Vec<Trace>, StoreError> {
        let sql = self.db.normalize(
            "SELECT payload FROM traces WHERE mission_id = ? ORDER BY started_at ASC",
        );
        let rows = sqlx::query(&sql)
            .bind(mission_id.to_string())
            .fetch_all(self.db.pool())
            .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                from_json("payload", &payload)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl TraceSink for TraceStore {
    async fn record(&self, trace: &Trace) -> Result<(), SinkError> {
        self.append(trace).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dialect;
    use chrono::Utc;
    use roastd_core::trace::{TraceMetadata, TraceStatus};

    fn trace(mission_id: Uuid) -> Trace {
        let loop_id = Uuid::new_v4();
        Trace {
            trace_id: Uuid::new_v4(),
            agent_id: "agent-1".to_owned(),
            mission_id,
            status: TraceStatus::Success,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            entries: Vec::new(),
            metadata: TraceMetadata {
                loop_id,
                iterations: 1,
            },
            error: None,
        }
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let db = Db::connect(Dialect::Sqlite, "sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let store = TraceStore::new(db);

        let mission_id = Uuid::new_v4();
        let t = trace(mission_id);
        store.append(&t).await.unwrap();

        let loaded = store.for_mission(mission_id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].trace_id, t.trace_id);
        assert_eq!(loaded[0].status, TraceStatus::Success);
    }

    #[tokio::test]
    async fn duplicate_append_is_a_noop() {
        let db = Db::connect(Dialect::Sqlite, "sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let store = TraceStore::new(db);

        let t = trace(Uuid::new_v4());
        store.append(&t).await.unwrap();
        store.append(&t).await.unwrap();

        assert_eq!(store.for_mission(t.mission_id).await.unwrap().len(), 1);
    }
}
