use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};

use crate::{
    InsertOutcome, Journal, JournalError, Result, StepRecord, StepSeq, WorkflowId, WorkflowQuery,
    WorkflowRecord, WorkflowStatus,
};

const WORKFLOW_COLUMNS: &str = "id, name, input, status, output, error, parent_id, forked_from, \
     created_at, updated_at, completed_at";

const STEP_COLUMNS: &str = "workflow_id, seq, name, output, error, child_id, recorded_at";

const POP_SIGNAL: &str = r#"
    DELETE FROM workflow_signals
    WHERE id = (
        SELECT id FROM workflow_signals
        WHERE workflow_id = $1 AND topic = $2
        ORDER BY id
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING payload
"#;

/// PostgreSQL-backed journal implementation.
#[derive(Clone)]
pub struct PostgresJournal {
    pool: PgPool,
}

impl PostgresJournal {
    /// Creates a new PostgreSQL journal.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the workspace migrations (journal and shop tables).
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_workflow(row: PgRow) -> Result<WorkflowRecord> {
        let status: String = row.try_get("status")?;
        Ok(WorkflowRecord {
            id: WorkflowId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            input: row.try_get("input")?,
            status: WorkflowStatus::parse(&status)
                .ok_or_else(|| JournalError::Corrupt(format!("unknown status {status}")))?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            parent_id: row
                .try_get::<Option<String>, _>("parent_id")?
                .map(WorkflowId::new),
            forked_from: row
                .try_get::<Option<String>, _>("forked_from")?
                .map(WorkflowId::new),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn row_to_step(row: PgRow) -> Result<StepRecord> {
        Ok(StepRecord {
            workflow_id: WorkflowId::new(row.try_get::<String, _>("workflow_id")?),
            seq: StepSeq::new(row.try_get("seq")?),
            name: row.try_get("name")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            child_id: row
                .try_get::<Option<String>, _>("child_id")?
                .map(WorkflowId::new),
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn is_step_conflict(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some("unique_workflow_step"))
    }

    fn step_error(err: sqlx::Error, workflow_id: &WorkflowId, seq: StepSeq) -> JournalError {
        if Self::is_step_conflict(&err) {
            tracing::debug!(%workflow_id, %seq, "step already recorded");
            return JournalError::StepConflict {
                workflow_id: workflow_id.clone(),
                seq,
            };
        }
        JournalError::Database(err)
    }
}

#[async_trait]
impl Journal for PostgresJournal {
    async fn insert_workflow(&self, record: WorkflowRecord) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflows (id, name, input, status, output, error, parent_id, forked_from, created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id.as_str())
        .bind(&record.name)
        .bind(&record.input)
        .bind(record.status.as_str())
        .bind(&record.output)
        .bind(&record.error)
        .bind(record.parent_id.as_ref().map(WorkflowId::as_str))
        .bind(record.forked_from.as_ref().map(WorkflowId::as_str))
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(InsertOutcome::Created);
        }

        let existing = self
            .get_workflow(&record.id)
            .await?
            .ok_or_else(|| JournalError::WorkflowNotFound(record.id.clone()))?;
        Ok(InsertOutcome::Existing(existing))
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_workflow).transpose()
    }

    async fn transition_status(
        &self,
        id: &WorkflowId,
        from: &[WorkflowStatus],
        to: WorkflowStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET status = $3, error = COALESCE($4, error), updated_at = NOW()
            WHERE id = $1 AND status = ANY($2)
            "#,
        )
        .bind(id.as_str())
        .bind(from)
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.get_workflow(id).await?.is_none() {
            return Err(JournalError::WorkflowNotFound(id.clone()));
        }
        tracing::debug!(workflow_id = %id, target = %to, "status transition skipped");
        Ok(false)
    }

    async fn complete_workflow(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<WorkflowStatus> {
        // Right-hand sides read the pre-update row.
        let stored: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE workflows
            SET status = CASE WHEN status = 'CANCELLED' THEN status ELSE $2 END,
                output = CASE WHEN status = 'CANCELLED' THEN output ELSE $3 END,
                error = CASE WHEN status = 'CANCELLED' THEN error ELSE $4 END,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .bind(output)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        let stored = stored.ok_or_else(|| JournalError::WorkflowNotFound(id.clone()))?;
        WorkflowStatus::parse(&stored)
            .ok_or_else(|| JournalError::Corrupt(format!("unknown status {stored}")))
    }

    async fn list_workflows(&self, query: WorkflowQuery) -> Result<Vec<WorkflowRecord>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE TRUE"));

        if let Some(name) = query.name {
            builder.push(" AND name = ").push_bind(name);
        }
        if let Some(statuses) = query.statuses {
            let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            builder.push(" AND status = ANY(").push_bind(names).push(")");
        }
        if let Some(after) = query.created_after {
            builder.push(" AND created_at >= ").push_bind(after);
        }
        builder.push(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            builder.push(" OFFSET ").push_bind(offset as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_workflow).collect()
    }

    async fn append_step(&self, record: StepRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO workflow_steps ({STEP_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(record.workflow_id.as_str())
        .bind(record.seq.as_i32())
        .bind(&record.name)
        .bind(&record.output)
        .bind(&record.error)
        .bind(record.child_id.as_ref().map(WorkflowId::as_str))
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Self::step_error(e, &record.workflow_id, record.seq))?;

        metrics::counter!("journal_steps_appended").increment(1);
        Ok(())
    }

    async fn get_step(&self, id: &WorkflowId, seq: StepSeq) -> Result<Option<StepRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE workflow_id = $1 AND seq = $2"
        ))
        .bind(id.as_str())
        .bind(seq.as_i32())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_step).transpose()
    }

    async fn list_steps(&self, id: &WorkflowId) -> Result<Vec<StepRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE workflow_id = $1 ORDER BY seq ASC"
        ))
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_step).collect()
    }

    async fn copy_steps(
        &self,
        from: &WorkflowId,
        to: &WorkflowId,
        before: StepSeq,
    ) -> Result<usize> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_steps (workflow_id, seq, name, output, error, child_id, recorded_at)
            SELECT $2, seq, name, output, error, child_id, recorded_at
            FROM workflow_steps
            WHERE workflow_id = $1 AND seq < $3
            "#,
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(before.as_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| Self::step_error(e, to, before))?;

        Ok(result.rows_affected() as usize)
    }

    async fn set_event(
        &self,
        id: &WorkflowId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_events (workflow_id, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (workflow_id, key) DO NOTHING
            "#,
        )
        .bind(id.as_str())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_event(&self, id: &WorkflowId, key: &str) -> Result<Option<serde_json::Value>> {
        let value = sqlx::query_scalar(
            "SELECT value FROM workflow_events WHERE workflow_id = $1 AND key = $2",
        )
        .bind(id.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    async fn push_signal(
        &self,
        id: &WorkflowId,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        sqlx::query("INSERT INTO workflow_signals (workflow_id, topic, payload) VALUES ($1, $2, $3)")
            .bind(id.as_str())
            .bind(topic)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pop_signal(&self, id: &WorkflowId, topic: &str) -> Result<Option<serde_json::Value>> {
        // SKIP LOCKED so two concurrent receivers never get the same message.
        let payload: Option<serde_json::Value> = sqlx::query_scalar(POP_SIGNAL)
            .bind(id.as_str())
            .bind(topic)
            .fetch_optional(&self.pool)
            .await?;

        if payload.is_some() {
            tracing::debug!(workflow_id = %id, topic, "signal consumed");
        }
        Ok(payload)
    }

    async fn receive_signal(
        &self,
        id: &WorkflowId,
        topic: &str,
        seq: StepSeq,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        let mut tx = self.pool.begin().await?;

        let payload: Option<serde_json::Value> = sqlx::query_scalar(POP_SIGNAL)
            .bind(id.as_str())
            .bind(topic)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(payload) = payload else {
            tx.rollback().await?;
            return Ok(None);
        };

        // Dropping `tx` on error rolls the DELETE back.
        let step = StepRecord::success(id.clone(), seq, name, payload.clone());
        sqlx::query(&format!(
            "INSERT INTO workflow_steps ({STEP_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(step.workflow_id.as_str())
        .bind(step.seq.as_i32())
        .bind(&step.name)
        .bind(&step.output)
        .bind(&step.error)
        .bind(step.child_id.as_ref().map(WorkflowId::as_str))
        .bind(step.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Self::step_error(e, id, seq))?;

        tx.commit().await?;
        metrics::counter!("journal_steps_appended").increment(1);
        tracing::debug!(workflow_id = %id, %seq, topic, "signal received");
        Ok(Some(payload))
    }
}
