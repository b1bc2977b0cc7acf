//! Postgres event store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` inside a single `UPDATE ... RETURNING`
//! so selection and the move to `processing` are one statement. Reports are
//! conditional updates keyed on `(id, status, processing_started_at)`; a zero
//! row count means the claim is gone and the current row decides the error.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use super::state::{self, FailureTransition};
use super::{RetryPolicy, validate_new_event};
use crate::domain::{
    Claim, Event, EventFilter, EventId, EventStatus, FailureReport, NewEvent, QueueError,
};
use crate::ports::{Clock, EventStore, IdGenerator, QueueCounts, SystemClock, UlidGenerator};

/// Rows per multi-row insert; keeps the bind count under the protocol limit.
pub const MAX_BATCH_ROWS: usize = 1_000;

const COLUMNS: &str = "id, event_type, payload, status, priority, retry_count, max_retries, \
     scheduled_at, processing_started_at, processed_at, progress, result, error_message, \
     owner, created_at, updated_at";

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS herald_events (
        id                    TEXT PRIMARY KEY,
        event_type            TEXT NOT NULL,
        payload               JSONB NOT NULL,
        status                TEXT NOT NULL CHECK (status IN
                                ('pending', 'processing', 'completed', 'failed', 'cancelled')),
        priority              INTEGER NOT NULL DEFAULT 0,
        retry_count           INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
        max_retries           INTEGER NOT NULL DEFAULT 3 CHECK (max_retries >= 0),
        scheduled_at          TIMESTAMPTZ NOT NULL,
        processing_started_at TIMESTAMPTZ,
        processed_at          TIMESTAMPTZ,
        progress              SMALLINT CHECK (progress BETWEEN 0 AND 100),
        result                JSONB,
        error_message         TEXT,
        owner                 TEXT,
        created_at            TIMESTAMPTZ NOT NULL,
        updated_at            TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS herald_events_claim_idx
        ON herald_events (priority DESC, scheduled_at ASC)
        WHERE status = 'pending'
    ",
    r"
    CREATE INDEX IF NOT EXISTS herald_events_owner_idx
        ON herald_events (owner, status, created_at DESC)
    ",
    r"
    CREATE INDEX IF NOT EXISTS herald_events_created_idx
        ON herald_events (created_at DESC)
    ",
];

pub struct PostgresEventStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry_policy: RetryPolicy,
}

impl PostgresEventStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        retry_policy: RetryPolicy,
    ) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to connect: {e}")))?;
        info!(max_connections, "event store connection pool established");
        Ok(Self::from_pool(pool, retry_policy, Arc::new(SystemClock)))
    }

    pub fn from_pool(pool: PgPool, retry_policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            pool,
            clock,
            ids,
            retry_policy,
        }
    }

    /// Create the events table and its indexes if missing.
    pub async fn migrate(&self) -> Result<(), QueueError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| QueueError::Storage(format!("failed to apply schema: {e}")))?;
        }
        Ok(())
    }

    async fn fetch(&self, id: EventId) -> Result<Event, QueueError> {
        let sql = format!("SELECT {COLUMNS} FROM herald_events WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_ulid().to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to load event: {e}")))?;
        match row {
            Some(row) => event_from_row(&row),
            None => Err(QueueError::NotFound(id)),
        }
    }

    /// A conditional update matched nothing; explain why from the current row.
    async fn explain_miss(
        &self,
        claim: &Claim,
        action: &'static str,
    ) -> Result<QueueError, QueueError> {
        let current = self.fetch(claim.event_id).await?;
        Ok(match state::guard_claim(&current, claim, action) {
            Err(err) => err,
            Ok(()) => QueueError::StaleClaim(claim.event_id),
        })
    }
}

fn to_i32(value: u32, field: &str) -> Result<i32, QueueError> {
    i32::try_from(value).map_err(|_| QueueError::InvalidEvent(format!("{field} out of range: {value}")))
}

fn event_from_row(row: &PgRow) -> Result<Event, QueueError> {
    let get_err = |e: sqlx::Error| QueueError::Storage(format!("malformed event row: {e}"));

    let id: String = row.try_get("id").map_err(get_err)?;
    let status: String = row.try_get("status").map_err(get_err)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(get_err)?;
    let max_retries: i32 = row.try_get("max_retries").map_err(get_err)?;
    let progress: Option<i16> = row.try_get("progress").map_err(get_err)?;

    Ok(Event {
        id: id.parse().map_err(QueueError::storage)?,
        event_type: row.try_get("event_type").map_err(get_err)?,
        payload: row.try_get("payload").map_err(get_err)?,
        status: status.parse().map_err(QueueError::storage)?,
        priority: row.try_get("priority").map_err(get_err)?,
        retry_count: u32::try_from(retry_count).map_err(QueueError::storage)?,
        max_retries: u32::try_from(max_retries).map_err(QueueError::storage)?,
        scheduled_at: row.try_get("scheduled_at").map_err(get_err)?,
        processing_started_at: row.try_get("processing_started_at").map_err(get_err)?,
        processed_at: row.try_get("processed_at").map_err(get_err)?,
        progress: progress
            .map(u8::try_from)
            .transpose()
            .map_err(QueueError::storage)?,
        result: row.try_get("result").map_err(get_err)?,
        error_message: row.try_get("error_message").map_err(get_err)?,
        owner: row.try_get("owner").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
        updated_at: row.try_get("updated_at").map_err(get_err)?,
    })
}

fn events_from_rows(rows: &[PgRow]) -> Result<Vec<Event>, QueueError> {
    rows.iter().map(event_from_row).collect()
}

fn push_insert(builder: &mut QueryBuilder<'_, Postgres>, events: &[Event]) -> Result<(), QueueError> {
    let mut rows = Vec::with_capacity(events.len());
    for event in events {
        rows.push((
            event,
            to_i32(event.retry_count, "retry_count")?,
            to_i32(event.max_retries, "max_retries")?,
        ));
    }
    builder.push(format!("INSERT INTO herald_events ({COLUMNS}) "));
    builder.push_values(rows, |mut b, (event, retry_count, max_retries)| {
        b.push_bind(event.id.as_ulid().to_string())
            .push_bind(event.event_type.clone())
            .push_bind(event.payload.clone())
            .push_bind(event.status.as_str())
            .push_bind(event.priority)
            .push_bind(retry_count)
            .push_bind(max_retries)
            .push_bind(event.scheduled_at)
            .push_bind(event.processing_started_at)
            .push_bind(event.processed_at)
            .push_bind(event.progress.map(i16::from))
            .push_bind(event.result.clone())
            .push_bind(event.error_message.clone())
            .push_bind(event.owner.clone())
            .push_bind(event.created_at)
            .push_bind(event.updated_at);
    });
    builder.push(format!(" RETURNING {COLUMNS}"));
    Ok(())
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn enqueue(&self, new: NewEvent) -> Result<Event, QueueError> {
        let mut inserted = self.enqueue_batch(vec![new]).await?;
        inserted
            .pop()
            .ok_or_else(|| QueueError::Storage("insert returned no row".into()))
    }

    async fn enqueue_batch(&self, batch: Vec<NewEvent>) -> Result<Vec<Event>, QueueError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if batch.len() > MAX_BATCH_ROWS {
            return Err(QueueError::InvalidEvent(format!(
                "batch of {} exceeds {MAX_BATCH_ROWS} rows",
                batch.len()
            )));
        }
        for new in &batch {
            validate_new_event(new)?;
        }
        let now = self.clock.now();
        let events: Vec<Event> = batch
            .into_iter()
            .map(|new| Event::from_new(self.ids.generate_event_id(), new, now))
            .collect();

        // One statement: either every row is inserted or none is.
        let mut builder = QueryBuilder::new("");
        push_insert(&mut builder, &events)?;
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to insert events: {e}")))?;
        let mut inserted = events_from_rows(&rows)?;

        // RETURNING order is not guaranteed; hand rows back in request order.
        let order: std::collections::HashMap<EventId, usize> =
            events.iter().enumerate().map(|(i, e)| (e.id, i)).collect();
        inserted.sort_by_key(|e| order.get(&e.id).copied().unwrap_or(usize::MAX));
        Ok(inserted)
    }

    async fn cancel(&self, id: EventId) -> Result<Event, QueueError> {
        let now = self.clock.now();
        let sql = format!(
            "UPDATE herald_events \
             SET status = 'cancelled', processed_at = $2, updated_at = $2 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_ulid().to_string())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to cancel event: {e}")))?;
        match row {
            Some(row) => event_from_row(&row),
            None => {
                let current = self.fetch(id).await?;
                state::guard_cancel(&current)?;
                // Pending again by the time we looked: the update lost a race.
                Err(QueueError::InvalidTransition {
                    id,
                    from: current.status,
                    action: "cancel",
                })
            }
        }
    }

    async fn get(&self, id: EventId) -> Result<Event, QueueError> {
        self.fetch(id).await
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<Event>, QueueError> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM herald_events WHERE TRUE"));
        if let Some(event_type) = &filter.event_type {
            builder.push(" AND event_type = ").push_bind(event_type.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(owner) = &filter.owner {
            builder.push(" AND owner = ").push_bind(owner.clone());
        }
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::try_from(filter.limit).unwrap_or(i64::MAX))
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.offset).unwrap_or(i64::MAX));

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to list events: {e}")))?;
        events_from_rows(&rows)
    }

    async fn claim_batch(&self, batch_size: usize) -> Result<Vec<Event>, QueueError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let sql = format!(
            "UPDATE herald_events \
             SET status = 'processing', processing_started_at = $1, updated_at = $1 \
             WHERE status = 'pending' AND id IN ( \
                 SELECT id FROM herald_events \
                 WHERE status = 'pending' AND scheduled_at <= $1 \
                 ORDER BY priority DESC, scheduled_at ASC, id ASC \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to claim events: {e}")))?;

        let mut claimed = events_from_rows(&rows)?;
        claimed.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then(a.id.cmp(&b.id))
        });
        if !claimed.is_empty() {
            debug!(claimed = claimed.len(), "claimed events");
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        claim: &Claim,
        result: Option<serde_json::Value>,
    ) -> Result<Event, QueueError> {
        let now = self.clock.now();
        let sql = format!(
            "UPDATE herald_events \
             SET status = 'completed', processed_at = $3, progress = 100, result = $4, updated_at = $3 \
             WHERE id = $1 AND status = 'processing' AND processing_started_at = $2 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(claim.event_id.as_ulid().to_string())
            .bind(claim.claimed_at)
            .bind(now)
            .bind(result)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to complete event: {e}")))?;
        if let Some(row) = row {
            return event_from_row(&row);
        }

        let current = self.fetch(claim.event_id).await?;
        if state::is_completion_replay(&current, claim) {
            return Ok(current);
        }
        Err(self.explain_miss(claim, "complete").await?)
    }

    async fn fail(&self, claim: &Claim, report: &FailureReport) -> Result<Event, QueueError> {
        let now = self.clock.now();
        let current = self.fetch(claim.event_id).await?;
        state::guard_claim(&current, claim, "fail")?;

        // Compare-and-swap on the row we decided from.
        let transition = state::decide_failure(&current, report, &self.retry_policy, now);
        let (status, retry_count, scheduled_at, processed_at): (
            EventStatus,
            u32,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
        ) = match transition {
            FailureTransition::Retry {
                retry_count,
                scheduled_at,
            } => (EventStatus::Pending, retry_count, scheduled_at, None),
            FailureTransition::Exhausted { retry_count } => {
                (EventStatus::Failed, retry_count, current.scheduled_at, Some(now))
            }
        };
        let sql = format!(
            "UPDATE herald_events \
             SET status = $4, retry_count = $5, scheduled_at = $6, processed_at = $7, \
                 error_message = $8, updated_at = $9 \
             WHERE id = $1 AND status = 'processing' AND processing_started_at = $2 \
               AND retry_count = $3 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(claim.event_id.as_ulid().to_string())
            .bind(claim.claimed_at)
            .bind(to_i32(current.retry_count, "retry_count")?)
            .bind(status.as_str())
            .bind(to_i32(retry_count, "retry_count")?)
            .bind(scheduled_at)
            .bind(processed_at)
            .bind(report.message.clone())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to record failure: {e}")))?;
        match row {
            Some(row) => event_from_row(&row),
            None => Err(self.explain_miss(claim, "fail").await?),
        }
    }

    async fn update_progress(&self, claim: &Claim, progress: u8) -> Result<Event, QueueError> {
        let progress = state::validate_progress(progress)?;
        let now = self.clock.now();
        let sql = format!(
            "UPDATE herald_events SET progress = $3, updated_at = $4 \
             WHERE id = $1 AND status = 'processing' AND processing_started_at = $2 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(claim.event_id.as_ulid().to_string())
            .bind(claim.claimed_at)
            .bind(i16::from(progress))
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to update progress: {e}")))?;
        match row {
            Some(row) => event_from_row(&row),
            None => Err(self.explain_miss(claim, "update progress of").await?),
        }
    }

    async fn counts_by_status(&self) -> Result<QueueCounts, QueueError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM herald_events GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to count events: {e}")))?;
        let mut counts = QueueCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(QueueError::storage)?;
            let n: i64 = row.try_get("n").map_err(QueueError::storage)?;
            let status: EventStatus = status.parse().map_err(QueueError::storage)?;
            counts.add(status, u64::try_from(n).unwrap_or(0));
        }
        Ok(counts)
    }
}
