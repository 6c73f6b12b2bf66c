//! SQLite job store (sqlx).
//!
//! Times are stored as unix milliseconds, the repeat interval as milliseconds
//! and the status as [`JobStatus::code`].

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info};
use ulid::Ulid;

use crate::domain::{JobCounts, JobId, JobRecord, JobStatus};
use crate::ports::{JobStore, StoreError};

const COLUMNS: &str = "id, name, args, status, retry_count, max_retry, error, error_trace, \
     created_at, finished_at, repeating, repeat_interval_ms, next_run, named_job";

/// `Retry`, or `Pending` and due. Binds `now`. Shared by `pending` and `claim`.
const ELIGIBLE: &str =
    "(status = 3 OR (status = 0 AND (repeating = 0 OR next_run IS NULL OR next_run <= ?)))";

/// NULL `finished_at` sorts first, so never-run jobs go before finished ones.
const CLAIM_ORDER: &str = "ORDER BY finished_at ASC, created_at ASC, id ASC";

pub struct SqliteJobStore {
    pool: SqlitePool,
    /// Serializes claims and named-job upserts. SQLite allows one writer at a
    /// time; taking this first keeps pool connections from racing into
    /// `SQLITE_BUSY`.
    write_lock: Mutex<()>,
}

impl SqliteJobStore {
    /// Connect and run migrations.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so use
    /// `max_connections = 1` with an in-memory URL. File databases run in WAL
    /// mode so readers and the single writer do not block each other.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if url.contains(":memory:") {
            // Dropping the last connection would drop the database with it.
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        info!(target: "store", url, max_connections, "connecting to sqlite");
        let pool = pool_options.connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and run migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_by_id(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM jobs WHERE id = ?"))
            .bind(id.as_ulid().to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    /// Run a single-row update, mapping "no row touched" to `NotFound`.
    async fn update_one<'q>(
        &self,
        id: JobId,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Result<(), StoreError> {
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_or_upsert(&self, job: JobRecord) -> Result<JobId, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if let Some(identifier) = job.named_job.as_deref() {
            let row = sqlx::query(&format!("SELECT {COLUMNS} FROM jobs WHERE named_job = ?"))
                .bind(identifier)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = row {
                let mut existing = row_to_job(&row)?;
                existing.apply_upsert(&job);
                debug!(target: "store", job_id = %existing.id, identifier, "updating named job");
                sqlx::query(
                    "UPDATE jobs SET name = ?, args = ?, status = ?, retry_count = ?, \
                     max_retry = ?, error = ?, error_trace = ?, repeating = ?, \
                     repeat_interval_ms = ?, next_run = ? WHERE id = ?",
                )
                .bind(&existing.name)
                .bind(&existing.args)
                .bind(existing.status.code())
                .bind(i64::from(existing.retry_count))
                .bind(i64::from(existing.max_retry))
                .bind(existing.error.as_deref())
                .bind(existing.error_trace.as_deref())
                .bind(existing.repeat)
                .bind(duration_to_millis(existing.repeat_interval))
                .bind(existing.next_run.map(|at| at.timestamp_millis()))
                .bind(existing.id.as_ulid().to_string())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                return Ok(existing.id);
            }
        }

        sqlx::query(&format!(
            "INSERT INTO jobs ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(job.id.as_ulid().to_string())
        .bind(&job.name)
        .bind(&job.args)
        .bind(job.status.code())
        .bind(i64::from(job.retry_count))
        .bind(i64::from(job.max_retry))
        .bind(job.error.as_deref())
        .bind(job.error_trace.as_deref())
        .bind(job.created_at.timestamp_millis())
        .bind(job.finished_at.map(|at| at.timestamp_millis()))
        .bind(job.repeat)
        .bind(duration_to_millis(job.repeat_interval))
        .bind(job.next_run.map(|at| at.timestamp_millis()))
        .bind(job.named_job.as_deref())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(job.id)
    }

    async fn claim(
        &self,
        names: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, StoreError> {
        if names.is_empty() {
            return Ok(None);
        }

        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "UPDATE jobs SET status = 1 WHERE id = (SELECT id FROM jobs \
             WHERE {ELIGIBLE} AND name IN ({placeholders}) {CLAIM_ORDER} LIMIT 1) \
             RETURNING {COLUMNS}"
        );
        let mut query = sqlx::query(&sql).bind(now.timestamp_millis());
        for name in names {
            query = query.bind(name.as_str());
        }

        let _guard = self.write_lock.lock().await;
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
        let query = sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
            .bind(status.code())
            .bind(id.as_ulid().to_string());
        self.update_one(id, query).await
    }

    async fn inc_retry_count(&self, id: JobId) -> Result<u32, StoreError> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE jobs SET retry_count = retry_count + 1 WHERE id = ? RETURNING retry_count",
        )
        .bind(id.as_ulid().to_string())
        .fetch_optional(&self.pool)
        .await?;
        let count = count.ok_or(StoreError::NotFound(id))?;
        to_u32(count, "retry_count")
    }

    async fn set_error(
        &self,
        id: JobId,
        error: Option<&str>,
        trace: Option<&str>,
    ) -> Result<(), StoreError> {
        let query = sqlx::query("UPDATE jobs SET error = ?, error_trace = ? WHERE id = ?")
            .bind(error)
            .bind(trace)
            .bind(id.as_ulid().to_string());
        self.update_one(id, query).await
    }

    async fn set_finished_at(&self, id: JobId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let query = sqlx::query("UPDATE jobs SET finished_at = ? WHERE id = ?")
            .bind(at.timestamp_millis())
            .bind(id.as_ulid().to_string());
        self.update_one(id, query).await
    }

    async fn set_next_run(&self, id: JobId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let query = sqlx::query("UPDATE jobs SET next_run = ? WHERE id = ?")
            .bind(at.timestamp_millis())
            .bind(id.as_ulid().to_string());
        self.update_one(id, query).await
    }

    async fn pending(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE {ELIGIBLE} {CLAIM_ORDER}"
        ))
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn clean_up(
        &self,
        cutoff: DateTime<Utc>,
        include_failed: bool,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE finished_at IS NOT NULL AND finished_at < ? \
             AND (status = 2 OR (? AND status = 4))",
        )
        .bind(cutoff.timestamp_millis())
        .bind(include_failed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn named_job(&self, identifier: &str) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM jobs WHERE named_job = ?"))
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.fetch_by_id(id).await
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        let rows: Vec<(i64, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut counts = JobCounts::default();
        for (code, n) in rows {
            let status = JobStatus::from_code(code)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown status code {code}")))?;
            counts.add(status, usize::try_from(n).unwrap_or(0));
        }
        Ok(counts)
    }
}

fn row_to_job(row: &SqliteRow) -> Result<JobRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let ulid = Ulid::from_string(&id)
        .map_err(|e| StoreError::Corrupt(format!("invalid job id {id:?}: {e}")))?;
    let code: i64 = row.try_get("status")?;
    let status = JobStatus::from_code(code)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown status code {code}")))?;
    let interval_ms: i64 = row.try_get("repeat_interval_ms")?;

    Ok(JobRecord {
        id: JobId::from_ulid(ulid),
        name: row.try_get("name")?,
        args: row.try_get("args")?,
        status,
        retry_count: to_u32(row.try_get("retry_count")?, "retry_count")?,
        max_retry: to_u32(row.try_get("max_retry")?, "max_retry")?,
        error: row.try_get("error")?,
        error_trace: row.try_get("error_trace")?,
        created_at: millis_to_time(row.try_get("created_at")?)?,
        finished_at: row
            .try_get::<Option<i64>, _>("finished_at")?
            .map(millis_to_time)
            .transpose()?,
        repeat: row.try_get("repeating")?,
        repeat_interval: Duration::from_millis(u64::try_from(interval_ms).unwrap_or(0)),
        next_run: row
            .try_get::<Option<i64>, _>("next_run")?
            .map(millis_to_time)
            .transpose()?,
        named_job: row.try_get("named_job")?,
    })
}

fn millis_to_time(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn to_u32(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn duration_to_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobConfig;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn job(name: &str, config: &JobConfig) -> JobRecord {
        JobRecord::new(JobId::from_ulid(Ulid::new()), name, b"{}".to_vec(), config, at(0))
    }

    async fn store() -> SqliteJobStore {
        SqliteJobStore::connect("sqlite::memory:", 1).await.unwrap()
    }

    #[tokio::test]
    async fn rows_round_trip_through_sqlite() {
        let store = store().await;
        let mut original = job(
            "tick",
            &JobConfig::new()
                .max_retry(2)
                .repeat_every(Duration::from_millis(1500))
                .identifier("heartbeat"),
        );
        original.error = Some("boom".into());
        original.finished_at = Some(at(3));

        let id = store.create_or_upsert(original.clone()).await.unwrap();
        let loaded = store.get(id).await.unwrap().unwrap();

        assert_eq!(loaded, original);
    }

    #[tokio::test]
    async fn claim_is_restricted_to_registered_names() {
        let store = store().await;
        store.create_or_upsert(job("other", &JobConfig::new())).await.unwrap();
        let id = store.create_or_upsert(job("inc", &JobConfig::new())).await.unwrap();

        let names = vec!["inc".to_string()];
        let claimed = store.claim(&names, at(0)).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(store.claim(&names, at(0)).await.unwrap().is_none());
        assert!(store.claim(&[], at(0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_honours_next_run_and_finish_order() {
        let store = store().await;
        let names = vec!["tick".to_string()];
        let repeating = store
            .create_or_upsert(job("tick", &JobConfig::new().repeat_every(Duration::from_secs(60))))
            .await
            .unwrap();
        let retried = store.create_or_upsert(job("tick", &JobConfig::new())).await.unwrap();
        store.set_finished_at(retried, at(5)).await.unwrap();
        store.set_status(retried, JobStatus::Retry).await.unwrap();

        let first = store.claim(&names, at(10)).await.unwrap().unwrap();
        assert_eq!(first.id, retried);
        assert!(store.claim(&names, at(10)).await.unwrap().is_none());

        let second = store.claim(&names, at(60)).await.unwrap().unwrap();
        assert_eq!(second.id, repeating);
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_identifier() {
        let store = store().await;
        let first = store
            .create_or_upsert(job("inc", &JobConfig::new().identifier("daily")))
            .await
            .unwrap();
        let mut second = job("inc", &JobConfig::new().max_retry(4).identifier("daily"));
        second.args = b"{\"amount\":9}".to_vec();

        assert_eq!(store.create_or_upsert(second).await.unwrap(), first);
        assert_eq!(store.counts().await.unwrap().total(), 1);
        let stored = store.named_job("daily").await.unwrap().unwrap();
        assert_eq!(stored.max_retry, 4);
        assert_eq!(stored.args, b"{\"amount\":9}".to_vec());
    }

    #[tokio::test]
    async fn upsert_re_arms_finished_row() {
        let store = store().await;
        let id = store
            .create_or_upsert(job("report", &JobConfig::new().identifier("nightly")))
            .await
            .unwrap();
        store.inc_retry_count(id).await.unwrap();
        store.set_error(id, Some("boom"), Some("trace")).await.unwrap();
        store.set_finished_at(id, at(100)).await.unwrap();
        store.set_status(id, JobStatus::Failed).await.unwrap();

        let again = job(
            "report",
            &JobConfig::new()
                .identifier("nightly")
                .repeat_every(Duration::from_secs(60)),
        );
        assert_eq!(store.create_or_upsert(again).await.unwrap(), id);

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.error, None);
        assert_eq!(stored.error_trace, None);
        assert!(stored.repeat);
        assert_eq!(stored.next_run, Some(at(160)));

        let names = vec!["report".to_string()];
        assert!(store.claim(&names, at(159)).await.unwrap().is_none());
        assert_eq!(store.claim(&names, at(160)).await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn clean_up_deletes_only_old_terminal_jobs() {
        let store = store().await;
        let mut ids = Vec::new();
        for (status, finished) in [
            (JobStatus::Done, at(0)),
            (JobStatus::Done, at(100)),
            (JobStatus::Failed, at(0)),
            (JobStatus::Retry, at(0)),
        ] {
            let id = store.create_or_upsert(job("inc", &JobConfig::new())).await.unwrap();
            store.set_finished_at(id, finished).await.unwrap();
            store.set_status(id, status).await.unwrap();
            ids.push(id);
        }

        assert_eq!(store.clean_up(at(50), false).await.unwrap(), 1);
        assert!(store.get(ids[0]).await.unwrap().is_none());
        assert_eq!(store.clean_up(at(50), true).await.unwrap(), 1);
        assert!(store.get(ids[2]).await.unwrap().is_none());
        assert_eq!(store.counts().await.unwrap().total(), 2);
    }

    #[tokio::test]
    async fn single_field_updates() {
        let store = store().await;
        let id = store.create_or_upsert(job("inc", &JobConfig::new())).await.unwrap();

        assert_eq!(store.inc_retry_count(id).await.unwrap(), 1);
        store.set_error(id, Some("bad"), Some("trace")).await.unwrap();
        store.set_next_run(id, at(42)).await.unwrap();

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.retry_count, 1);
        assert_eq!(loaded.error.as_deref(), Some("bad"));
        assert_eq!(loaded.error_trace.as_deref(), Some("trace"));
        assert_eq!(loaded.next_run, Some(at(42)));

        store.set_error(id, None, None).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().error, None);

        let missing = JobId::from_ulid(Ulid::new());
        assert!(matches!(
            store.inc_retry_count(missing).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn claim_takes_the_head_of_pending() {
        let store = store().await;
        let names = vec!["tick".to_string()];
        let due_later = store
            .create_or_upsert(job("tick", &JobConfig::new().repeat_every(Duration::from_secs(60))))
            .await
            .unwrap();
        let retried = store.create_or_upsert(job("tick", &JobConfig::new())).await.unwrap();
        store.set_finished_at(retried, at(5)).await.unwrap();
        store.set_status(retried, JobStatus::Retry).await.unwrap();
        let fresh = store.create_or_upsert(job("tick", &JobConfig::new())).await.unwrap();

        // never-run jobs first; the repeating one only becomes due at 60
        for (now, expected) in [(at(10), fresh), (at(60), due_later)] {
            let pending: Vec<JobId> =
                store.pending(now).await.unwrap().iter().map(|j| j.id).collect();
            let claimed = store.claim(&names, now).await.unwrap().map(|j| j.id);
            assert_eq!(pending.first().copied(), claimed, "at {now}");
            assert_eq!(claimed, Some(expected), "at {now}");
        }
        let left: Vec<JobId> = store.pending(at(60)).await.unwrap().iter().map(|j| j.id).collect();
        assert_eq!(left, vec![retried]);
    }
}
