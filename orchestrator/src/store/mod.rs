//! Durable session/result persistence plus the admission-control primitive.
//!
//! One [`ResultStore`] interface over two backends: embedded SQLite for
//! local runs and PostgreSQL for shared deployments. Rows are identical in
//! both; the backends differ only in how [`ResultStore::acquire_slot`]
//! builds its critical section (SQLite: `BEGIN EXCLUSIVE` transaction;
//! PostgreSQL: session-scoped advisory lock).
//!
//! Schema:
//! ```sql
//! CREATE TABLE IF NOT EXISTS analysis_sessions (
//!     id          INTEGER PRIMARY KEY,
//!     query       TEXT NOT NULL,
//!     rules_path  TEXT,
//!     use_pro     BOOLEAN NOT NULL DEFAULT FALSE,
//!     created_at  TEXT NOT NULL,
//!     status      TEXT NOT NULL DEFAULT 'pending'
//! );
//! CREATE TABLE IF NOT EXISTS analysis_results (
//!     id           INTEGER PRIMARY KEY,
//!     session_id   INTEGER NOT NULL REFERENCES analysis_sessions(id),
//!     repo_name    TEXT NOT NULL,
//!     repo_url     TEXT NOT NULL,
//!     success      BOOLEAN NOT NULL,
//!     output       TEXT NOT NULL,        -- empty = pending
//!     analyzed_at  TEXT NOT NULL,
//!     artifact_uri TEXT,
//!     job_id       TEXT,
//!     job_name     TEXT,
//!     UNIQUE (session_id, repo_name)
//! );
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, Row, SqlitePool};
use tracing::{info, warn};

use shared_types::AnalysisResult;

use crate::compute::ComputeBackend;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to prepare database path: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored timestamp: {0}")]
    InvalidTimestamp(String),
}

/// The `(query, rules_path, use_pro)` tuple identifying "the same request".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub query: String,
    pub rules_path: Option<String>,
    pub use_pro: bool,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub query: String,
    pub rules_path: Option<String>,
    pub use_pro: bool,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: i64,
    pub query: String,
    pub rules_path: Option<String>,
    pub use_pro: bool,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub result_count: i64,
    pub success_count: i64,
}

/// Insert-or-replace payload for one result row.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub session_id: i64,
    pub repo_name: String,
    pub repo_url: String,
    pub success: bool,
    pub output: String,
    pub artifact_uri: Option<String>,
    pub job_id: Option<String>,
    pub job_name: Option<String>,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy)]
pub struct SlotDecision {
    pub granted: bool,
    /// In-flight count observed inside the critical section. Equals
    /// `max_parallel` when the live count could not be obtained.
    pub active: u32,
}

enum StorePool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

pub struct ResultStore {
    pool: StorePool,
}

/// Lock class for PostgreSQL advisory locks; the second key is the session id.
const SLOT_LOCK_CLASS: i32 = 0x6472_6167;

impl ResultStore {
    /// Connect and initialize the schema.
    ///
    /// `postgres://` / `postgresql://` URLs select the networked backend;
    /// everything else is treated as a SQLite path. Handles both
    /// `sqlite:./foo.db` and bare `./foo.db` forms, creating parent
    /// directories as needed.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let store = if database_url.starts_with("postgres://")
            || database_url.starts_with("postgresql://")
        {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            info!("connected to PostgreSQL result store");
            Self {
                pool: StorePool::Postgres(pool),
            }
        } else {
            let file_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
            let abs_path = std::env::current_dir()?.join(file_path);
            if let Some(parent) = abs_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let pool = SqlitePoolOptions::new()
                .connect_with(
                    SqliteConnectOptions::new()
                        .filename(&abs_path)
                        .create_if_missing(true),
                )
                .await?;
            info!(path = %abs_path.display(), "connected to SQLite result store");
            Self {
                pool: StorePool::Sqlite(pool),
            }
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS analysis_sessions (
                        id          INTEGER PRIMARY KEY AUTOINCREMENT,
                        query       TEXT NOT NULL,
                        rules_path  TEXT,
                        use_pro     INTEGER NOT NULL DEFAULT 0,
                        created_at  TEXT NOT NULL,
                        status      TEXT NOT NULL DEFAULT 'pending'
                    )",
                )
                .execute(pool)
                .await?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS analysis_results (
                        id           INTEGER PRIMARY KEY AUTOINCREMENT,
                        session_id   INTEGER NOT NULL,
                        repo_name    TEXT NOT NULL,
                        repo_url     TEXT NOT NULL,
                        success      INTEGER NOT NULL,
                        output       TEXT NOT NULL,
                        analyzed_at  TEXT NOT NULL,
                        artifact_uri TEXT,
                        job_id       TEXT,
                        job_name     TEXT,
                        FOREIGN KEY (session_id) REFERENCES analysis_sessions(id),
                        UNIQUE (session_id, repo_name)
                    )",
                )
                .execute(pool)
                .await?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_results_session
                     ON analysis_results(session_id)",
                )
                .execute(pool)
                .await?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_results_repo
                     ON analysis_results(repo_name)",
                )
                .execute(pool)
                .await?;
            }
            StorePool::Postgres(pool) => {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS analysis_sessions (
                        id          BIGSERIAL PRIMARY KEY,
                        query       TEXT NOT NULL,
                        rules_path  TEXT,
                        use_pro     BOOLEAN NOT NULL DEFAULT FALSE,
                        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        status      TEXT NOT NULL DEFAULT 'pending'
                    )",
                )
                .execute(pool)
                .await?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS analysis_results (
                        id           BIGSERIAL PRIMARY KEY,
                        session_id   BIGINT NOT NULL REFERENCES analysis_sessions(id),
                        repo_name    TEXT NOT NULL,
                        repo_url     TEXT NOT NULL,
                        success      BOOLEAN NOT NULL,
                        output       TEXT NOT NULL,
                        analyzed_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                        artifact_uri TEXT,
                        job_id       TEXT,
                        job_name     TEXT,
                        UNIQUE (session_id, repo_name)
                    )",
                )
                .execute(pool)
                .await?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_results_session
                     ON analysis_results(session_id)",
                )
                .execute(pool)
                .await?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_results_repo
                     ON analysis_results(repo_name)",
                )
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Insert a new session row and return its id. Always inserts; resume
    /// goes through [`ResultStore::find_session`] first.
    pub async fn create_session(&self, fp: &Fingerprint) -> Result<i64, StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                let result = sqlx::query(
                    "INSERT INTO analysis_sessions (query, rules_path, use_pro, created_at)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&fp.query)
                .bind(&fp.rules_path)
                .bind(fp.use_pro)
                .bind(Utc::now().to_rfc3339())
                .execute(pool)
                .await?;
                Ok(result.last_insert_rowid())
            }
            StorePool::Postgres(pool) => {
                let row = sqlx::query(
                    "INSERT INTO analysis_sessions (query, rules_path, use_pro, created_at)
                     VALUES ($1, $2, $3, $4)
                     RETURNING id",
                )
                .bind(&fp.query)
                .bind(&fp.rules_path)
                .bind(fp.use_pro)
                .bind(Utc::now())
                .fetch_one(pool)
                .await?;
                Ok(row.get::<i64, _>(0))
            }
        }
    }

    /// Most recent session whose fingerprint matches exactly.
    pub async fn find_session(&self, fp: &Fingerprint) -> Result<Option<i64>, StoreError> {
        let row = match &self.pool {
            StorePool::Sqlite(pool) => {
                sqlx::query(
                    "SELECT id FROM analysis_sessions
                     WHERE query = ? AND rules_path IS ? AND use_pro = ?
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1",
                )
                .bind(&fp.query)
                .bind(&fp.rules_path)
                .bind(fp.use_pro)
                .fetch_optional(pool)
                .await?
                .map(|r| r.get::<i64, _>(0))
            }
            StorePool::Postgres(pool) => {
                sqlx::query(
                    "SELECT id FROM analysis_sessions
                     WHERE query = $1 AND rules_path IS NOT DISTINCT FROM $2 AND use_pro = $3
                     ORDER BY created_at DESC, id DESC
                     LIMIT 1",
                )
                .bind(&fp.query)
                .bind(&fp.rules_path)
                .bind(fp.use_pro)
                .fetch_optional(pool)
                .await?
                .map(|r| r.get::<i64, _>(0))
            }
        };
        Ok(row)
    }

    pub async fn get_session(&self, session_id: i64) -> Result<Option<Session>, StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                let row = sqlx::query(
                    "SELECT id, query, rules_path, use_pro, created_at, status
                     FROM analysis_sessions WHERE id = ?",
                )
                .bind(session_id)
                .fetch_optional(pool)
                .await?;
                row.map(|r| {
                    Ok(Session {
                        id: r.get(0),
                        query: r.get(1),
                        rules_path: r.get(2),
                        use_pro: r.get(3),
                        created_at: parse_rfc3339(&r.get::<String, _>(4))?,
                        status: r.get(5),
                    })
                })
                .transpose()
            }
            StorePool::Postgres(pool) => {
                let row = sqlx::query(
                    "SELECT id, query, rules_path, use_pro, created_at, status
                     FROM analysis_sessions WHERE id = $1",
                )
                .bind(session_id)
                .fetch_optional(pool)
                .await?;
                Ok(row.map(|r| Session {
                    id: r.get(0),
                    query: r.get(1),
                    rules_path: r.get(2),
                    use_pro: r.get(3),
                    created_at: r.get(4),
                    status: r.get(5),
                }))
            }
        }
    }

    /// All sessions with per-session result/success counts, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                let rows = sqlx::query(
                    "SELECT s.id, s.query, s.rules_path, s.use_pro, s.created_at, s.status,
                            COUNT(r.id) AS result_count,
                            COALESCE(SUM(CASE WHEN r.success = 1 THEN 1 ELSE 0 END), 0)
                                AS success_count
                     FROM analysis_sessions s
                     LEFT JOIN analysis_results r ON s.id = r.session_id
                     GROUP BY s.id
                     ORDER BY s.created_at DESC, s.id DESC",
                )
                .fetch_all(pool)
                .await?;
                rows.into_iter()
                    .map(|r| {
                        Ok(SessionSummary {
                            id: r.get(0),
                            query: r.get(1),
                            rules_path: r.get(2),
                            use_pro: r.get(3),
                            created_at: parse_rfc3339(&r.get::<String, _>(4))?,
                            status: r.get(5),
                            result_count: r.get(6),
                            success_count: r.get(7),
                        })
                    })
                    .collect()
            }
            StorePool::Postgres(pool) => {
                let rows = sqlx::query(
                    "SELECT s.id, s.query, s.rules_path, s.use_pro, s.created_at, s.status,
                            COUNT(r.id) AS result_count,
                            COALESCE(SUM(CASE WHEN r.success THEN 1 ELSE 0 END), 0)
                                AS success_count
                     FROM analysis_sessions s
                     LEFT JOIN analysis_results r ON s.id = r.session_id
                     GROUP BY s.id
                     ORDER BY s.created_at DESC, s.id DESC",
                )
                .fetch_all(pool)
                .await?;
                Ok(rows
                    .into_iter()
                    .map(|r| SessionSummary {
                        id: r.get(0),
                        query: r.get(1),
                        rules_path: r.get(2),
                        use_pro: r.get(3),
                        created_at: r.get(4),
                        status: r.get(5),
                        result_count: r.get(6),
                        success_count: r.get(7),
                    })
                    .collect())
            }
        }
    }

    /// Opportunistic stored-status update. The authoritative status is
    /// recomputed from results on every read; this only keeps the listing
    /// readable.
    pub async fn update_session_status(
        &self,
        session_id: i64,
        status: &str,
    ) -> Result<(), StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                sqlx::query("UPDATE analysis_sessions SET status = ? WHERE id = ?")
                    .bind(status)
                    .bind(session_id)
                    .execute(pool)
                    .await?;
            }
            StorePool::Postgres(pool) => {
                sqlx::query("UPDATE analysis_sessions SET status = $1 WHERE id = $2")
                    .bind(status)
                    .bind(session_id)
                    .execute(pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Insert-or-replace keyed by `(session_id, repo_name)`.
    ///
    /// Safe to call repeatedly: the pending write on admission and the
    /// terminal overwrite from the worker callback both land here, and
    /// at-least-once callback delivery means the terminal write may repeat.
    pub async fn upsert_result(&self, result: &NewResult) -> Result<(), StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO analysis_results
                        (session_id, repo_name, repo_url, success, output, analyzed_at,
                         artifact_uri, job_id, job_name)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (session_id, repo_name) DO UPDATE SET
                        repo_url = excluded.repo_url,
                        success = excluded.success,
                        output = excluded.output,
                        analyzed_at = excluded.analyzed_at,
                        artifact_uri = excluded.artifact_uri,
                        job_id = excluded.job_id,
                        job_name = excluded.job_name",
                )
                .bind(result.session_id)
                .bind(&result.repo_name)
                .bind(&result.repo_url)
                .bind(result.success)
                .bind(&result.output)
                .bind(Utc::now().to_rfc3339())
                .bind(&result.artifact_uri)
                .bind(&result.job_id)
                .bind(&result.job_name)
                .execute(pool)
                .await?;
            }
            StorePool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO analysis_results
                        (session_id, repo_name, repo_url, success, output, analyzed_at,
                         artifact_uri, job_id, job_name)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                     ON CONFLICT (session_id, repo_name) DO UPDATE SET
                        repo_url = EXCLUDED.repo_url,
                        success = EXCLUDED.success,
                        output = EXCLUDED.output,
                        analyzed_at = EXCLUDED.analyzed_at,
                        artifact_uri = EXCLUDED.artifact_uri,
                        job_id = EXCLUDED.job_id,
                        job_name = EXCLUDED.job_name",
                )
                .bind(result.session_id)
                .bind(&result.repo_name)
                .bind(&result.repo_url)
                .bind(result.success)
                .bind(&result.output)
                .bind(Utc::now())
                .bind(&result.artifact_uri)
                .bind(&result.job_id)
                .bind(&result.job_name)
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Insert the pending row for a freshly admitted repo, keeping any row
    /// that already exists.
    ///
    /// Worker callbacks may interleave with admission for the same session;
    /// insert-if-absent guarantees a terminal write is never superseded by
    /// a stale pending write.
    pub async fn insert_result_pending(&self, result: &NewResult) -> Result<(), StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO analysis_results
                        (session_id, repo_name, repo_url, success, output, analyzed_at,
                         artifact_uri, job_id, job_name)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT (session_id, repo_name) DO NOTHING",
                )
                .bind(result.session_id)
                .bind(&result.repo_name)
                .bind(&result.repo_url)
                .bind(result.success)
                .bind(&result.output)
                .bind(Utc::now().to_rfc3339())
                .bind(&result.artifact_uri)
                .bind(&result.job_id)
                .bind(&result.job_name)
                .execute(pool)
                .await?;
            }
            StorePool::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO analysis_results
                        (session_id, repo_name, repo_url, success, output, analyzed_at,
                         artifact_uri, job_id, job_name)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                     ON CONFLICT (session_id, repo_name) DO NOTHING",
                )
                .bind(result.session_id)
                .bind(&result.repo_name)
                .bind(&result.repo_url)
                .bind(result.success)
                .bind(&result.output)
                .bind(Utc::now())
                .bind(&result.artifact_uri)
                .bind(&result.job_id)
                .bind(&result.job_name)
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    /// All results for a session in insertion order. An empty vec means
    /// "exists, no results yet" — callers check session existence
    /// separately.
    pub async fn list_results(&self, session_id: i64) -> Result<Vec<AnalysisResult>, StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                let rows = sqlx::query(
                    "SELECT repo_name, repo_url, success, output, analyzed_at,
                            artifact_uri, job_id, job_name
                     FROM analysis_results
                     WHERE session_id = ?
                     ORDER BY id",
                )
                .bind(session_id)
                .fetch_all(pool)
                .await?;
                rows.into_iter()
                    .map(|r| {
                        Ok(AnalysisResult {
                            repo: r.get(0),
                            url: r.get(1),
                            success: r.get(2),
                            output: r.get(3),
                            analyzed_at: parse_rfc3339(&r.get::<String, _>(4))?,
                            artifact_uri: r.get(5),
                            job_id: r.get(6),
                            job_name: r.get(7),
                        })
                    })
                    .collect()
            }
            StorePool::Postgres(pool) => {
                let rows = sqlx::query(
                    "SELECT repo_name, repo_url, success, output, analyzed_at,
                            artifact_uri, job_id, job_name
                     FROM analysis_results
                     WHERE session_id = $1
                     ORDER BY id",
                )
                .bind(session_id)
                .fetch_all(pool)
                .await?;
                Ok(rows
                    .into_iter()
                    .map(|r| AnalysisResult {
                        repo: r.get(0),
                        url: r.get(1),
                        success: r.get(2),
                        output: r.get(3),
                        analyzed_at: r.get(4),
                        artifact_uri: r.get(5),
                        job_id: r.get(6),
                        job_name: r.get(7),
                    })
                    .collect())
            }
        }
    }

    /// Repo names with any row (pending or terminal) — the skip set for
    /// resume.
    pub async fn analyzed_repo_names(
        &self,
        session_id: i64,
    ) -> Result<HashSet<String>, StoreError> {
        let rows = match &self.pool {
            StorePool::Sqlite(pool) => {
                sqlx::query("SELECT repo_name FROM analysis_results WHERE session_id = ?")
                    .bind(session_id)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|r| r.get::<String, _>(0))
                    .collect::<Vec<String>>()
            }
            StorePool::Postgres(pool) => {
                sqlx::query("SELECT repo_name FROM analysis_results WHERE session_id = $1")
                    .bind(session_id)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|r| r.get::<String, _>(0))
                    .collect::<Vec<String>>()
            }
        };
        Ok(rows.into_iter().collect())
    }

    /// Single result lookup, used by the callback path to preserve the
    /// job name recorded on admission.
    pub async fn get_result(
        &self,
        session_id: i64,
        repo_name: &str,
    ) -> Result<Option<AnalysisResult>, StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                let row = sqlx::query(
                    "SELECT repo_name, repo_url, success, output, analyzed_at,
                            artifact_uri, job_id, job_name
                     FROM analysis_results
                     WHERE session_id = ? AND repo_name = ?",
                )
                .bind(session_id)
                .bind(repo_name)
                .fetch_optional(pool)
                .await?;
                row.map(|r| {
                    Ok(AnalysisResult {
                        repo: r.get(0),
                        url: r.get(1),
                        success: r.get(2),
                        output: r.get(3),
                        analyzed_at: parse_rfc3339(&r.get::<String, _>(4))?,
                        artifact_uri: r.get(5),
                        job_id: r.get(6),
                        job_name: r.get(7),
                    })
                })
                .transpose()
            }
            StorePool::Postgres(pool) => {
                let row = sqlx::query(
                    "SELECT repo_name, repo_url, success, output, analyzed_at,
                            artifact_uri, job_id, job_name
                     FROM analysis_results
                     WHERE session_id = $1 AND repo_name = $2",
                )
                .bind(session_id)
                .bind(repo_name)
                .fetch_optional(pool)
                .await?;
                Ok(row.map(|r| AnalysisResult {
                    repo: r.get(0),
                    url: r.get(1),
                    success: r.get(2),
                    output: r.get(3),
                    analyzed_at: r.get(4),
                    artifact_uri: r.get(5),
                    job_id: r.get(6),
                    job_name: r.get(7),
                }))
            }
        }
    }

    /// Count-then-decide admission check inside a backend-level critical
    /// section.
    ///
    /// The live in-flight count is queried from the compute backend inside
    /// the lock so concurrent callers across processes serialize on the
    /// decision. If the live count cannot be obtained the check fails
    /// closed: the observed count is reported as `max_parallel` and the
    /// slot is denied. The lock is always released before returning; the
    /// caller creates the job outside the lock.
    pub async fn acquire_slot(
        &self,
        session_id: i64,
        max_parallel: u32,
        compute: &dyn ComputeBackend,
    ) -> Result<SlotDecision, StoreError> {
        match &self.pool {
            StorePool::Sqlite(pool) => {
                let mut conn = pool.acquire().await?;
                sqlx::query("BEGIN EXCLUSIVE")
                    .execute(&mut *conn)
                    .await?;
                // No fallible store calls between here and COMMIT: the
                // counter error is folded into the decision so the
                // transaction always ends.
                let active = match compute.count_active_jobs(session_id).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(session_id, error = %e, "live job count failed; denying slot");
                        max_parallel
                    }
                };
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(SlotDecision {
                    granted: active < max_parallel,
                    active,
                })
            }
            StorePool::Postgres(pool) => {
                // Advisory locks are connection-scoped: lock and unlock must
                // run on the same pooled connection.
                let mut conn = pool.acquire().await?;
                sqlx::query("SELECT pg_advisory_lock($1, $2)")
                    .bind(SLOT_LOCK_CLASS)
                    .bind(session_id as i32)
                    .execute(&mut *conn)
                    .await?;
                let active = match compute.count_active_jobs(session_id).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(session_id, error = %e, "live job count failed; denying slot");
                        max_parallel
                    }
                };
                sqlx::query("SELECT pg_advisory_unlock($1, $2)")
                    .bind(SLOT_LOCK_CLASS)
                    .bind(session_id as i32)
                    .execute(&mut *conn)
                    .await?;
                Ok(SlotDecision {
                    granted: active < max_parallel,
                    active,
                })
            }
        }
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidTimestamp(format!("{raw}: {e}")))
}
