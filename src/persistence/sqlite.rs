//! SQLite implementation of the tracking store.
//!
//! Pool-level methods serve the API. The recorder's queries take a
//! `&mut SqliteConnection` so they run inside the caller's transaction.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{QueryBuilder, Sqlite, Transaction};

use super::models::{
    EmailOpenSummary, NewHeartbeat, NewOpenEvent, OPEN_EVENT_COLUMNS, OpenEvent, TrackedEmail,
    TrackedEmailRow, from_millis,
};
use crate::domain::{EmailId, HitFingerprint, PriorHit, TrackingPayload};
use crate::error::TrackerError;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const UPSERT_TRACKED_EMAIL: &str = "\
    INSERT INTO tracked_emails \
        (email_id, user_id, recipient, sender_email, sent_at_ms, open_count, created_at_ms) \
    VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6) \
    ON CONFLICT (email_id) DO UPDATE SET \
        user_id = excluded.user_id, \
        recipient = excluded.recipient, \
        sender_email = COALESCE(NULLIF(excluded.sender_email, ''), tracked_emails.sender_email), \
        sent_at_ms = excluded.sent_at_ms";

/// SQLite-backed store using `sqlx::SqlitePool`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wraps an existing pool. Does not run migrations.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `url` in WAL mode and
    /// applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] if the URL is invalid,
    /// the file cannot be opened, or a migration fails.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self, TrackerError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(busy_timeout)
            .foreign_keys(true);

        let parent = options
            .get_filename()
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                TrackerError::PersistenceFailure(format!("cannot create {}: {e}", dir.display()))
            })?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database, for tests.
    ///
    /// Every SQLite connection to `:memory:` is its own database, so the
    /// pool holds exactly one connection that never expires.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] if the connection or a
    /// migration fails.
    pub async fn in_memory() -> Result<Self, TrackerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Applies embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] on migration failure.
    pub async fn migrate(&self) -> Result<(), TrackerError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trips a trivial query.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] when the database is
    /// unreachable.
    pub async fn ping(&self) -> Result<(), TrackerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] if no connection is
    /// available.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, TrackerError> {
        Ok(self.pool.begin().await?)
    }

    /// Registers a message at issue time.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] on database failure.
    pub async fn register(
        &self,
        payload: &TrackingPayload,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let mut conn = self.pool.acquire().await?;
        upsert_tracked_email(&mut conn, payload, now).await
    }

    /// Appends a heartbeat to the audit table.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] on database failure.
    pub async fn insert_heartbeat(&self, beat: &NewHeartbeat<'_>) -> Result<i64, TrackerError> {
        let result = sqlx::query(
            "INSERT INTO sender_heartbeats \
                 (email_id, user_id, sender_email, seen_at_ms, ip_address, user_agent) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(beat.payload.email_id.as_str())
        .bind(&beat.payload.user_id)
        .bind(beat.payload.sender_email.as_deref())
        .bind(beat.seen_at.timestamp_millis())
        .bind(beat.ip_address)
        .bind(beat.user_agent)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Open totals for `email_ids`, in request order with repeats removed.
    /// Ids the store has never seen come back with zero counts.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] on database failure.
    pub async fn aggregated_counts(
        &self,
        email_ids: &[EmailId],
    ) -> Result<Vec<EmailOpenSummary>, TrackerError> {
        let mut wanted: Vec<&EmailId> = Vec::with_capacity(email_ids.len());
        for id in email_ids {
            if !wanted.contains(&id) {
                wanted.push(id);
            }
        }
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
            "SELECT t.email_id, t.open_count, \
                 (SELECT COUNT(*) FROM open_events e WHERE e.email_id = t.email_id), \
                 (SELECT MIN(e.opened_at_ms) FROM open_events e WHERE e.email_id = t.email_id \
                     AND e.is_duplicate = 0 AND e.is_sender_suppressed = 0), \
                 (SELECT MAX(e.opened_at_ms) FROM open_events e WHERE e.email_id = t.email_id \
                     AND e.is_duplicate = 0 AND e.is_sender_suppressed = 0) \
             FROM tracked_emails t WHERE t.email_id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in &wanted {
            separated.push_bind(id.to_string());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<(String, i64, i64, Option<i64>, Option<i64>)>()
            .fetch_all(&self.pool)
            .await?;

        Ok(wanted
            .into_iter()
            .map(|id| {
                rows.iter()
                    .find(|(row_id, ..)| row_id == id.as_str())
                    .map_or_else(
                        || EmailOpenSummary::unknown(id.to_string()),
                        |(email_id, open_count, total_hits, first, last)| EmailOpenSummary {
                            email_id: email_id.clone(),
                            open_count: *open_count,
                            opened: *open_count > 0,
                            total_hits: *total_hits,
                            first_opened_at: first.map(from_millis),
                            last_opened_at: last.map(from_millis),
                        },
                    )
            })
            .collect())
    }

    /// Every tracked message, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] on database failure.
    pub async fn list_emails(&self) -> Result<Vec<TrackedEmail>, TrackerError> {
        let rows = sqlx::query_as::<_, TrackedEmailRow>(
            "SELECT email_id, user_id, recipient, sender_email, sent_at_ms, open_count, \
                 created_at_ms \
             FROM tracked_emails ORDER BY created_at_ms DESC, email_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TrackedEmail::from).collect())
    }

    /// Loads one message row.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] on database failure.
    pub async fn find_email(&self, email_id: &EmailId) -> Result<Option<TrackedEmail>, TrackerError> {
        let row = sqlx::query_as::<_, TrackedEmailRow>(
            "SELECT email_id, user_id, recipient, sender_email, sent_at_ms, open_count, \
                 created_at_ms \
             FROM tracked_emails WHERE email_id = ?1",
        )
        .bind(email_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TrackedEmail::from))
    }

    /// Recorded fetches, newest first, optionally for one message.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::PersistenceFailure`] on database failure.
    pub async fn list_open_events(
        &self,
        email_id: Option<&EmailId>,
    ) -> Result<Vec<OpenEvent>, TrackerError> {
        let filter = if email_id.is_some() {
            "WHERE email_id = ?1 "
        } else {
            ""
        };
        let sql = format!(
            "SELECT {OPEN_EVENT_COLUMNS} FROM open_events {filter}ORDER BY opened_at_ms DESC, id DESC"
        );

        let mut query = sqlx::query_as::<_, OpenEvent>(&sql);
        if let Some(id) = email_id {
            query = query.bind(id.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows)
    }
}

/// Ensures the `tracked_emails` row exists and refreshes its identity
/// fields. `open_count` is never touched; a blank sender never overwrites a
/// known one.
///
/// # Errors
///
/// Returns [`TrackerError::PersistenceFailure`] on database failure.
pub async fn upsert_tracked_email(
    conn: &mut SqliteConnection,
    payload: &TrackingPayload,
    now: DateTime<Utc>,
) -> Result<(), TrackerError> {
    sqlx::query(UPSERT_TRACKED_EMAIL)
        .bind(payload.email_id.as_str())
        .bind(&payload.user_id)
        .bind(&payload.recipient)
        .bind(payload.sender_email.as_deref())
        .bind(payload.sent_at.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Committed fetches of `email_id` with `opened_at >= from`, newest first.
///
/// There is no upper bound: a row stamped after the caller's hit but
/// committed before it still belongs to the window.
///
/// # Errors
///
/// Returns [`TrackerError::PersistenceFailure`] on database failure.
pub async fn hits_since(
    conn: &mut SqliteConnection,
    email_id: &EmailId,
    from: DateTime<Utc>,
) -> Result<Vec<PriorHit>, TrackerError> {
    let rows = sqlx::query_as::<_, (i64, i64, Option<String>, Option<String>)>(
        "SELECT id, opened_at_ms, ip_address, user_agent FROM open_events \
         WHERE email_id = ?1 AND opened_at_ms >= ?2 \
         ORDER BY opened_at_ms DESC, id DESC",
    )
    .bind(email_id.as_str())
    .bind(from.timestamp_millis())
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, opened_at_ms, ip_address, user_agent)| PriorHit {
            id,
            opened_at: from_millis(opened_at_ms),
            ip_address,
            user_agent,
        })
        .collect())
}

/// Whether a fetch of `email_id` with exactly this fingerprint was recorded
/// at or before `boundary`. Absent address or agent compare as empty.
///
/// # Errors
///
/// Returns [`TrackerError::PersistenceFailure`] on database failure.
pub async fn fingerprint_seen_at_or_before(
    conn: &mut SqliteConnection,
    email_id: &EmailId,
    hit: &HitFingerprint,
    boundary: DateTime<Utc>,
) -> Result<bool, TrackerError> {
    let seen = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM open_events \
             WHERE email_id = ?1 \
               AND IFNULL(ip_address, '') = IFNULL(?2, '') \
               AND IFNULL(user_agent, '') = IFNULL(?3, '') \
               AND opened_at_ms <= ?4)",
    )
    .bind(email_id.as_str())
    .bind(hit.ip_address.as_deref())
    .bind(hit.user_agent.as_deref())
    .bind(boundary.timestamp_millis())
    .fetch_one(&mut *conn)
    .await?;
    Ok(seen)
}

/// Appends one fetch to the audit log and returns its id.
///
/// # Errors
///
/// Returns [`TrackerError::PersistenceFailure`] on database failure.
pub async fn insert_open_event(
    conn: &mut SqliteConnection,
    event: &NewOpenEvent<'_>,
) -> Result<i64, TrackerError> {
    let result = sqlx::query(
        "INSERT INTO open_events ( \
             email_id, user_id, recipient, opened_at_ms, ip_address, user_agent, \
             geo_country, geo_region, geo_city, latitude, longitude, device_type, \
             is_duplicate, is_sender_suppressed, suppression_reason) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
    )
    .bind(event.payload.email_id.as_str())
    .bind(&event.payload.user_id)
    .bind(&event.payload.recipient)
    .bind(event.opened_at.timestamp_millis())
    .bind(event.ip_address)
    .bind(event.user_agent)
    .bind(event.geo.geo_country.as_deref())
    .bind(event.geo.geo_region.as_deref())
    .bind(event.geo.geo_city.as_deref())
    .bind(event.geo.latitude)
    .bind(event.geo.longitude)
    .bind(event.device_type.as_str())
    .bind(event.classification.is_duplicate)
    .bind(event.classification.is_sender_suppressed)
    .bind(event.classification.reason.map(|r| r.as_str()))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Adds one genuine open.
///
/// # Errors
///
/// Returns [`TrackerError::PersistenceFailure`] on database failure.
pub async fn increment_open_count(
    conn: &mut SqliteConnection,
    email_id: &EmailId,
) -> Result<(), TrackerError> {
    sqlx::query("UPDATE tracked_emails SET open_count = open_count + 1 WHERE email_id = ?1")
        .bind(email_id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Current genuine-open counter, zero for an unknown message.
///
/// # Errors
///
/// Returns [`TrackerError::PersistenceFailure`] on database failure.
pub async fn open_count(conn: &mut SqliteConnection, email_id: &EmailId) -> Result<i64, TrackerError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT open_count FROM tracked_emails WHERE email_id = ?1",
    )
    .bind(email_id.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(count.unwrap_or(0))
}
