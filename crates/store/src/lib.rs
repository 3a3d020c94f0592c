//! Authoritative relational state: scrap rows, classifier patterns,
//! chunk back-references, and the schema migration bootstrap.

use chrono::{DateTime, Utc};
use models::{Pattern, Scrap, ScrapState};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::Row;

pub mod migrations;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database query failed")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid scrap row")]
    State(#[from] models::UnknownState),
    #[error("failed to read migrations directory '{path}'")]
    MigrationsDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("migration '{filename}' failed")]
    Migration {
        filename: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Handle over the shared Postgres pool. Cloning is cheap and every
/// clone uses the same pool; isolation is per-connection.
#[derive(Clone)]
pub struct Store {
    pool: sqlx::PgPool,
}

impl Store {
    /// Connect a pool sized for the full collector + processor fan-out.
    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert a new scrap row and return its id. `scrape_time` is always
    /// NOW(); `processing_start_time` is set only when inserting at
    /// PROCESSING. The legacy `content` column stays null.
    pub async fn save_scrap_reference(
        &self,
        scrap: &Scrap,
        state: ScrapState,
    ) -> Result<i64, Error> {
        let processing_start_time: Option<DateTime<Utc>> = match state {
            ScrapState::Processing => Some(Utc::now()),
            _ => None,
        };

        let row = sqlx::query(
            r#"
            INSERT INTO scrapes
                (hash, source, filename, scrape_time, file_path, state,
                 timestamp, processing_start_time, occurrence_time)
            VALUES ($1, $2, $3, NOW(), $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&scrap.hash)
        .bind(&scrap.source)
        .bind(&scrap.filename)
        .bind(&scrap.file_path)
        .bind(state.as_str())
        .bind(scrap.timestamp)
        .bind(processing_start_time)
        .bind(scrap.occurrence_time)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            tracing::error!(hash = ?scrap.hash, ?err, "failed to save scrap reference");
            err
        })?;

        let id: i64 = row.get(0);
        tracing::info!(id, hash = ?scrap.hash, state = %state, "saved scrap reference");
        Ok(id)
    }

    /// Unconditional state write; the sink for every terminal transition.
    pub async fn update_scrap_state(&self, id: i64, state: ScrapState) -> Result<(), Error> {
        sqlx::query("UPDATE scrapes SET state = $1 WHERE id = $2")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                tracing::error!(id, state = %state, ?err, "failed to update scrap state");
                err
            })?;

        tracing::info!(id, state = %state, "updated scrap state");
        Ok(())
    }

    pub async fn update_scrap_class(&self, id: i64, class: &str) -> Result<(), Error> {
        sqlx::query("UPDATE scrapes SET class = $1 WHERE id = $2")
            .bind(class)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|err| {
                tracing::error!(id, class, ?err, "failed to update scrap class");
                err
            })?;

        tracing::info!(id, class, "updated scrap class");
        Ok(())
    }

    /// Fetch one scrap, typically to recover a hash the in-memory copy lost.
    pub async fn get_scrap_by_id(&self, id: i64) -> Result<Option<Scrap>, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, hash, source, filename, file_path, state,
                   timestamp, occurrence_time, class
            FROM scrapes
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(scrap_from_row).transpose()
    }

    /// Rows still in NEW or PROCESSING, for startup reaping / replay.
    pub async fn get_unprocessed_scraps(&self) -> Result<Vec<Scrap>, Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, hash, source, filename, file_path, state,
                   timestamp, occurrence_time, class
            FROM scrapes
            WHERE state IN ('NEW', 'PROCESSING')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(scrap_from_row).collect()
    }

    /// Filenames currently mid-flight, so collectors can avoid
    /// re-ingesting files another process already picked up.
    pub async fn get_processing_filenames(&self) -> Result<Vec<String>, Error> {
        let rows = sqlx::query("SELECT filename FROM scrapes WHERE state = 'PROCESSING'")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    pub async fn get_classifier_patterns(&self) -> Result<Vec<Pattern>, Error> {
        let rows = sqlx::query("SELECT pattern, class FROM classifier_patterns")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Pattern {
                pattern: row.get(0),
                class: row.get(1),
            })
            .collect())
    }

    /// True iff any row with this hash already reached PROCESSED.
    pub async fn is_hash_processed(&self, hash: &str) -> Result<bool, Error> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM scrapes
                WHERE hash = $1 AND state = 'PROCESSED'
            )
            "#,
        )
        .bind(hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get(0))
    }

    /// Record the back-reference of an indexed chunk. Upserts on the
    /// `(scrap_id, chunk_number)` natural key so re-attempts after a
    /// partial save stay idempotent.
    pub async fn save_elastic_chunk(
        &self,
        scrap_id: i64,
        chunk_number: u32,
        elastic_id: &str,
        title: &str,
    ) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO elastic_chunks (scrap_id, chunk_number, elastic_id, title)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (scrap_id, chunk_number)
                DO UPDATE SET elastic_id = EXCLUDED.elastic_id, title = EXCLUDED.title
            RETURNING id
            "#,
        )
        .bind(scrap_id)
        .bind(chunk_number as i32)
        .bind(elastic_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            tracing::error!(scrap_id, chunk_number, ?err, "failed to save elastic chunk");
            err
        })?;

        Ok(row.get(0))
    }

    /// Startup reaper: drop rows stuck in PROCESSING so their files are
    /// collected fresh on the next pass.
    pub async fn delete_processing_scraps(&self) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM scrapes WHERE state = 'PROCESSING'")
            .execute(&self.pool)
            .await?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            tracing::info!(reaped, "deleted scraps stuck in PROCESSING");
        }
        Ok(reaped)
    }
}

fn scrap_from_row(row: sqlx::postgres::PgRow) -> Result<Scrap, Error> {
    let state: String = row.get("state");
    Ok(Scrap {
        id: Some(row.get("id")),
        hash: row.get("hash"),
        source: row.get("source"),
        filename: row.get("filename"),
        file_path: row.get("file_path"),
        state: state.parse::<ScrapState>()?,
        timestamp: row.get("timestamp"),
        occurrence_time: row.get("occurrence_time"),
        class: row.get("class"),
    })
}
