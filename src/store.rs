//! Tweet Window Store (component A).
//!
//! Pulls recent tweets from the relational message store into a given time
//! window. Backed by a single long-lived `sqlx::PgPool`; the pool handles
//! reconnection transparently, so a query failure here is just logged and
//! treated as "no tweets this tick" by callers.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::{instrument, warn};

use crate::{
    errors::TedError,
    model::{LocationType, Tweet},
};

/// Wraps a connection pool to the `message` table.
#[derive(Clone)]
pub struct TweetStore {
    pool: PgPool,
}

impl TweetStore {
    /// Connect to the relational store.
    pub async fn connect(database_url: &str) -> Result<TweetStore, TedError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|err| TedError::StoreError(err.into()))?;
        Ok(TweetStore { pool })
    }

    /// A reference to the underlying pool, for callers (like
    /// [`crate::reference_tables::ReferenceTables::load`]) that need to run
    /// their own queries against the same connection.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Count the tweets created in `[start, end)`, without loading them.
    /// Used by the trigger to close a bin cheaply.
    #[instrument(level = "debug", skip(self), fields(start = %start, end = %end))]
    pub async fn count_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, TedError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM message WHERE twitter_date >= $1 AND twitter_date < $2",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            warn!("tweet count query failed: {}", err);
            TedError::StoreError(err.into())
        })?;
        let n: i64 = row.try_get("n").map_err(|err| TedError::StoreError(err.into()))?;
        Ok(n.max(0) as u64)
    }

    /// Load the full tweets created in `[start, end)`, ordered by
    /// `created_at` descending, ties in insertion (row) order.
    #[instrument(level = "debug", skip(self), fields(start = %start, end = %end))]
    pub async fn tweets_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Tweet>, TedError> {
        let rows = sqlx::query(
            "SELECT id, twitter_date, text, location_string, location_type, \
                    ST_Y(location) AS lat, ST_X(location) AS lon \
             FROM message \
             WHERE twitter_date >= $1 AND twitter_date < $2 \
             ORDER BY twitter_date DESC, id ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| {
            warn!("tweet window query failed: {}", err);
            TedError::StoreError(err.into())
        })?;

        let mut tweets = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(|err| TedError::StoreError(err.into()))?;
            let created_at: DateTime<Utc> = row
                .try_get("twitter_date")
                .map_err(|err| TedError::StoreError(err.into()))?;
            let text: String =
                row.try_get("text").map_err(|err| TedError::StoreError(err.into()))?;
            let location_string: Option<String> = row
                .try_get("location_string")
                .map_err(|err| TedError::StoreError(err.into()))?;
            let location_type_tag: Option<String> = row
                .try_get("location_type")
                .map_err(|err| TedError::StoreError(err.into()))?;
            let lat: Option<f64> =
                row.try_get("lat").map_err(|err| TedError::StoreError(err.into()))?;
            let lon: Option<f64> =
                row.try_get("lon").map_err(|err| TedError::StoreError(err.into()))?;

            let location_type = match location_type_tag.as_deref() {
                Some("Location-String") => match location_string {
                    Some(s) => LocationType::LocationString(s),
                    None => LocationType::None,
                },
                Some("GeoLocation") => match (lat, lon) {
                    (Some(lat), Some(lon)) => LocationType::GeoLocation(lat, lon),
                    _ => LocationType::None,
                },
                _ => LocationType::None,
            };

            tweets.push(Tweet {
                id,
                created_at,
                text,
                location_type,
            });
        }
        Ok(tweets)
    }
}
