//! Per-user daily API call accounting.
//!
//! One `usage_daily` row per (UTC day, user). Chat reserves a call before
//! doing any work and releases it again if the model call fails, so only
//! answered calls stay counted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::now_millis;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub date: String,
    pub api_calls: i64,
    pub limit: i64,
}

/// `yyyymmdd` key of the given instant in UTC.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d").to_string()
}

pub fn today_key() -> String {
    day_key(Utc::now())
}

/// Calls recorded for `user_id` on `day`; zero when no row exists.
pub async fn api_calls(pool: &SqlitePool, user_id: &str, day: &str) -> Result<i64> {
    let row = sqlx::query("SELECT api_calls FROM usage_daily WHERE yyyymmdd = ? AND user_id = ?")
        .bind(day)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.get::<i64, _>("api_calls")).unwrap_or(0))
}

fn limit_reached(limit: i64) -> Error {
    Error::RateLimited(format!(
        "Daily limit reached ({} messages). Please try again tomorrow.",
        limit
    ))
}

/// Claim one of today's calls for `user_id`.
///
/// The check and the increment are one statement, so concurrent requests
/// can never push the counter past `limit`. Fails with
/// [`Error::RateLimited`] when no call is left.
pub async fn reserve_call(pool: &SqlitePool, user_id: &str, limit: i64) -> Result<()> {
    if limit < 1 {
        return Err(limit_reached(limit));
    }

    let result = sqlx::query(
        "INSERT INTO usage_daily (yyyymmdd, user_id, api_calls, tokens_in, tokens_out, created_at)
         VALUES (?, ?, 1, 0, 0, ?)
         ON CONFLICT(yyyymmdd, user_id) DO UPDATE SET api_calls = api_calls + 1
         WHERE usage_daily.api_calls < ?",
    )
    .bind(today_key())
    .bind(user_id)
    .bind(now_millis())
    .bind(limit)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(limit_reached(limit));
    }
    Ok(())
}

/// Give back a call reserved by [`reserve_call`] whose model call failed.
pub async fn release_call(pool: &SqlitePool, user_id: &str) {
    let result = sqlx::query(
        "UPDATE usage_daily SET api_calls = api_calls - 1
         WHERE yyyymmdd = ? AND user_id = ? AND api_calls > 0",
    )
    .bind(today_key())
    .bind(user_id)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(user_id, error = %e, "failed to release reserved call");
    }
}

/// Add token counts of a completed call to today's row.
pub async fn record_tokens(
    pool: &SqlitePool,
    user_id: &str,
    tokens_in: i64,
    tokens_out: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO usage_daily (yyyymmdd, user_id, api_calls, tokens_in, tokens_out, created_at)
         VALUES (?, ?, 0, ?, ?, ?)
         ON CONFLICT(yyyymmdd, user_id) DO UPDATE SET
            tokens_in = tokens_in + excluded.tokens_in,
            tokens_out = tokens_out + excluded.tokens_out",
    )
    .bind(today_key())
    .bind(user_id)
    .bind(tokens_in)
    .bind(tokens_out)
    .bind(now_millis())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn summary(pool: &SqlitePool, user_id: &str, limit: i64) -> Result<UsageSummary> {
    let date = today_key();
    let api_calls = api_calls(pool, user_id, &date).await?;
    Ok(UsageSummary {
        date,
        api_calls,
        limit,
    })
}
