use axum::{http::StatusCode, Json};
use serde_json::json;

/// Checks a rate limit stored in Redis.
///
/// Uses the INCR + EXPIRE strategy:
/// - Increments a counter for `key`
/// - On first increment, sets TTL to `window_secs`
/// - Returns 429 if counter exceeds `max_attempts`
///
/// Without a Redis connection the check is skipped.
pub async fn check_rate_limit(
    redis: Option<&redis::aio::MultiplexedConnection>,
    key: &str,
    max_attempts: u64,
    window_secs: u64,
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let Some(conn) = redis else {
        return Ok(());
    };
    // Multiplexed connections are cheap handles onto one socket.
    let mut conn = conn.clone();

    let count: u64 = match redis::cmd("INCR").arg(key).query_async(&mut conn).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("Rate limit check skipped for {key}: {e}");
            return Ok(());
        }
    };

    if count == 1 {
        // Set TTL only on first increment to avoid resetting the window on each attempt
        let _: Result<(), _> = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs)
            .query_async(&mut conn)
            .await;
    }

    if count > max_attempts {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many attempts. Please try again in a few minutes." })),
        ));
    }

    Ok(())
}

/// Key for an email-scoped limit, e.g. `rl:sign_in:jane@x.com`.
pub fn email_key(action: &str, email: &str) -> String {
    format!("rl:{action}:{}", email.trim().to_lowercase())
}
