//! Email log retention.
//! Schedule: daily at 2 AM UTC, plus the `purge-email-logs` binary for
//! one-off runs. Safe to run at any frequency.

use std::sync::Arc;

use chrono::{Duration, Timelike, Utc};
use tracing::{info, warn};

use crate::services::metrics::EMAIL_LOGS_PURGED;
use crate::store::{Store, StoreResult};

/// Rows removed per delete statement.
pub const PURGE_BATCH_SIZE: usize = 500;
const PURGE_HOUR_UTC: u32 = 2;

pub struct CronService;

impl CronService {
    /// Deletes log entries older than `retention_days`, one batch at a time,
    /// until a batch comes back short. Returns the number removed.
    pub async fn purge_email_logs(
        store: &dyn Store,
        retention_days: i64,
        batch_size: usize,
    ) -> StoreResult<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let batch_size = batch_size.max(1);
        let mut total = 0;

        loop {
            let deleted = store.delete_email_logs_before(cutoff, batch_size).await?;
            total += deleted;
            EMAIL_LOGS_PURGED.inc_by(deleted as u64);
            if deleted < batch_size {
                break;
            }
        }

        if total > 0 {
            info!("Purged {total} email logs older than {retention_days} days");
        }
        Ok(total)
    }
}

/// Spawn a background task that wakes up daily at 2:00 AM UTC and purges
/// expired email logs.
pub fn start(store: Arc<dyn Store>, retention_days: i64) {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let secs_today = now.hour() * 3600 + now.minute() * 60 + now.second();
            let target_secs = PURGE_HOUR_UTC * 3600;
            let wait = if secs_today < target_secs {
                target_secs - secs_today
            } else {
                86400 - secs_today + target_secs
            };
            tokio::time::sleep(tokio::time::Duration::from_secs(wait as u64)).await;

            if let Err(e) =
                CronService::purge_email_logs(store.as_ref(), retention_days, PURGE_BATCH_SIZE).await
            {
                warn!("Email log purge failed: {e}");
            }
        }
    });
}
