//! Purge email log entries past their retention period.
//! The API server runs the same job daily at 2 AM UTC; this is for one-off
//! runs (e.g. via cron job: 0 2 * * * /app/purge-email-logs).
//!
//! Usage: purge-email-logs [--retention-days N] [--batch-size N]

use clap::Parser;

use school_api::{
    config::Config,
    db::{self, PgStore},
    services::cron::{CronService, PURGE_BATCH_SIZE},
};

#[derive(Parser)]
#[command(name = "purge-email-logs", about = "Delete email logs older than the retention period")]
struct Args {
    /// Days to keep (defaults to EMAIL_LOG_RETENTION_DAYS, or 30)
    #[arg(long)]
    retention_days: Option<i64>,

    /// Rows deleted per statement
    #[arg(long, default_value_t = PURGE_BATCH_SIZE)]
    batch_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let retention_days = args.retention_days.unwrap_or(config.email_log_retention_days);

    let pool = db::create_pool(&config.database_url).await?;
    let store = PgStore::new(pool);

    tracing::info!("Purging email logs older than {retention_days} days...");
    let removed = CronService::purge_email_logs(&store, retention_days, args.batch_size).await?;
    tracing::info!("Done: {removed} entries removed");

    Ok(())
}
