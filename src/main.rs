use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use redis::Client as RedisClient;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use school_api::{
    build_router,
    config::Config,
    db::{self, PgIdentity, PgStore},
    services::{
        cron,
        email::{EmailService, Mailer},
        pipeline,
    },
    store::{IdentityProvider, Store},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let identity: Arc<dyn IdentityProvider> = Arc::new(PgIdentity::new(pool));

    let redis = match &config.redis_url {
        Some(url) => match connect_redis(url).await {
            Ok(conn) => {
                info!("Redis connected");
                Some(conn)
            }
            Err(e) => {
                warn!("Redis unavailable, rate limiting disabled: {e}");
                None
            }
        },
        None => None,
    };

    let mailer: Option<Arc<dyn Mailer>> = match EmailService::new(&config) {
        Some(svc) => {
            info!("SMTP email service configured");
            Some(Arc::new(svc))
        }
        None => {
            info!("SMTP not configured, outbound email will be logged as failed");
            None
        }
    };

    let state = AppState::new(store.clone(), identity, mailer, redis, config.clone());

    pipeline::start(state.pipeline.clone());
    cron::start(store, config.email_log_retention_days);

    // Allow the app base URL; localhost is always allowed for development.
    let base = config.app_base_url.trim_end_matches('/').to_string();
    let cors_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(o) = origin.to_str() else {
            return false;
        };
        o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") || o == base
    });
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(cors_origin);

    let app = build_router(state).layer(cors);

    let addr = format!("{}:{}", config.host, config.port);
    info!("School API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn connect_redis(url: &str) -> anyhow::Result<redis::aio::MultiplexedConnection> {
    let client = RedisClient::open(url)?;
    Ok(client.get_multiplexed_async_connection().await?)
}
