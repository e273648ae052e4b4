// Library exports for binary tools and tests
pub mod config;
pub mod db;
pub mod error;
pub mod forms;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use config::Config;
use services::{
    auth::TokenSettings,
    dashboard::MemberKind,
    email::Mailer,
    pipeline::Pipeline,
    session::SessionContext,
};
use store::{IdentityProvider, Store};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub identity: Arc<dyn IdentityProvider>,
    pub pipeline: Arc<Pipeline>,
    /// Only used for rate limiting.
    pub redis: Option<redis::aio::MultiplexedConnection>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityProvider>,
        mailer: Option<Arc<dyn Mailer>>,
        redis: Option<redis::aio::MultiplexedConnection>,
        config: Arc<Config>,
    ) -> Self {
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            identity.clone(),
            mailer,
            config.login_url(),
        ));
        Self {
            store,
            identity,
            pipeline,
            redis,
            config,
        }
    }

    pub fn tokens(&self) -> TokenSettings {
        TokenSettings::from_config(&self.config)
    }

    /// A fresh session context over this state's store and identity provider.
    pub fn session(&self) -> SessionContext {
        SessionContext::new(self.store.clone(), self.identity.clone(), self.tokens())
    }
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Auth
        .route("/auth/sign-up", post(routes::auth::sign_up))
        .route("/auth/sign-in", post(routes::auth::sign_in))
        .route("/auth/sign-out", post(routes::auth::sign_out))
        .route("/auth/me", get(routes::auth::me))
        .route("/auth/profile", put(routes::auth::update_profile))
        .route("/ws/session", get(routes::websocket::session_ws))
        // School
        .route("/school", get(routes::school::get_school).put(routes::school::update_school))
        .route("/navigation", get(routes::navigation::get_navigation))
        // Classes
        .route("/classes", get(routes::classes::list_classes).post(routes::classes::create_class))
        .route("/classes/{id}", put(routes::classes::update_class).delete(routes::classes::deactivate_class))
        // Attendance
        .route("/attendance", get(routes::attendance::get_sheet).put(routes::attendance::save_sheet))
        // Announcements
        .route("/announcements", get(routes::announcements::list_announcements).post(routes::announcements::create_announcement))
        .route("/announcements/{id}", put(routes::announcements::update_announcement).delete(routes::announcements::delete_announcement))
        // Email
        .route("/functions/password-reset-email", post(routes::functions::password_reset_email))
        .route("/functions/bulk-notification-email", post(routes::functions::bulk_notification_email))
        .route("/email-logs", get(routes::email_logs::list_email_logs));

    // Students, teachers, parents, staff
    for kind in MemberKind::ALL {
        app = app.nest(kind.path(), routes::members::router(kind));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}
