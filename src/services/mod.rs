pub mod attendance;
pub mod auth;
pub mod cron;
pub mod dashboard;
pub mod email;
pub mod metrics;
pub mod navigation;
pub mod pipeline;
pub mod session;
pub mod templates;
