pub mod announcement;
pub mod attendance;
pub mod auth;
pub mod class;
pub mod email_log;
pub mod tenant;
pub mod user;
