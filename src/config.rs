use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Rate limiting is skipped when Redis is not configured or unreachable.
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub host: String,
    pub port: u16,
    pub app_base_url: String,
    // SMTP relay; email is disabled unless both credentials are set.
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from_name: String,
    pub email_log_retention_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "3600".into())
                .parse()?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            smtp_host: env::var("SMTP_HOST")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "smtp.mailersend.net".into()),
            smtp_port: env::var("SMTP_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(587),
            smtp_username: env::var("SMTP_USERNAME").ok().filter(|s| !s.is_empty()),
            smtp_password: env::var("SMTP_PASSWORD").ok().filter(|s| !s.is_empty()),
            smtp_from_name: env::var("SMTP_FROM_NAME")
                .unwrap_or_else(|_| "School Management System".into()),
            email_log_retention_days: env::var("EMAIL_LOG_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
        })
    }

    /// Where newly provisioned users are told to sign in.
    pub fn login_url(&self) -> String {
        format!("{}/auth/login", self.app_base_url.trim_end_matches('/'))
    }

    /// Settings suitable for tests and local tooling.
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            redis_url: None,
            jwt_secret: "test-secret".into(),
            jwt_expiry_seconds: 3600,
            host: "127.0.0.1".into(),
            port: 0,
            app_base_url: "http://localhost:3000".into(),
            smtp_host: "smtp.mailersend.net".into(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from_name: "School Management System".into(),
            email_log_retention_days: 30,
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
