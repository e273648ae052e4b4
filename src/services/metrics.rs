use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

lazy_static! {
    // ── Event counters ──────────────────────────────────────────────────────
    pub static ref SIGN_INS_COUNTER: CounterVec = register_counter_vec!(
        "api_sign_ins_total",
        "Sign-in attempts by status",
        &["status"]
    ).unwrap();

    pub static ref SIGN_UPS_COUNTER: CounterVec = register_counter_vec!(
        "api_sign_ups_total",
        "Self-service registrations by status",
        &["status"]
    ).unwrap();

    pub static ref EMAILS_COUNTER: CounterVec = register_counter_vec!(
        "api_emails_total",
        "Outbound emails by category and outcome",
        &["category", "outcome"]
    ).unwrap();

    pub static ref PROVISIONING_COUNTER: CounterVec = register_counter_vec!(
        "api_account_provisioning_total",
        "Login provisioning for admin-created users by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref EMAIL_LOGS_PURGED: IntCounter = register_int_counter!(
        "api_email_logs_purged_total",
        "Email log entries removed by the retention job"
    ).unwrap();
}

pub fn record_email(category: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    EMAILS_COUNTER.with_label_values(&[category, outcome]).inc();
}
