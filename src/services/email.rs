use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::services::templates::EmailTemplate;

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl OutgoingEmail {
    pub fn new(to: &str, template: EmailTemplate) -> Self {
        Self {
            to: to.to_string(),
            subject: template.subject,
            html: template.html,
            text: template.text,
        }
    }
}

/// Outbound email transport. Returns the provider message id.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<String>;
}

pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailService {
    /// Returns None unless both SMTP credentials are configured.
    pub fn new(config: &Config) -> Option<Self> {
        let username = config.smtp_username.clone()?;
        let password = config.smtp_password.clone()?;

        // The relay authenticates with the sender address.
        let from = Mailbox::new(Some(config.smtp_from_name.clone()), username.parse().ok()?);
        let creds = Credentials::new(username, password);

        let transport = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .ok()?
                .port(config.smtp_port)
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .ok()?
                .port(config.smtp_port)
                .credentials(creds)
                .build()
        };

        Some(Self { transport, from })
    }

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }
}

#[async_trait]
impl Mailer for EmailService {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<String> {
        let message_id = self.new_message_id();
        let to: Mailbox = email
            .to
            .parse()
            .with_context(|| format!("Invalid recipient address: {}", email.to))?;

        let message = Message::builder()
            .message_id(Some(message_id.clone()))
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html),
                    ),
            )
            .context("Failed to build email message")?;

        self.transport
            .send(message)
            .await
            .context("Failed to send email")?;

        Ok(message_id)
    }
}

/// Mailer that keeps every message in memory. Addresses listed in
/// `failing` are rejected.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, address: &str) {
        self.failing.lock().push(address.to_lowercase());
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<OutgoingEmail> {
        self.sent
            .lock()
            .iter()
            .filter(|e| e.to.eq_ignore_ascii_case(address))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<String> {
        if self.failing.lock().contains(&email.to.to_lowercase()) {
            anyhow::bail!("Mailbox unavailable: {}", email.to);
        }
        self.sent.lock().push(email);
        Ok(format!("<{}@test.local>", Uuid::new_v4()))
    }
}
