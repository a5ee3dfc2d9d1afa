//! Resource email over SMTP.
//!
//! The worker mails a project's owner when its analysis finishes or fails.
//! Mail is only configured when `SMTP_HOST` is set; without it the binaries
//! run with no mailer and [`Notifier`](crate::Notifier) drops every message.

use alaska_core::config::{env_or, env_parse, ConfigError};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Could not build message: {0}")]
    Message(#[from] lettre::error::Error),
}

/// One HTML message to a project owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEmail {
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
}

impl ResourceEmail {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            html_body: html_body.into(),
        }
    }

    /// Owners without an email on file are stored as a bare name.
    pub fn has_valid_recipient(&self) -> bool {
        self.recipient.contains('@')
    }
}

/// Escape text for inclusion in an HTML body.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// SMTP settings.
///
/// | Variable        | Default                |
/// |-----------------|------------------------|
/// | `SMTP_HOST`     | unset disables mail    |
/// | `SMTP_PORT`     | `587`                  |
/// | `SMTP_FROM`     | `noreply@alaska.local` |
/// | `SMTP_USER`     |                        |
/// | `SMTP_PASSWORD` |                        |
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(smtp_host) = std::env::var("SMTP_HOST") else {
            return Ok(None);
        };
        Ok(Some(Self {
            smtp_host,
            smtp_port: env_parse("SMTP_PORT", 587)?,
            from_address: env_or("SMTP_FROM", "noreply@alaska.local"),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        }))
    }
}

/// STARTTLS mailer; the transport is built once and reused per message.
pub struct EmailDelivery {
    from: lettre::message::Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailDelivery {
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);
        if let (Some(user), Some(password)) = (config.smtp_user, config.smtp_password) {
            builder = builder.credentials(Credentials::new(user, password));
        }
        Ok(Self {
            from: config.from_address.parse()?,
            transport: builder.build(),
        })
    }

    pub fn message(&self, email: &ResourceEmail) -> Result<Message, EmailError> {
        Ok(Message::builder()
            .from(self.from.clone())
            .to(email.recipient.parse()?)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())?)
    }

    pub async fn deliver(&self, email: &ResourceEmail) -> Result<(), EmailError> {
        let message = self.message(email)?;
        self.transport.send(message).await?;
        tracing::info!(to = %email.recipient, subject = %email.subject, "Resource email sent");
        Ok(())
    }
}
