/// One-shot expiry notification: message construction and SMTP delivery.
///
/// Delivery is at-most-once and best effort. The chain is the source of truth,
/// so a failed send is reported and then left alone.
use alloy::primitives::Address;
use crate::config::Settings;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::future::Future;

/// Subject line of the expiry email.
pub const TRIGGERED_SUBJECT: &str = "🚨 SecureLife Vault: Dead Man's Switch Triggered";

/// A message ready to hand to a [`NotificationSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub subject: String,
    pub body: String,
}

impl NotificationMessage {
    /// Build the expiry notice from the poll that confirmed expiry.
    pub fn expired(contract: &Address, last_active: i64, expired_at: i64) -> Self {
        let body = format!(
            "The inactivity period for your SecureLife Vault has expired.\n\
             \n\
             Contract Address: {contract}\n\
             Last Active: {}\n\
             Expired At: {}\n\
             \n\
             The beneficiary can now claim the funds.\n",
            format_timestamp(last_active),
            format_timestamp(expired_at),
        );
        Self {
            subject: TRIGGERED_SUBJECT.to_string(),
            body,
        }
    }
}

/// `2024-01-01 00:00:00 UTC (1704067200)`, or just the raw seconds when the
/// value lies outside chrono's range.
fn format_timestamp(secs: i64) -> String {
    match DateTime::<Utc>::from_timestamp(secs, 0) {
        Some(dt) => format!("{} ({secs})", dt.format("%Y-%m-%d %H:%M:%S UTC")),
        None => format!("{secs}"),
    }
}

/// Errors from a single send attempt.
#[derive(Debug)]
pub enum SendError {
    /// A sender or recipient address could not be parsed.
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    /// The message could not be assembled.
    Build { source: lettre::error::Error },
    /// Connect, STARTTLS, login, or submission failed.
    Transport {
        source: lettre::transport::smtp::Error,
    },
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Address { address, source } => {
                write!(f, "invalid email address {:?}: {}", address, source)
            }
            SendError::Build { source } => write!(f, "failed to build email: {}", source),
            SendError::Transport { source } => write!(f, "SMTP delivery failed: {}", source),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendError::Address { source, .. } => Some(source),
            SendError::Build { source } => Some(source),
            SendError::Transport { source } => Some(source),
        }
    }
}

/// Destination for the expiry notification.
pub trait NotificationSink {
    /// Make exactly one delivery attempt.
    fn send(
        &self,
        message: &NotificationMessage,
    ) -> impl Future<Output = Result<(), SendError>> + Send;
}

/// Sends through an authenticated SMTP submission server using STARTTLS.
pub struct SmtpSink {
    host: String,
    port: u16,
    credentials: Credentials,
    from: String,
    to: String,
}

impl SmtpSink {
    pub fn new(settings: &Settings) -> Self {
        Self {
            host: settings.smtp.host.clone(),
            port: settings.smtp.port,
            credentials: Credentials::new(
                settings.smtp.username.clone(),
                settings.smtp.password.clone(),
            ),
            from: settings.smtp.username.clone(),
            to: settings.beneficiary.clone(),
        }
    }

    /// Recipient of every message this sink sends.
    pub fn recipient(&self) -> &str {
        &self.to
    }

    fn build(&self, message: &NotificationMessage) -> Result<Message, SendError> {
        Message::builder()
            .from(parse_mailbox(&self.from)?)
            .to(parse_mailbox(&self.to)?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| SendError::Build { source: e })
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
    address.parse().map_err(|e| SendError::Address {
        address: address.to_string(),
        source: e,
    })
}

impl NotificationSink for SmtpSink {
    async fn send(&self, message: &NotificationMessage) -> Result<(), SendError> {
        let email = self.build(message)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| SendError::Transport { source: e })?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build();

        tracing::debug!(host = %self.host, port = self.port, to = %self.to, "submitting email");
        transport
            .send(email)
            .await
            .map_err(|e| SendError::Transport { source: e })?;
        Ok(())
    }
}
