use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::sync::Mutex;
use std::time::Duration;

use super::notifier::Notification;
use crate::config::SmtpConfig;

/// Delivers one notification over the wire.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    mailer: SmtpTransport,
    from_email: String,
    message_id_domain: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, anyhow::Error> {
        let mut builder = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)));

        if !config.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.user.clone(),
                config.password.expose_secret().clone(),
            ));
        }

        let message_id_domain = config
            .from
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim_end_matches('>').to_string())
            .unwrap_or_else(|| "localhost".to_string());

        tracing::info!(host = %config.host, port = config.port, "SMTP mailer initialized");

        Ok(Self {
            mailer: builder.build(),
            from_email: config.from.clone(),
            message_id_domain,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(self.from_email.parse()?)
            .to(notification.recipient.parse()?)
            .subject(notification.subject.clone())
            .message_id(Some(format!(
                "<{}@{}>",
                notification.message_id, self.message_id_domain
            )))
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())?;

        // Send email in blocking thread pool to avoid blocking async runtime
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| anyhow::anyhow!("Mail task failed: {}", e))?
            .map_err(|e| anyhow::anyhow!("SMTP send failed: {}", e))?;

        Ok(())
    }
}

/// Records deliveries; optionally fails the first `n` attempts.
pub struct MockMailer {
    delivered: Mutex<Vec<Notification>>,
    attempts: Mutex<usize>,
    failures_left: Mutex<usize>,
}

impl Default for MockMailer {
    fn default() -> Self {
        Self::failing_times(0)
    }
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_times(n: usize) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
            failures_left: Mutex::new(n),
        }
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().map(|a| *a).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        *self
            .attempts
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock mailer mutex poisoned: {}", e))? += 1;

        {
            let mut failures_left = self
                .failures_left
                .lock()
                .map_err(|e| anyhow::anyhow!("Mock mailer mutex poisoned: {}", e))?;
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(anyhow::anyhow!("simulated SMTP failure"));
            }
        }

        self.delivered
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock mailer mutex poisoned: {}", e))?
            .push(notification.clone());
        Ok(())
    }
}
