use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, error, info};

use crate::config::Config;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_plain(&self, to: &str, subject: &str, body: &str) -> Result<(), Error>;

    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<(), Error>;
}

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
}

impl SmtpEmailSender {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let credentials = match (&config.smtp_username, &config.smtp_password) {
            (Some(username), Some(password)) => {
                Some(Credentials::new(username.clone(), password.clone()))
            }
            _ => None,
        };

        let transport = if config.smtp_use_tls {
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| anyhow!("Failed to create SMTP relay: {}", e))?
                .port(config.smtp_port);
            if let Some(credentials) = credentials {
                builder = builder.credentials(credentials);
            }
            builder.build()
        } else {
            let mut builder =
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                    .port(config.smtp_port);
            if let Some(credentials) = credentials {
                builder = builder.credentials(credentials);
            }
            builder.build()
        };

        let from = config
            .smtp_from
            .parse()
            .map_err(|e| anyhow!("Invalid sender address {}: {}", config.smtp_from, e))?;

        info!(host = %config.smtp_host, port = config.smtp_port, "SMTP sender initialized");

        Ok(Self {
            transport,
            from,
            host: config.smtp_host.clone(),
        })
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        body: String,
        content_type: ContentType,
    ) -> Result<(), Error> {
        let recipient: Mailbox = to
            .parse()
            .map_err(|e| anyhow!("Invalid recipient address {}: {}", to, e))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject)
            .header(content_type)
            .body(body)
            .map_err(|e| anyhow!("Failed to build email message: {}", e))?;

        debug!(to, subject, host = %self.host, "Sending email via SMTP");

        self.transport.send(message).await.map_err(|e| {
            error!(to, error = %e, "Failed to send email via SMTP");
            anyhow!("SMTP send failed: {}", e)
        })?;

        info!(to, "Email sent");
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_plain(&self, to: &str, subject: &str, body: &str) -> Result<(), Error> {
        self.send(to, subject, body.to_string(), ContentType::TEXT_PLAIN)
            .await
    }

    async fn send_html(&self, to: &str, subject: &str, html: &str) -> Result<(), Error> {
        self.send(to, subject, html.to_string(), ContentType::TEXT_HTML)
            .await
    }
}
