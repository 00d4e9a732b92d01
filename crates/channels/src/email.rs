//! E-mail channel — renders into an RFC 5322 message and hands it to a
//! [`MailTransport`].
//!
//! The default transport relays through SMTP with lettre's async client.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Channel, ChannelError, DeliveryContext, OutboundMessage, Recipient};

/// Registry key of the e-mail channel.
pub const EMAIL_CHANNEL: &str = "email";

/// E-mail channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    /// Send `text/html` bodies instead of `text/plain`.
    pub html: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".into(),
            smtp_port: 25,
            username: None,
            password: None,
            from_address: "planner@localhost".into(),
            from_name: Some("Planner".into()),
            html: false,
        }
    }
}

/// Hands a finished message to the mail system.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), ChannelError>;
}

/// SMTP relay transport.
pub struct SmtpMailer {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Self {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
            .port(config.smtp_port);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Self { inner: builder.build() }
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: Message) -> Result<(), ChannelError> {
        self.inner
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }
}

/// The built-in e-mail channel.
pub struct EmailChannel {
    config: EmailConfig,
    transport: Arc<dyn MailTransport>,
}

impl EmailChannel {
    pub fn new(config: EmailConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self { config, transport }
    }

    /// E-mail channel relaying through the configured SMTP server.
    pub fn smtp(config: EmailConfig) -> Self {
        let transport = Arc::new(SmtpMailer::new(&config));
        Self::new(config, transport)
    }

    /// Build the message without sending it.
    pub fn build_message(&self, recipient: &Recipient, message: &OutboundMessage) -> Result<Message, ChannelError> {
        let from_address: Address = self
            .config
            .from_address
            .parse()
            .map_err(|e| ChannelError::InvalidMessage(format!("invalid from address: {e}")))?;
        let from = Mailbox::new(self.config.from_name.clone(), from_address);

        let to_address: Address = recipient
            .address
            .trim()
            .parse()
            .map_err(|e| ChannelError::InvalidRecipient(format!("{}: {e}", recipient.address)))?;
        let to = Mailbox::new(recipient.name.clone().filter(|n| !n.is_empty()), to_address);

        let content_type = if self.config.html { ContentType::TEXT_HTML } else { ContentType::TEXT_PLAIN };

        Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .header(content_type)
            .body(message.body.clone())
            .map_err(|e| ChannelError::InvalidMessage(e.to_string()))
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        EMAIL_CHANNEL
    }

    fn label(&self) -> &str {
        "Email"
    }

    async fn deliver(
        &self,
        recipient: &Recipient,
        message: &OutboundMessage,
        ctx: &DeliveryContext,
    ) -> Result<(), ChannelError> {
        let email = self.build_message(recipient, message)?;
        debug!(workflow_id = ctx.workflow_id, post_id = ctx.post_id, "sending e-mail to {}", recipient.address);
        self.transport.send(email).await?;
        info!(workflow_id = ctx.workflow_id, "e-mail sent to {}", recipient.address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Vec<String>, String)>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, message: Message) -> Result<(), ChannelError> {
            let to = message.envelope().to().iter().map(|a| a.to_string()).collect();
            let raw = String::from_utf8_lossy(&message.formatted()).into_owned();
            self.sent.lock().unwrap().push((to, raw));
            Ok(())
        }
    }

    fn ctx() -> DeliveryContext {
        DeliveryContext { workflow_id: 1, post_id: 2, event: "transition_post_status".into(), is_async: false }
    }

    fn msg() -> OutboundMessage {
        OutboundMessage { subject: "Post published".into(), body: "Hello there".into() }
    }

    #[tokio::test]
    async fn delivers_to_the_recipient_address() {
        let transport = Arc::new(RecordingTransport::default());
        let channel = EmailChannel::new(EmailConfig::default(), transport.clone());
        let recipient = Recipient { address: "editor@example.com".into(), name: Some("Ed".into()), user_id: Some(3) };

        channel.deliver(&recipient, &msg(), &ctx()).await.expect("delivery should succeed");

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, vec!["editor@example.com".to_string()]);
        assert!(sent[0].1.contains("Subject: Post published"));
        assert!(sent[0].1.contains("Hello there"));
    }

    #[tokio::test]
    async fn malformed_address_is_rejected_before_sending() {
        let transport = Arc::new(RecordingTransport::default());
        let channel = EmailChannel::new(EmailConfig::default(), transport.clone());
        let recipient = Recipient { address: "not-an-address".into(), name: None, user_id: None };

        let result = channel.deliver(&recipient, &msg(), &ctx()).await;
        assert!(matches!(result, Err(ChannelError::InvalidRecipient(_))));
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
