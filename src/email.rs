use anyhow::Context;
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::config::Config;
use crate::models::models::User;
use crate::templates::{self, Vars};

/// A message the mailer handled while running without SMTP.
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// SMTP mail sender. Without `MAIL_SERVER` it runs in no-op mode: messages
/// are logged and kept in an in-memory outbox instead of being sent.
#[derive(Clone)]
pub struct Mailer {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
    outbox: Arc<Mutex<Vec<OutgoingMail>>>,
}

impl Mailer {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let from = config
            .mail_sender()
            .parse::<Mailbox>()
            .with_context(|| format!("invalid sender address {}", config.mail_sender()))?;

        let transport = match &config.mail.server {
            None => {
                warn!("MAIL_SERVER not configured; mailer will operate in no-op mode");
                None
            }
            Some(server) => {
                let builder = if config.mail.use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)
                        .context("configuring SMTP transport")?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(server)
                };
                let builder = builder.port(config.mail.port);
                let builder = match (&config.mail.username, &config.mail.password) {
                    (Some(username), Some(password)) => {
                        builder.credentials(Credentials::new(username.clone(), password.clone()))
                    }
                    _ => builder,
                };
                Some(Arc::new(builder.build()))
            }
        };

        Ok(Self {
            transport,
            from,
            outbox: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Messages captured in no-op mode, oldest first.
    pub fn outbox(&self) -> Vec<OutgoingMail> {
        self.outbox.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub async fn send_password_reset(&self, user: &User, link: &str) -> anyhow::Result<()> {
        let mut vars = Vars::new();
        vars.insert("username", user.username.clone());
        vars.insert("link", link.to_string());
        let text_body = templates::render("email/reset_password.txt", &vars)?;

        let mut html_vars = Vars::new();
        html_vars.insert("username", html_escape::encode_text(&user.username).to_string());
        html_vars.insert(
            "link",
            html_escape::encode_double_quoted_attribute(link).to_string(),
        );
        let html_body = templates::render("email/reset_password.html", &html_vars)?;

        self.send_mail(OutgoingMail {
            to: user.email.clone(),
            subject: "[Microblog] Reset Your Password".to_string(),
            text_body,
            html_body,
        })
        .await
    }

    async fn send_mail(&self, mail: OutgoingMail) -> anyhow::Result<()> {
        let Some(transport) = &self.transport else {
            info!(
                subject = %mail.subject,
                recipient = %mail.to,
                "mailer in no-op mode; skipping actual send"
            );
            if let Ok(mut outbox) = self.outbox.lock() {
                outbox.push(mail);
            }
            return Ok(());
        };

        let to = mail
            .to
            .parse::<Mailbox>()
            .with_context(|| format!("invalid recipient address {}", mail.to))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(mail.text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(mail.html_body),
                    ),
            )
            .context("building email message")?;

        transport.send(email).await.context("sending email")?;
        info!(subject = %mail.subject, "email sent");
        Ok(())
    }
}
