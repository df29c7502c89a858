//! Email Service
//!
//! Outbound delivery of verification and password reset tokens. Delivery is
//! fire-and-forget from the auth engine's point of view: it logs failures and
//! carries on.

use async_trait::async_trait;
use chrono::Datelike;
use lettre::{
    message::{header, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use log::{error, info};
use tera::{Context, Tera};
use thiserror::Error;

use crate::config::EmailConfig;

/// Email delivery errors
#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Email configuration error: {0}")]
    Configuration(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

/// Result type for email operations
pub type EmailResult<T> = Result<T, EmailError>;

/// Outbound email collaborator
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification(&self, to: &str, token: &str) -> EmailResult<()>;

    async fn send_password_reset(&self, to: &str, token: &str) -> EmailResult<()>;
}

/// Development sender that writes tokens to the log instead of mailing them
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_verification(&self, to: &str, token: &str) -> EmailResult<()> {
        info!("[email] verification for {}: token={}", to, token);
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, token: &str) -> EmailResult<()> {
        info!("[email] password reset for {}: token={}", to, token);
        Ok(())
    }
}

const VERIFICATION_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Verify Your Email Address</title>
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto;">
    <h1>Verify Your Email Address</h1>
    <p>Thanks for signing up. Confirm your address by opening the link below:</p>
    <p><a href="{{ link }}">{{ link }}</a></p>
    <p>This link expires in <strong>{{ expires_in_hours }} hours</strong>.</p>
    <p>If you didn't create an account, you can ignore this email.</p>
    <p style="font-size: 12px; color: #666;">&copy; {{ current_year }} {{ app_name }}</p>
</body>
</html>
"#;

const VERIFICATION_TEXT: &str = r#"Verify Your Email Address

Thanks for signing up. Confirm your address by opening the link below:

{{ link }}

This link expires in {{ expires_in_hours }} hours.

If you didn't create an account, you can ignore this email.

(c) {{ current_year }} {{ app_name }}
"#;

const PASSWORD_RESET_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Reset Your Password</title>
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto;">
    <h1>Reset Your Password</h1>
    <p>Use this token to choose a new password:</p>
    <p style="font-family: monospace; font-size: 16px;">{{ token }}</p>
    <p>It expires in <strong>{{ expires_in_hours }} hours</strong> and can be used once.</p>
    <p>If you didn't ask for a reset, no action is needed.</p>
    <p style="font-size: 12px; color: #666;">&copy; {{ current_year }} {{ app_name }}</p>
</body>
</html>
"#;

const PASSWORD_RESET_TEXT: &str = r#"Reset Your Password

Use this token to choose a new password:

{{ token }}

It expires in {{ expires_in_hours }} hours and can be used once.

If you didn't ask for a reset, no action is needed.

(c) {{ current_year }} {{ app_name }}
"#;

/// SMTP sender with embedded templates
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    templates: Tera,
    config: EmailConfig,
    verification_expires_hours: i64,
    reset_expires_hours: i64,
}

impl SmtpEmailSender {
    pub fn new(
        config: EmailConfig,
        verification_expires_hours: i64,
        reset_expires_hours: i64,
    ) -> EmailResult<Self> {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| EmailError::Configuration(format!("Failed to configure SMTP relay: {}", e)))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            templates: Self::embedded_templates()?,
            config,
            verification_expires_hours,
            reset_expires_hours,
        })
    }

    fn embedded_templates() -> EmailResult<Tera> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("verification_email.html", VERIFICATION_HTML),
            ("verification_email.txt", VERIFICATION_TEXT),
            ("password_reset.html", PASSWORD_RESET_HTML),
            ("password_reset.txt", PASSWORD_RESET_TEXT),
        ])
        .map_err(|e| EmailError::Template(e.to_string()))?;
        Ok(tera)
    }

    fn base_context(&self, token: &str, expires_in_hours: i64) -> Context {
        let mut context = Context::new();
        context.insert("token", token);
        context.insert("expires_in_hours", &expires_in_hours);
        context.insert("app_name", &self.config.from_name);
        context.insert("current_year", &chrono::Utc::now().year());
        context
    }

    fn render_pair(&self, name: &str, context: &Context) -> EmailResult<(String, String)> {
        let html = self
            .templates
            .render(&format!("{}.html", name), context)
            .map_err(|e| EmailError::Template(e.to_string()))?;
        let text = self
            .templates
            .render(&format!("{}.txt", name), context)
            .map_err(|e| EmailError::Template(e.to_string()))?;
        Ok((html, text))
    }

    async fn send(&self, to: &str, subject: &str, html: String, text: String) -> EmailResult<()> {
        let message = Message::builder()
            .from(
                format!("{} <{}>", self.config.from_name, self.config.from_email)
                    .parse()
                    .map_err(|e| EmailError::Address(format!("from: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| EmailError::Address(format!("to: {}", e)))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html),
                    ),
            )
            .map_err(|e| EmailError::Message(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email '{}' sent to {}", subject, to);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send '{}' to {}: {}", subject, to, e);
                Err(EmailError::Transport(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_verification(&self, to: &str, token: &str) -> EmailResult<()> {
        let mut context = self.base_context(token, self.verification_expires_hours);
        context.insert(
            "link",
            &format!(
                "{}/auth/verify-email?token={}",
                self.config.app_base_url.trim_end_matches('/'),
                token
            ),
        );
        let (html, text) = self.render_pair("verification_email", &context)?;
        self.send(to, "Verify Your Email Address", html, text).await
    }

    async fn send_password_reset(&self, to: &str, token: &str) -> EmailResult<()> {
        let context = self.base_context(token, self.reset_expires_hours);
        let (html, text) = self.render_pair("password_reset", &context)?;
        self.send(to, "Reset Your Password", html, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> EmailConfig {
        EmailConfig {
            smtp_host: "localhost".to_string(),
            smtp_port: 2525,
            smtp_username: "user".to_string(),
            smtp_password: "password".to_string(),
            from_name: "Auth Service".to_string(),
            from_email: "noreply@example.com".to_string(),
            app_base_url: "https://auth.example.com/".to_string(),
        }
    }

    #[tokio::test]
    async fn test_log_sender_never_fails() {
        let sender = LogEmailSender;
        assert!(sender.send_verification("a@example.com", "tok").await.is_ok());
        assert!(sender.send_password_reset("a@example.com", "tok").await.is_ok());
    }

    #[tokio::test]
    async fn test_templates_are_embedded() {
        let sender = SmtpEmailSender::new(create_test_config(), 24, 2).unwrap();
        let names: Vec<&str> = sender.templates.get_template_names().collect();

        for name in [
            "verification_email.html",
            "verification_email.txt",
            "password_reset.html",
            "password_reset.txt",
        ] {
            assert!(names.contains(&name), "missing template {}", name);
        }
    }

    #[tokio::test]
    async fn test_verification_render_includes_link() {
        let sender = SmtpEmailSender::new(create_test_config(), 24, 2).unwrap();
        let mut context = sender.base_context("abc123", 24);
        context.insert("link", "https://auth.example.com/auth/verify-email?token=abc123");

        let (html, text) = sender.render_pair("verification_email", &context).unwrap();
        assert!(html.contains("verify-email?token=abc123"));
        assert!(text.contains("24 hours"));
    }

    #[tokio::test]
    async fn test_password_reset_render_includes_token() {
        let sender = SmtpEmailSender::new(create_test_config(), 24, 2).unwrap();
        let context = sender.base_context("reset-token", 2);

        let (html, text) = sender.render_pair("password_reset", &context).unwrap();
        assert!(html.contains("reset-token"));
        assert!(text.contains("2 hours"));
    }
}
