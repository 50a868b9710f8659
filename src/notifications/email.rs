//! System email service for one-time signup codes.
//!
//! Uses the SMTP configuration from the main config file. When SMTP is not
//! configured the service logs and skips instead of failing the request.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

/// Service for sending system emails
pub struct SystemEmailService {
    config: EmailConfig,
}

impl SystemEmailService {
    /// Create a new system email service
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    /// Send a signup verification code
    pub async fn send_otp_email(&self, to_email: &str, code: &str, ttl_minutes: u64) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                to = %to_email,
                "Email not configured, skipping verification code email"
            );
            return Ok(());
        }

        let subject = format!("Your {} verification code", self.config.from_name);
        let html_body = render_otp_html(&self.config.from_name, code, ttl_minutes);
        let text_body = render_otp_text(&self.config.from_name, code, ttl_minutes);

        self.send_email(to_email, &subject, &html_body, &text_body)
            .await
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from_mailbox = format!("{} <{}>", self.config.from_name, from_address);
        let from: Mailbox = from_mailbox.parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(
            to = %to_email,
            subject = %subject,
            "Email sent successfully"
        );

        Ok(())
    }
}

fn render_otp_html(product: &str, code: &str, ttl_minutes: u64) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Verification Code</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 0;
            background-color: #f5f5f5;
        }}
        .container {{
            max-width: 560px;
            margin: 0 auto;
            padding: 40px 20px;
        }}
        .card {{
            background-color: #ffffff;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0, 0, 0, 0.06);
            overflow: hidden;
        }}
        .header {{
            background: linear-gradient(135deg, #10b981 0%, #059669 100%);
            color: white;
            padding: 32px 24px;
            text-align: center;
        }}
        .content {{
            padding: 32px 24px;
            color: #374151;
            line-height: 1.6;
        }}
        .code {{
            font-size: 32px;
            font-weight: 700;
            letter-spacing: 8px;
            text-align: center;
            background-color: #f3f4f6;
            border-radius: 6px;
            padding: 16px;
            margin: 24px 0;
        }}
        .note {{
            color: #6b7280;
            font-size: 13px;
            text-align: center;
        }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header">
                <h1>{product}</h1>
            </div>
            <div class="content">
                <p>Use this code to finish creating your account:</p>
                <div class="code">{code}</div>
                <p class="note">The code expires in {ttl_minutes} minutes. If you didn't request it, you can safely ignore this email.</p>
            </div>
        </div>
    </div>
</body>
</html>"#,
        product = html_escape(product),
        code = html_escape(code),
        ttl_minutes = ttl_minutes,
    )
}

fn render_otp_text(product: &str, code: &str, ttl_minutes: u64) -> String {
    format!(
        r#"{product}

Use this code to finish creating your account:

    {code}

The code expires in {ttl_minutes} minutes.

If you didn't request it, you can safely ignore this email."#,
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
