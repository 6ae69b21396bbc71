use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Delivery channel for one-time reset codes.
#[async_trait]
pub trait OtpSink: Send + Sync {
    async fn deliver(&self, email: &str, code: &str, ttl_secs: u64) -> anyhow::Result<()>;
}

/// Development sink. Records that a code went out, never the code itself;
/// local testing reads the code from the reset response instead.
pub struct LogOtpSink;

#[async_trait]
impl OtpSink for LogOtpSink {
    async fn deliver(&self, _email: &str, _code: &str, ttl_secs: u64) -> anyhow::Result<()> {
        info!("Password reset code issued (valid {}s); mail delivery disabled", ttl_secs);
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    to: &'a str,
    subject: &'a str,
    text: String,
}

/// Hands the code to an HTTP mail relay as JSON.
pub struct RelayOtpSink {
    client: reqwest::Client,
    url: String,
}

impl RelayOtpSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl OtpSink for RelayOtpSink {
    async fn deliver(&self, email: &str, code: &str, ttl_secs: u64) -> anyhow::Result<()> {
        let message = RelayMessage {
            to: email,
            subject: "Your password reset code",
            text: format!("Your code is {}. It is valid for {} seconds.", code, ttl_secs),
        };

        self.client
            .post(&self.url)
            .json(&message)
            .send()
            .await?
            .error_for_status()?;

        info!("Password reset code handed to mail relay");
        Ok(())
    }
}
