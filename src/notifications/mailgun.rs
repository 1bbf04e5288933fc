use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use super::{Mailer, OutboundEmail};

#[derive(Debug, Clone)]
pub struct MailgunSettings {
    pub api_base: String,
    pub api_key: String,
    pub domain: String,
    pub sender: String,
}

/// Sends template messages through the Mailgun HTTP API.
#[derive(Clone)]
pub struct MailgunMailer {
    client: Client,
    settings: MailgunSettings,
}

impl MailgunMailer {
    pub fn new(settings: MailgunSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build mailgun client")?;
        Ok(Self { client, settings })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/v3/{}/messages",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.domain
        )
    }
}

#[async_trait]
impl Mailer for MailgunMailer {
    async fn send(&self, email: OutboundEmail) -> Result<()> {
        let mut form = vec![
            ("from", self.settings.sender.clone()),
            ("to", email.to.clone()),
            ("subject", email.subject.clone()),
        ];
        if !email.template.is_empty() {
            form.push(("template", email.template.clone()));
        }
        if !email.variables.is_empty() {
            let variables = serde_json::to_string(&email.variables)
                .context("failed to encode template variables")?;
            form.push(("h:X-Mailgun-Variables", variables));
        }

        self.client
            .post(self.messages_url())
            .basic_auth("api", Some(&self.settings.api_key))
            .form(&form)
            .send()
            .await
            .context("failed to reach mailgun")?
            .error_for_status()
            .context("mailgun rejected message")?;
        Ok(())
    }
}
