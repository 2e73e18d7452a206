use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{email::Item, prompt::Decision, server_config::NotifierConfig, HttpClient};

use super::{Notifier, NotifierError, SendReceipt};

const MAX_SMS_CHARS: usize = 320;

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: Option<String>,
}

/// Sends text messages through the Twilio Messages API.
pub struct TwilioNotifier {
    http_client: HttpClient,
    config: NotifierConfig,
}

impl TwilioNotifier {
    pub fn new(http_client: HttpClient, config: NotifierConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn is_configured(&self) -> Result<(), NotifierError> {
        if self.config.account_sid.is_empty() || self.config.auth_token.is_empty() {
            return Err(NotifierError::NotConfigured("missing account credentials"));
        }
        if self.config.from_number.is_empty() || self.config.to_number.is_empty() {
            return Err(NotifierError::NotConfigured("missing phone numbers"));
        }
        Ok(())
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

pub fn sms_body(item: &Item, decision: &Decision) -> String {
    let msg = &item.message;
    let mut body = format!(
        "[{}] {}",
        decision.label,
        msg.subject.as_deref().unwrap_or("(no subject)")
    );
    if let Some(from) = msg.from.as_deref() {
        body.push_str(&format!(" (from {from})"));
    }
    if let Some(reason) = decision.reason.as_deref().filter(|r| !r.is_empty()) {
        body.push('\n');
        body.push_str(reason);
    }
    body.chars().take(MAX_SMS_CHARS).collect()
}

#[async_trait]
impl Notifier for TwilioNotifier {
    fn destination(&self) -> &str {
        &self.config.to_number
    }

    async fn send(&self, item: &Item, decision: &Decision) -> Result<SendReceipt, NotifierError> {
        self.is_configured()?;

        let body = sms_body(item, decision);
        let response = self
            .http_client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .timeout(self.config.timeout())
            .form(&[
                ("To", self.config.to_number.as_str()),
                ("From", self.config.from_number.as_str()),
                ("Body", body.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Twilio send failed for {}: {} - {}", item.id, status, body);
            return Err(NotifierError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let resource = response.json::<MessageResource>().await?;
        debug!("SMS sent for {}: {:?}", item.id, resource.sid);

        Ok(SendReceipt {
            destination: self.config.to_number.clone(),
            provider_id: resource.sid,
        })
    }
}
