use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::application::notifications::{NotificationProvider, SubscriptionEvent};

/// Posts subscription events to the external email service. The service owns
/// template rendering and delivery; this side only hands over the event.
pub struct EmailServiceProvider {
    http: reqwest::Client,
    endpoint: Url,
}

impl EmailServiceProvider {
    pub fn new(endpoint: Url) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl NotificationProvider for EmailServiceProvider {
    async fn send(&self, event: &SubscriptionEvent) -> Result<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(event)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("email service responded with {}", response.status());
        }
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "email-service"
    }
}
