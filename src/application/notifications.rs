use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Domain events emitted after a transition commits. Consumed by the notifier
/// task; delivery is fire-and-forget and never blocks or fails a transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    Activated {
        subscription_id: Uuid,
        user_id: Uuid,
        plan_id: Uuid,
    },
    Canceled {
        subscription_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    },
}

#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn send(&self, event: &SubscriptionEvent) -> Result<()>;
    fn provider_name(&self) -> &'static str;
}

#[derive(Clone)]
pub struct SubscriptionNotifier {
    tx: mpsc::Sender<SubscriptionEvent>,
}

impl SubscriptionNotifier {
    pub fn new(providers: Vec<Arc<dyn NotificationProvider>>) -> Self {
        let (tx, mut rx) = mpsc::channel::<SubscriptionEvent>(256);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for provider in &providers {
                    if let Err(error) = provider.send(&event).await {
                        warn!(
                            provider = provider.provider_name(),
                            error = %error,
                            "Notification provider failed"
                        );
                    }
                }
            }
        });

        Self { tx }
    }

    pub fn try_notify(&self, event: SubscriptionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Notification queue full; dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Notification queue closed; dropping event");
            }
        }
    }
}
