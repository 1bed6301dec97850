//! Redis-backed [`GroupBroadcast`] implementation.
//!
//! Delivery is at-least-once per still-subscribed process with no
//! ordering guarantee across processes; the persist-then-publish
//! discipline upstream is what keeps clients consistent.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::{Client, SubscriberClient};
use fred::error::Error as RedisError;
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::config::Config as RedisConfig;
use kaiwa_common::{AppError, AppResult};
use kaiwa_core::services::broadcast::{
    ChatEvent, EVENT_CHANNEL_CAPACITY, Group, GroupBroadcast,
};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

/// Redis Pub/Sub group broadcast.
pub struct RedisGroupBroadcast {
    publisher: Client,
    subscriber: SubscriberClient,
    prefix: String,
    /// Local broadcast channel for events received from Redis.
    local_tx: broadcast::Sender<(Group, ChatEvent)>,
    /// Subscription refcounts per channel: several connections on this
    /// process may share one group, and only the last unsubscribe may
    /// drop the Redis subscription.
    subscriptions: Arc<Mutex<HashMap<String, usize>>>,
}

impl RedisGroupBroadcast {
    /// Create a new Redis group broadcast.
    pub async fn new(redis_url: &str, prefix: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;

        let publisher = Client::new(config.clone(), None, None, None);
        publisher.init().await?;

        let subscriber = SubscriberClient::new(config, None, None, None);
        subscriber.init().await?;

        let (local_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!("Redis group broadcast initialized");

        Ok(Self {
            publisher,
            subscriber,
            prefix: prefix.to_string(),
            local_tx,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Start the bridge loop forwarding Redis messages into the local
    /// broadcast channel.
    pub fn start(&self) {
        let local_tx = self.local_tx.clone();
        let prefix = self.prefix.clone();
        let mut message_stream = self.subscriber.message_rx();

        tokio::spawn(async move {
            while let Ok(message) = message_stream.recv().await {
                let Some(group) = Group::parse(&prefix, &message.channel) else {
                    debug!(channel = %message.channel, "Ignoring message on foreign channel");
                    continue;
                };
                let Some(payload) = message.value.as_string() else {
                    warn!(channel = %message.channel, "Non-string Pub/Sub payload");
                    continue;
                };
                match serde_json::from_str::<ChatEvent>(&payload) {
                    Ok(event) => {
                        debug!(?group, "Received Pub/Sub event");
                        // A send error only means no session is listening locally
                        let _ = local_tx.send((group, event));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to parse Pub/Sub message");
                    }
                }
            }
            info!("Pub/Sub message stream ended");
        });
    }

    /// Shutdown both Redis clients.
    pub async fn shutdown(&self) -> Result<(), RedisError> {
        self.subscriber.quit().await?;
        self.publisher.quit().await?;
        info!("Redis group broadcast shutdown");
        Ok(())
    }
}

#[async_trait]
impl GroupBroadcast for RedisGroupBroadcast {
    async fn subscribe(&self, group: &Group) -> AppResult<()> {
        let channel = group.channel(&self.prefix);

        let mut subs = self.subscriptions.lock().await;
        let count = subs.entry(channel.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.subscriber
                .subscribe(&channel)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            debug!(channel, "Subscribed to group channel");
        }
        Ok(())
    }

    async fn unsubscribe(&self, group: &Group) -> AppResult<()> {
        let channel = group.channel(&self.prefix);

        let mut subs = self.subscriptions.lock().await;
        match subs.get_mut(&channel) {
            // Idempotent: never subscribed (or already fully released)
            None => Ok(()),
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                subs.remove(&channel);
                self.subscriber
                    .unsubscribe(&channel)
                    .await
                    .map_err(|e| AppError::Redis(e.to_string()))?;
                debug!(channel, "Unsubscribed from group channel");
                Ok(())
            }
        }
    }

    async fn publish(&self, group: &Group, event: &ChatEvent) -> AppResult<()> {
        let channel = group.channel(&self.prefix);
        let payload =
            serde_json::to_string(event).map_err(|e| AppError::Internal(e.to_string()))?;

        let _: () = self
            .publisher
            .publish(channel.as_str(), payload)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        debug!(channel, "Published chat event");
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<(Group, ChatEvent)> {
        self.local_tx.subscribe()
    }
}
