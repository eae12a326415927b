//! Named pub/sub channels carrying facts in their wire (JSON) form.
//!
//! Every subscriber sees every fact published after it subscribed, in
//! publication order. There is no consumption competition between
//! subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use factgate_common::Fact;

use crate::filter::InterestFilter;

/// A named, ordered stream of facts.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    async fn publish_payload(&self, payload: serde_json::Value) -> Result<()>;

    /// Facts published from now on that pass `filter`. The subscription is
    /// registered before this returns; dropping the stream detaches.
    fn subscribe(&self, filter: Arc<InterestFilter>) -> BoxStream<'static, Fact>;

    async fn publish(&self, fact: &Fact) -> Result<()> {
        self.publish_payload(fact.to_payload()?).await
    }
}

/// Resolves channel names to channels.
pub trait ChannelProvider: Send + Sync {
    fn channel(&self, name: &str) -> Arc<dyn Channel>;
}

// ---------------------------------------------------------------------------
// In-process bus
// ---------------------------------------------------------------------------

/// In-process message bus backed by one broadcast channel per name.
pub struct MemoryBus {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<serde_json::Value>>>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn memory_channel(&self, name: &str) -> MemoryChannel {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        MemoryChannel {
            name: name.to_string(),
            sender,
        }
    }
}

impl ChannelProvider for MemoryBus {
    fn channel(&self, name: &str) -> Arc<dyn Channel> {
        Arc::new(self.memory_channel(name))
    }
}

#[derive(Clone)]
pub struct MemoryChannel {
    name: String,
    sender: broadcast::Sender<serde_json::Value>,
}

impl MemoryChannel {
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish_payload(&self, payload: serde_json::Value) -> Result<()> {
        if self.sender.send(payload).is_err() {
            debug!(channel = %self.name, "Published with no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self, filter: Arc<InterestFilter>) -> BoxStream<'static, Fact> {
        let mut rx = self.sender.subscribe();
        let channel = self.name.clone();

        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if let Some(fact) = filter.accept(&payload) {
                            yield fact;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "Subscriber lagged, facts skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
