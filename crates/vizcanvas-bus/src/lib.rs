use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};
use vizcanvas_schema::CanvasEvent;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum Topic {
    SessionOpened,
    ReplyUpdated,
    ChartsPlaced,
    SendFailed,
}

impl Topic {
    pub fn from_event(event: &CanvasEvent) -> Self {
        match event {
            CanvasEvent::SessionOpened { .. } => Topic::SessionOpened,
            CanvasEvent::ReplyUpdated { .. } => Topic::ReplyUpdated,
            CanvasEvent::ChartsPlaced { .. } => Topic::ChartsPlaced,
            CanvasEvent::SendFailed { .. } => Topic::SendFailed,
        }
    }
}

type Subscriber = mpsc::Sender<CanvasEvent>;
type SubscriberMap = Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>;

pub struct EventBus {
    subscribers: SubscriberMap,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<CanvasEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(topic).or_default().push(tx);
        rx
    }

    pub async fn publish(&self, event: CanvasEvent) -> Result<()> {
        dispatch(&self.subscribers, event).await
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

/// Cheap handle for publishing without owning the bus.
#[derive(Clone)]
pub struct BusPublisher {
    subscribers: SubscriberMap,
}

impl BusPublisher {
    pub async fn publish(&self, event: CanvasEvent) -> Result<()> {
        dispatch(&self.subscribers, event).await
    }
}

// Slow subscribers lose events rather than stalling the publisher.
async fn dispatch(subscribers: &SubscriberMap, event: CanvasEvent) -> Result<()> {
    let topic = Topic::from_event(&event);
    let subs = subscribers.read().await;
    if let Some(subscribers) = subs.get(&topic) {
        for tx in subscribers {
            if tx.try_send(event.clone()).is_err() {
                tracing::debug!(?topic, "dropping event for full or closed subscriber");
            }
        }
    }
    Ok(())
}
