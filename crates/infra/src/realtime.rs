use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures_util::Stream;
use kedai_domain::ports::notify::SupportNotifier;
use kedai_domain::realtime::{SupportEvent, Topic};
use kedai_domain::support::{Conversation, SupportMessage};
use kedai_domain::views::{MessageView, StatusView};
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const REALTIME_PUBLISHED_TOTAL: &str = "kedai_realtime_published_total";
const REALTIME_DELIVERED_TOTAL: &str = "kedai_realtime_delivered_total";
const REALTIME_EVICTED_TOTAL: &str = "kedai_realtime_evicted_total";

#[derive(Debug, Serialize)]
pub struct RealtimeEnvelope {
    pub topic: String,
    pub payload: SupportEvent,
}

#[derive(Debug, Clone)]
pub enum Delivery {
    Event(Arc<RealtimeEnvelope>),
    /// The subscriber fell behind and was cut off; no further events follow.
    Evicted,
}

type SubscriberMap = HashMap<u64, mpsc::Sender<Arc<RealtimeEnvelope>>>;

struct Registry {
    topics: DashMap<String, SubscriberMap>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Registry {
    fn remove(&self, topic: &str, ids: &[u64]) {
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            for id in ids {
                subscribers.remove(id);
            }
        }
        self.topics
            .remove_if(topic, |_, subscribers| subscribers.is_empty());
    }
}

/// Process-wide topic fan-out. Each subscription owns a bounded queue and
/// publishing never waits on a subscriber.
#[derive(Clone)]
pub struct SupportBroadcaster {
    registry: Arc<Registry>,
}

impl SupportBroadcaster {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    pub fn subscribe(&self, topic: &Topic) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.registry.queue_capacity);
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let topic = topic.to_string();
        self.registry
            .topics
            .entry(topic.clone())
            .or_default()
            .insert(id, sender);
        tracing::debug!(topic = %topic, subscription_id = id, "realtime subscription added");
        Subscription {
            topic,
            id,
            receiver,
            registry: self.registry.clone(),
            finished: false,
        }
    }

    /// Returns how many subscribers accepted the event.
    pub fn publish(&self, event: SupportEvent) -> usize {
        let topic = event.topic();
        let envelope = Arc::new(RealtimeEnvelope {
            topic: topic.clone(),
            payload: event,
        });

        let mut delivered = 0_usize;
        let mut lagged = Vec::new();
        let mut closed = Vec::new();
        if let Some(subscribers) = self.registry.topics.get(&topic) {
            for (id, sender) in subscribers.iter() {
                match sender.try_send(envelope.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => lagged.push(*id),
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !lagged.is_empty() || !closed.is_empty() {
            for id in &lagged {
                tracing::warn!(topic = %topic, subscription_id = id, "realtime subscriber lagged; evicting");
            }
            counter!(REALTIME_EVICTED_TOTAL, "reason" => "lagged").increment(lagged.len() as u64);
            counter!(REALTIME_EVICTED_TOTAL, "reason" => "closed").increment(closed.len() as u64);
            lagged.extend(closed);
            self.registry.remove(&topic, &lagged);
        }

        counter!(REALTIME_PUBLISHED_TOTAL).increment(1);
        counter!(REALTIME_DELIVERED_TOTAL).increment(delivered as u64);
        delivered
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry
            .topics
            .get(&topic.to_string())
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

impl SupportNotifier for SupportBroadcaster {
    fn message_accepted(&self, message: &SupportMessage) {
        self.publish(SupportEvent::Message(MessageView::from(message)));
    }

    fn status_changed(&self, conversation: &Conversation) {
        self.publish(SupportEvent::Status(StatusView::from(conversation)));
    }
}

pub struct Subscription {
    topic: String,
    id: u64,
    receiver: mpsc::Receiver<Arc<RealtimeEnvelope>>,
    registry: Arc<Registry>,
    finished: bool,
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(envelope)) => Poll::Ready(Some(Delivery::Event(envelope))),
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Delivery::Evicted))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(&self.topic, &[self.id]);
    }
}
