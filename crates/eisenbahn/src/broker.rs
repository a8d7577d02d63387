//! Default [`BrokerAdapter`] backend: an in-process, multi-consumer-group
//! topic log. Durable enough to exercise every broker-facing invariant
//! (redelivery, DLQ routing, per-group replay) in a single process; a real
//! deployment swaps this out for a networked broker behind the same trait.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::FabricError;
use crate::traits::{BrokerAdapter, Delivery, DeliveryTag};

struct StoredMessage {
    id: u64,
    key: String,
    body: Vec<u8>,
    attempt: u32,
}

struct GroupCursor {
    pending: VecDeque<u64>,
    in_flight: HashSet<u64>,
}

struct TopicLog {
    messages: VecDeque<StoredMessage>,
    next_id: u64,
    groups: HashMap<String, GroupCursor>,
    retention: usize,
}

impl TopicLog {
    fn new(retention: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            next_id: 0,
            groups: HashMap::new(),
            retention,
        }
    }

    fn push(&mut self, key: String, body: Vec<u8>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push_back(StoredMessage {
            id,
            key,
            body,
            attempt: 1,
        });
        while self.messages.len() > self.retention {
            self.messages.pop_front();
        }
        for cursor in self.groups.values_mut() {
            cursor.pending.push_back(id);
        }
        id
    }

    /// Creates the group's cursor on first sight, seeded with every message
    /// still retained — the in-process stand-in for "replay from earliest
    /// retained offset" on a fresh consumer group.
    fn group_mut(&mut self, group: &str) -> &mut GroupCursor {
        self.groups.entry(group.to_string()).or_insert_with(|| {
            let backlog = self.messages.iter().map(|m| m.id).collect();
            GroupCursor {
                pending: backlog,
                in_flight: HashSet::new(),
            }
        })
    }

    fn find(&self, id: u64) -> Option<&StoredMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn find_mut(&mut self, id: u64) -> Option<&mut StoredMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

struct BrokerState {
    topics: HashMap<String, TopicLog>,
    tags: HashMap<u64, (String, String, u64)>,
}

pub struct InProcessBroker {
    state: Mutex<BrokerState>,
    next_tag: AtomicU64,
    retention: usize,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::with_retention(10_000)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::new(BrokerState {
                topics: HashMap::new(),
                tags: HashMap::new(),
            }),
            next_tag: AtomicU64::new(1),
            retention,
        }
    }

    fn dlq_topic(topic: &str) -> String {
        pipeline_core::topics::dlq(topic)
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerAdapter for InProcessBroker {
    async fn publish(&self, topic: &str, key: &str, body: Vec<u8>) -> Result<(), FabricError> {
        let mut state = self.state.lock().await;
        let retention = self.retention;
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(retention))
            .push(key.to_string(), body);
        Ok(())
    }

    async fn poll(
        &self,
        topic: &str,
        group: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, FabricError> {
        let mut state = self.state.lock().await;
        let retention = self.retention;

        let ids: Vec<u64> = {
            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(retention));
            let cursor = log.group_mut(group);
            let mut taken = Vec::new();
            while taken.len() < max {
                match cursor.pending.pop_front() {
                    Some(id) => taken.push(id),
                    None => break,
                }
            }
            taken
        };

        let mut deliveries = Vec::with_capacity(ids.len());
        for id in ids {
            let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
            let log = state.topics.get_mut(topic).expect("topic present");
            let Some(msg) = log.find(id) else {
                continue; // evicted by retention between enqueue and poll
            };
            deliveries.push(Delivery {
                tag: DeliveryTag(tag),
                topic: topic.to_string(),
                group: group.to_string(),
                key: msg.key.clone(),
                body: msg.body.clone(),
                attempt: msg.attempt,
            });
            log.group_mut(group).in_flight.insert(id);
            state
                .tags
                .insert(tag, (topic.to_string(), group.to_string(), id));
        }
        Ok(deliveries)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), FabricError> {
        let mut state = self.state.lock().await;
        let Some((topic, group, id)) = state.tags.remove(&tag.0) else {
            return Err(FabricError::UnknownDelivery(tag.0));
        };
        if let Some(log) = state.topics.get_mut(&topic) {
            log.group_mut(&group).in_flight.remove(&id);
        }
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), FabricError> {
        let mut state = self.state.lock().await;
        let Some((topic, group, id)) = state.tags.remove(&tag.0) else {
            return Err(FabricError::UnknownDelivery(tag.0));
        };

        let dlq_payload = {
            let log = state
                .topics
                .get_mut(&topic)
                .ok_or_else(|| FabricError::UnknownTopic(topic.clone()))?;
            log.group_mut(&group).in_flight.remove(&id);

            if requeue {
                if let Some(msg) = log.find_mut(id) {
                    msg.attempt += 1;
                }
                log.group_mut(&group).pending.push_back(id);
                None
            } else {
                log.find(id).map(|msg| (msg.key.clone(), msg.body.clone()))
            }
        };

        if let Some((key, body)) = dlq_payload {
            let retention = self.retention;
            let dlq_name = Self::dlq_topic(&topic);
            state
                .topics
                .entry(dlq_name)
                .or_insert_with(|| TopicLog::new(retention))
                .push(key, body);
        }

        Ok(())
    }

    async fn dlq_depth(&self, topic: &str) -> Result<u64, FabricError> {
        let state = self.state.lock().await;
        Ok(state
            .topics
            .get(&Self::dlq_topic(topic))
            .map(|log| log.messages.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_poll_delivers_in_order() {
        let broker = InProcessBroker::new();
        broker.publish("t", "k1", b"a".to_vec()).await.unwrap();
        broker.publish("t", "k1", b"b".to_vec()).await.unwrap();

        let deliveries = broker.poll("t", "g1", 10).await.unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].body, b"a");
        assert_eq!(deliveries[1].body, b"b");
    }

    #[tokio::test]
    async fn new_group_replays_retained_backlog() {
        let broker = InProcessBroker::new();
        broker.publish("t", "k1", b"a".to_vec()).await.unwrap();

        let first = broker.poll("t", "early", 10).await.unwrap();
        assert_eq!(first.len(), 1);

        // A group created after the publish still sees the retained message.
        let late = broker.poll("t", "late", 10).await.unwrap();
        assert_eq!(late.len(), 1);
    }

    #[tokio::test]
    async fn nack_requeue_redelivers_with_incremented_attempt() {
        let broker = InProcessBroker::new();
        broker.publish("t", "k1", b"a".to_vec()).await.unwrap();
        let first = broker.poll("t", "g1", 1).await.unwrap();
        assert_eq!(first[0].attempt, 1);

        broker.nack(first[0].tag, true).await.unwrap();
        let redelivered = broker.poll("t", "g1", 1).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].attempt, 2);
    }

    #[tokio::test]
    async fn nack_without_requeue_routes_to_dlq() {
        let broker = InProcessBroker::new();
        broker.publish("t", "k1", b"a".to_vec()).await.unwrap();
        let first = broker.poll("t", "g1", 1).await.unwrap();

        broker.nack(first[0].tag, false).await.unwrap();
        assert_eq!(broker.dlq_depth("t").await.unwrap(), 1);

        let redelivered = broker.poll("t", "g1", 1).await.unwrap();
        assert!(redelivered.is_empty());
    }

    #[tokio::test]
    async fn unknown_delivery_tag_is_rejected() {
        let broker = InProcessBroker::new();
        let err = broker.ack(DeliveryTag(999)).await.unwrap_err();
        assert!(matches!(err, FabricError::UnknownDelivery(999)));
    }
}
