use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FabricError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub u64);

/// One message handed to a consumer, with enough state attached to ack or
/// nack it later through the same [`BrokerAdapter`] it came from.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub topic: String,
    pub group: String,
    pub key: String,
    pub body: Vec<u8>,
    pub attempt: u32,
}

/// The durable broker seam: at-least-once delivery, manual ack/nack,
/// per-topic consumer groups, dead-letter routing on non-requeued nacks.
///
/// [`InProcessBroker`](crate::broker::InProcessBroker) is the bundled
/// default backend; a networked broker would implement this same trait
/// behind a client connection.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Publish `body` to `topic`. `key` (the request id) scopes ordering:
    /// messages sharing a key are never reordered relative to each other.
    async fn publish(&self, topic: &str, key: &str, body: Vec<u8>) -> Result<(), FabricError>;

    /// Poll up to `max` undelivered-to-this-group messages from `topic`. A
    /// group's first poll replays everything the topic still retains.
    async fn poll(&self, topic: &str, group: &str, max: usize)
        -> Result<Vec<Delivery>, FabricError>;

    /// Acknowledge successful processing of `tag`.
    async fn ack(&self, tag: DeliveryTag) -> Result<(), FabricError>;

    /// Negative-acknowledge `tag`. `requeue = true` redelivers the message
    /// to the same group with an incremented attempt count; `requeue =
    /// false` routes it to the owning topic's dead-letter queue instead.
    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), FabricError>;

    /// Number of messages currently retained on `topic`'s dead-letter queue.
    async fn dlq_depth(&self, topic: &str) -> Result<u64, FabricError>;
}

#[async_trait]
impl<T: BrokerAdapter + ?Sized> BrokerAdapter for Arc<T> {
    async fn publish(&self, topic: &str, key: &str, body: Vec<u8>) -> Result<(), FabricError> {
        (**self).publish(topic, key, body).await
    }

    async fn poll(
        &self,
        topic: &str,
        group: &str,
        max: usize,
    ) -> Result<Vec<Delivery>, FabricError> {
        (**self).poll(topic, group, max).await
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), FabricError> {
        (**self).ack(tag).await
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), FabricError> {
        (**self).nack(tag, requeue).await
    }

    async fn dlq_depth(&self, topic: &str) -> Result<u64, FabricError> {
        (**self).dlq_depth(topic).await
    }
}
