use crate::transport::{Acker, DeliveryProperties, RawDelivery};
use crate::{DeliveryMode, Header, Headers, TransportError};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Represents an **incoming** message, received through a
/// [`Subscription`](crate::Subscription).
///
/// Every message must be finalized exactly once, by calling one of
/// [`ack`](InboundMessage::ack), [`nack`](InboundMessage::nack), or
/// [`reject`](InboundMessage::reject). All three consume the message, so a
/// second finalization does not compile. A message dropped without being
/// finalized is logged at the error level; the broker re-delivers it once the
/// consumer goes away.
pub struct InboundMessage {
    consumer_tag: Arc<str>,
    delivery_tag: u64,
    exchange: String,
    routing_key: String,
    redelivered: bool,
    properties: DeliveryProperties,
    body: Vec<u8>,
    acker: Option<Box<dyn Acker>>,
}

/// Represents a failure to finalize an [`InboundMessage`] on the broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to {action} message with delivery tag {delivery_tag}: {source}")]
pub struct FinalizationError {
    /// The attempted action: `ack`, `nack`, or `reject`.
    pub action: &'static str,
    /// Delivery tag of the message.
    pub delivery_tag: u64,
    /// The underlying transport error.
    pub source: TransportError,
}

impl InboundMessage {
    pub(crate) fn new(consumer_tag: Arc<str>, delivery: RawDelivery) -> Self {
        let RawDelivery {
            delivery_tag,
            exchange,
            routing_key,
            redelivered,
            properties,
            body,
            acker,
        } = delivery;

        Self {
            consumer_tag,
            delivery_tag,
            exchange,
            routing_key,
            redelivered,
            properties,
            body,
            acker: Some(acker),
        }
    }
}

impl InboundMessage {
    /// Reports the tag of the consumer that received this message.
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Reports the delivery tag.
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Reports the exchange this message was published to.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Reports the routing key this message was published with.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Reports whether the broker delivered this message before.
    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Exposes the payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.body
    }

    /// Reports the delivery mode, if present.
    pub fn delivery_mode(&self) -> Option<DeliveryMode> {
        self.properties.delivery_mode
    }

    /// Exposes all headers.
    pub fn headers(&self) -> &Headers {
        &self.properties.headers
    }

    /// Retrieves a single header by name.
    pub fn header(&self, key: &str) -> Option<&Header> {
        self.properties.headers.get(key)
    }

    /// Reports the content type, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.properties.content_type.as_deref()
    }

    /// Reports the content encoding, if present.
    pub fn content_encoding(&self) -> Option<&str> {
        self.properties.content_encoding.as_deref()
    }

    /// Reports the correlation ID, if present.
    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }

    /// Reports the message ID, if present.
    pub fn message_id(&self) -> Option<&str> {
        self.properties.message_id.as_deref()
    }

    /// Reports the reply-to address, if present.
    pub fn reply_to(&self) -> Option<&str> {
        self.properties.reply_to.as_deref()
    }

    /// Reports the priority, if present.
    pub fn priority(&self) -> Option<u8> {
        self.properties.priority
    }

    /// Reports the timestamp, if present.
    pub fn timestamp(&self) -> Option<u64> {
        self.properties.timestamp
    }

    /// Deserializes the payload from JSON.
    #[cfg(feature = "json")]
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
    }
}

impl InboundMessage {
    /// Acknowledges this message (and, if `multiple`, all prior unacknowledged
    /// messages of the same consumer).
    pub async fn ack(mut self, multiple: bool) -> Result<(), FinalizationError> {
        let result = match self.acker.take() {
            Some(acker) => acker.ack(multiple).await,
            None => Err(TransportError::Closed),
        };

        self.conclude("ack", result)
    }

    /// Negatively acknowledges this message (and, if `multiple`, all prior
    /// unacknowledged messages of the same consumer), optionally re-queueing.
    pub async fn nack(mut self, multiple: bool, requeue: bool) -> Result<(), FinalizationError> {
        let result = match self.acker.take() {
            Some(acker) => acker.nack(multiple, requeue).await,
            None => Err(TransportError::Closed),
        };

        self.conclude("nack", result)
    }

    /// Rejects this message, optionally re-queueing it.
    pub async fn reject(mut self, requeue: bool) -> Result<(), FinalizationError> {
        let result = match self.acker.take() {
            Some(acker) => acker.reject(requeue).await,
            None => Err(TransportError::Closed),
        };

        self.conclude("reject", result)
    }

    fn conclude(
        &self,
        action: &'static str,
        result: Result<(), TransportError>,
    ) -> Result<(), FinalizationError> {
        result.map_err(|source| {
            error!(
                alert = true,
                consumer = self.consumer_tag.as_ref(),
                delivery_tag = self.delivery_tag,
                action,
                ?source,
                error_message = %source,
                byte_preview = String::from_utf8_lossy(&self.body).as_ref(),
                "Failed to finalize an incoming message",
            );

            FinalizationError {
                action,
                delivery_tag: self.delivery_tag,
                source,
            }
        })
    }
}

impl Drop for InboundMessage {
    fn drop(&mut self) {
        if self.acker.is_some() {
            error!(
                alert = true,
                consumer = self.consumer_tag.as_ref(),
                delivery_tag = self.delivery_tag,
                byte_preview = String::from_utf8_lossy(&self.body).as_ref(),
                "Dropped an incoming message without finalizing it",
            );
        }
    }
}

impl Debug for InboundMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("consumer_tag", &self.consumer_tag)
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("body_len", &self.body.len())
            .field("finalized", &self.acker.is_none())
            .finish()
    }
}
