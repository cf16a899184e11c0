use crate::{DeliveryMode, Headers, ListenRoute, OutboundMessage};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt::{Debug, Formatter};
use thiserror::Error;

/// The production [`Transport`] on top of `lapin`.
pub mod amqp;

#[cfg(test)]
pub(crate) mod scripted;

/// A narrow capability set over a message broker: publish, consume, cancel a
/// consumer, close. Everything about connections, channels, the wire protocol
/// and exchange/queue declaration lives behind this trait.
///
/// Implementations are shared between the emission pipeline and all active
/// subscriptions, so they must be safe to call concurrently.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publishes a single message, returning once the message is confirmed to
    /// the implementation’s configured extent.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Registers a consumer for the given validated route and returns its
    /// stream of raw deliveries.
    async fn consume(&self, route: &ListenRoute) -> Result<Consumption, TransportError>;

    /// Cancels a consumer previously returned from
    /// [`consume`](Transport::consume).
    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError>;

    /// Releases all underlying resources.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Finalizes a single [`RawDelivery`] on the broker.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Positively acknowledges the delivery (and all prior unacknowledged
    /// deliveries on the same channel, if `multiple`).
    async fn ack(&self, multiple: bool) -> Result<(), TransportError>;

    /// Negatively acknowledges the delivery, optionally re-queueing it.
    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), TransportError>;

    /// Rejects the delivery, optionally re-queueing it.
    async fn reject(&self, requeue: bool) -> Result<(), TransportError>;
}

/// A registered consumer: its tag plus the stream of raw deliveries.
pub struct Consumption {
    /// The tag identifying this consumer on the broker.
    pub consumer_tag: String,
    /// The raw deliveries. An `Err` item describes a single delivery that could
    /// not be received; the stream goes on after it.
    pub deliveries: BoxStream<'static, Result<RawDelivery, TransportError>>,
}

/// A message as received from the broker, before being wrapped into an
/// [`InboundMessage`](crate::InboundMessage).
pub struct RawDelivery {
    /// Delivery tag, unique per channel.
    pub delivery_tag: u64,
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
    /// Message properties.
    pub properties: DeliveryProperties,
    /// Payload bytes.
    pub body: Vec<u8>,
    /// Handle for finalizing this delivery.
    pub acker: Box<dyn Acker>,
}

/// Properties attached to a [`RawDelivery`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryProperties {
    /// Delivery mode, if present.
    pub delivery_mode: Option<DeliveryMode>,
    /// Headers.
    pub headers: Headers,
    /// Content type, if present.
    pub content_type: Option<String>,
    /// Content encoding, if present.
    pub content_encoding: Option<String>,
    /// Correlation ID, if present.
    pub correlation_id: Option<String>,
    /// Message ID, if present.
    pub message_id: Option<String>,
    /// Reply-to address, if present.
    pub reply_to: Option<String>,
    /// Priority, if present.
    pub priority: Option<u8>,
    /// Timestamp, if present.
    pub timestamp: Option<u64>,
}

/// Represents the failures surfaced by a [`Transport`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached, or an operation on it failed.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The broker negatively acknowledged a published message.
    #[error("the broker negatively acknowledged the message")]
    NegativelyAcknowledged,

    /// The broker returned a mandatory message that could not be routed.
    #[error("the message to exchange '{exchange}' with routing key '{routing_key}' was not routed to any queue")]
    Unroutable {
        /// Exchange name
        exchange: String,
        /// Routing key
        routing_key: String,
    },

    /// The transport has already been closed.
    #[error("the transport is closed")]
    Closed,
}

impl Debug for RawDelivery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDelivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}
