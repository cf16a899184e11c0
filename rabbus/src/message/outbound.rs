use crate::{DeliveryMode, ExchangeKind, Header, Headers};
use thiserror::Error;

/// Represents an **outgoing** message, addressed to an exchange.
///
/// Once built, a message is immutable. It is moved into the
/// [emission pipeline](crate::EmitSender) on enqueue and handed back to the
/// caller inside the terminal outcome (either [`Published`](crate::Published)
/// or [`PublishingError`](crate::PublishingError)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    exchange: String,
    kind: ExchangeKind,
    routing_key: String,
    payload: Vec<u8>,
    delivery_mode: DeliveryMode,
    headers: Headers,
    content_type: Option<String>,
    content_encoding: Option<String>,
    correlation_id: Option<String>,
    message_id: Option<String>,
}

/// Represents the reasons an [`OutboundMessageBuilder`] refuses to build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The exchange name is empty.
    #[error("invalid outbound message: expected a non-empty exchange name")]
    ExchangeRequired,
    /// The exchange kind is not set.
    #[error("invalid outbound message for exchange '{exchange}': expected an exchange kind")]
    KindRequired {
        /// Exchange name
        exchange: String,
    },
    /// The routing key is empty, but the exchange kind routes by it.
    #[error(
        "invalid outbound message for {kind} exchange '{exchange}': expected a non-empty routing key"
    )]
    RoutingKeyRequired {
        /// Exchange name
        exchange: String,
        /// Exchange kind
        kind: ExchangeKind,
    },
}

impl OutboundMessage {
    /// Creates a new [`OutboundMessageBuilder`].
    pub fn builder() -> OutboundMessageBuilder {
        OutboundMessageBuilder::new()
    }
}

impl OutboundMessage {
    /// Reports the target exchange name.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Reports the kind of the target exchange.
    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    /// Reports the routing key.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Exposes the payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Reports the delivery mode.
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }

    /// Exposes the headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Reports the content type, if set.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Reports the content encoding, if set.
    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    /// Reports the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Reports the message ID, if set.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Lossy UTF-8 preview of the payload, for logging.
    pub(crate) fn byte_preview(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Builds an [`OutboundMessage`] incrementally and validates it on the final
/// stage.
#[derive(Debug, Default)]
pub struct OutboundMessageBuilder {
    exchange: String,
    kind: Option<ExchangeKind>,
    routing_key: String,
    payload: Vec<u8>,
    delivery_mode: DeliveryMode,
    headers: Headers,
    content_type: Option<String>,
    content_encoding: Option<String>,
    correlation_id: Option<String>,
    message_id: Option<String>,
}

impl OutboundMessageBuilder {
    /// Creates a new [`OutboundMessage`] builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target exchange name.
    pub fn with_exchange(self, exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            ..self
        }
    }

    /// Sets the kind of the target exchange.
    pub fn with_kind(self, kind: ExchangeKind) -> Self {
        Self {
            kind: Some(kind),
            ..self
        }
    }

    /// Sets the routing key.
    pub fn with_routing_key(self, routing_key: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            ..self
        }
    }

    /// Moves the given bytes into the payload.
    pub fn with_payload(self, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..self
        }
    }

    /// Serializes the given value to JSON and uses it as the payload, also
    /// setting the content type to `application/json`.
    #[cfg(feature = "json")]
    pub fn with_json<T>(self, value: &T) -> Result<Self, serde_json::Error>
    where
        T: serde::Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value)?;

        Ok(Self {
            payload,
            content_type: Some("application/json".to_string()),
            ..self
        })
    }

    /// Sets the delivery mode.
    pub fn with_delivery_mode(self, delivery_mode: DeliveryMode) -> Self {
        Self {
            delivery_mode,
            ..self
        }
    }

    /// Shorthand for [persistent](DeliveryMode::Persistent) delivery.
    pub fn persistent(self) -> Self {
        self.with_delivery_mode(DeliveryMode::Persistent)
    }

    /// Inserts a single header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Header>) -> Self {
        self.headers.insert(key.into(), value.into());

        self
    }

    /// Replaces all headers.
    pub fn with_headers(self, headers: Headers) -> Self {
        Self { headers, ..self }
    }

    /// Sets the content type.
    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..self
        }
    }

    /// Sets the content encoding.
    pub fn with_content_encoding(self, content_encoding: impl Into<String>) -> Self {
        Self {
            content_encoding: Some(content_encoding.into()),
            ..self
        }
    }

    /// Sets the correlation ID.
    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..self
        }
    }

    /// Sets the message ID.
    pub fn with_message_id(self, message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ..self
        }
    }

    /// Finalizes the builder, validates its state, and, assuming valid state,
    /// returns the [`OutboundMessage`].
    pub fn build(self) -> Result<OutboundMessage, MessageError> {
        if self.exchange.is_empty() {
            return Err(MessageError::ExchangeRequired);
        }

        let Some(kind) = self.kind else {
            return Err(MessageError::KindRequired {
                exchange: self.exchange,
            });
        };

        if self.routing_key.is_empty() && kind.requires_routing_key() {
            return Err(MessageError::RoutingKeyRequired {
                exchange: self.exchange,
                kind,
            });
        }

        Ok(OutboundMessage {
            exchange: self.exchange,
            kind,
            routing_key: self.routing_key,
            payload: self.payload,
            delivery_mode: self.delivery_mode,
            headers: self.headers,
            content_type: self.content_type,
            content_encoding: self.content_encoding,
            correlation_id: self.correlation_id,
            message_id: self.message_id,
        })
    }
}
