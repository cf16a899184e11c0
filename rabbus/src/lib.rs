#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Exposes the top-level configuration and its nested policies.
mod config;
pub use self::config::{BreakerConfig, ConfigError, RabbusConfig, RabbusConfigBuilder, RetryConfig};

/// Exposes plain representations of AMQP concepts.
mod repr {
    pub mod confirmation;
    pub mod delivery;
    pub mod exchange;
    pub mod header;
}

// Re-export representation types
pub use self::repr::confirmation::ConfirmationLevel;
pub use self::repr::delivery::DeliveryMode;
pub use self::repr::exchange::{ExchangeKind, UnknownExchangeKind};
pub use self::repr::header::{Header, Headers};

/// Exposes the outgoing and incoming message types.
mod message {
    pub mod inbound;
    pub mod outbound;
}

// Re-export message types
pub use self::message::inbound::{FinalizationError, InboundMessage};
pub use self::message::outbound::{MessageError, OutboundMessage, OutboundMessageBuilder};

/// Exposes the broker abstraction and its `lapin` implementation.
mod transport;
pub use self::transport::amqp::LapinTransport;
pub use self::transport::{
    Acker, Consumption, DeliveryProperties, RawDelivery, Transport, TransportError,
};

/// Exposes the circuit breaker and the retry loop built around it.
mod resilience {
    pub mod breaker;
    pub mod retrier;
}
pub use self::resilience::breaker::{CircuitBreaker, CircuitState};

/// Exposes the asynchronous emission pipeline.
mod emission {
    pub mod outcome;
    pub mod pipeline;
}

// Re-export emission types
pub use self::emission::outcome::{EmitError, Published, PublishingError, PublishingFailure};
pub use self::emission::pipeline::{EmitSender, OutcomeReceiver};

/// Exposes validated subscriptions and their delivery streams.
mod subscription {
    pub mod listen;
    pub mod multiplexer;
}

// Re-export subscription types
pub use self::subscription::listen::{ListenConfig, ListenError, ListenRoute};
pub use self::subscription::multiplexer::{DeliveryError, Subscription};

/// Exposes the façade tying everything together.
mod rabbus;
pub use self::rabbus::{CloseError, Rabbus, RabbusError};

// Re-export the backoff policy as it is part of this crate’s API.
pub use rabbus_util::BackoffConfig;
