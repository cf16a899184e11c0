use crate::{ExchangeKind, Headers, TransportError, UnknownExchangeKind};
use serde::Deserialize;
use thiserror::Error;

/// Describes a subscription request: which exchange to bind to, how, and which
/// queue to consume from.
///
/// The exchange kind is kept as supplied by the caller (a string), and is only
/// parsed during validation. Nothing in this config reaches the broker before
/// it is validated into a [`ListenRoute`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    exchange: String,
    #[serde(alias = "type")]
    kind: String,
    #[serde(alias = "routing_key", alias = "binding_key")]
    key: String,
    queue: String,
    #[serde(alias = "passive")]
    passive_exchange: bool,
    #[serde(alias = "arguments")]
    declare_args: Headers,
    bind_args: Headers,
    #[serde(alias = "prefetch")]
    prefetch_count: Option<u16>,
}

/// A validated [`ListenConfig`], ready to be handed to a
/// [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenRoute {
    exchange: String,
    kind: ExchangeKind,
    routing_key: String,
    queue: String,
    durable: bool,
    passive_exchange: bool,
    declare_args: Headers,
    bind_args: Headers,
    prefetch_count: Option<u16>,
}

/// Represents the reasons a subscription could not be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenError {
    /// No exchange name was given.
    #[error("invalid subscription: expected a non-empty exchange name")]
    ExchangeRequired,

    /// No exchange kind was given.
    #[error("invalid subscription to exchange '{exchange}': expected an exchange kind")]
    KindRequired {
        /// Exchange name
        exchange: String,
    },

    /// The exchange kind is not one of the supported kinds.
    #[error("invalid subscription to exchange '{exchange}': {source}")]
    UnknownKind {
        /// Exchange name
        exchange: String,
        /// Parsing error
        source: UnknownExchangeKind,
    },

    /// No queue name was given.
    #[error("invalid subscription to exchange '{exchange}': expected a non-empty queue name")]
    QueueRequired {
        /// Exchange name
        exchange: String,
    },

    /// No routing key was given for an exchange kind that routes by key.
    #[error(
        "invalid subscription to {kind} exchange '{exchange}': expected a non-empty routing key"
    )]
    KeyRequired {
        /// Exchange name
        exchange: String,
        /// Exchange kind
        kind: ExchangeKind,
    },

    /// The [`Rabbus`](crate::Rabbus) instance is already closed.
    #[error("cannot subscribe: the instance is closed")]
    Closed,

    /// The transport failed to register the consumer.
    #[error("failed to register the consumer: {0}")]
    Transport(#[from] TransportError),
}

impl ListenConfig {
    /// Creates an empty [`ListenConfig`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the exchange name.
    pub fn with_exchange(self, exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            ..self
        }
    }

    /// Sets the exchange kind, e.g. `"direct"`.
    pub fn with_kind(self, kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..self
        }
    }

    /// Sets the routing (binding) key.
    pub fn with_key(self, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..self
        }
    }

    /// Sets the queue name.
    pub fn with_queue(self, queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..self
        }
    }

    /// Sets whether the exchange is declared passively (must already exist).
    pub fn with_passive_exchange(self, passive_exchange: bool) -> Self {
        Self {
            passive_exchange,
            ..self
        }
    }

    /// Sets extra arguments for the queue declaration.
    pub fn with_declare_args(self, declare_args: Headers) -> Self {
        Self {
            declare_args,
            ..self
        }
    }

    /// Sets extra arguments for the queue binding.
    pub fn with_bind_args(self, bind_args: Headers) -> Self {
        Self { bind_args, ..self }
    }

    /// Limits the number of unacknowledged deliveries on the consumer.
    pub fn with_prefetch_count(self, prefetch_count: u16) -> Self {
        Self {
            prefetch_count: Some(prefetch_count),
            ..self
        }
    }

    /// Validates this config into a [`ListenRoute`]. The first failed check
    /// wins, in this order: exchange, kind, queue, routing key.
    pub fn validate(&self, durable: bool) -> Result<ListenRoute, ListenError> {
        if self.exchange.is_empty() {
            return Err(ListenError::ExchangeRequired);
        }

        if self.kind.trim().is_empty() {
            return Err(ListenError::KindRequired {
                exchange: self.exchange.clone(),
            });
        }

        let kind = self
            .kind
            .parse::<ExchangeKind>()
            .map_err(|source| ListenError::UnknownKind {
                exchange: self.exchange.clone(),
                source,
            })?;

        if self.queue.is_empty() {
            return Err(ListenError::QueueRequired {
                exchange: self.exchange.clone(),
            });
        }

        if self.key.is_empty() && kind.requires_routing_key() {
            return Err(ListenError::KeyRequired {
                exchange: self.exchange.clone(),
                kind,
            });
        }

        Ok(ListenRoute {
            exchange: self.exchange.clone(),
            kind,
            routing_key: self.key.clone(),
            queue: self.queue.clone(),
            durable,
            passive_exchange: self.passive_exchange,
            declare_args: self.declare_args.clone(),
            bind_args: self.bind_args.clone(),
            prefetch_count: self.prefetch_count,
        })
    }
}

impl ListenRoute {
    /// Reports the exchange name.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Reports the exchange kind.
    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    /// Reports the binding key. May be empty for fanout and headers
    /// exchanges.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Reports the queue name.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Reports whether the exchange and queue are declared as durable.
    pub fn durable(&self) -> bool {
        self.durable
    }

    /// Reports whether the exchange is declared passively.
    pub fn passive_exchange(&self) -> bool {
        self.passive_exchange
    }

    /// Exposes the extra queue declaration arguments.
    pub fn declare_args(&self) -> &Headers {
        &self.declare_args
    }

    /// Exposes the extra binding arguments.
    pub fn bind_args(&self) -> &Headers {
        &self.bind_args
    }

    /// Reports the consumer prefetch count, if limited.
    pub fn prefetch_count(&self) -> Option<u16> {
        self.prefetch_count
    }
}
