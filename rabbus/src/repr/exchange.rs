use lapin::ExchangeKind as LapinExchangeKind;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Represents the supported kinds of exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// A **direct** exchange delivers messages to queues based on the message
    /// routing key.
    Direct,

    /// **Topic** exchanges route messages to one or many queues based on
    /// matching between a message routing key and the pattern that was used to
    /// bind a queue to an exchange.
    Topic,

    /// A **fanout** exchange routes messages to all the queues that are bound
    /// to it, and the routing key is ignored.
    #[serde(alias = "fan")]
    Fanout,

    /// A **headers** exchange is designed for routing on multiple attributes
    /// that are more easily expressed as message headers than a routing key.
    #[serde(alias = "header")]
    Headers,
}

/// Indicates a string that does not name any known [`ExchangeKind`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown exchange kind '{0}': expected one of 'direct', 'topic', 'fanout', 'headers'")]
pub struct UnknownExchangeKind(pub String);

impl ExchangeKind {
    /// Reports whether exchanges of this kind route by key, so that bindings
    /// and outgoing messages need a non-empty one.
    pub fn requires_routing_key(&self) -> bool {
        match self {
            ExchangeKind::Direct | ExchangeKind::Topic => true,
            ExchangeKind::Fanout | ExchangeKind::Headers => false,
        }
    }

    /// Returns the [`lapin::ExchangeKind`] value corresponding to this exchange
    /// kind.
    pub fn lapin_value(&self) -> LapinExchangeKind {
        match self {
            Self::Direct => LapinExchangeKind::Direct,
            Self::Topic => LapinExchangeKind::Topic,
            Self::Fanout => LapinExchangeKind::Fanout,
            Self::Headers => LapinExchangeKind::Headers,
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = UnknownExchangeKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ExchangeKind::Direct),
            "topic" => Ok(ExchangeKind::Topic),
            "fanout" | "fan" => Ok(ExchangeKind::Fanout),
            "headers" | "header" => Ok(ExchangeKind::Headers),
            _ => Err(UnknownExchangeKind(value.to_string())),
        }
    }
}

impl Display for ExchangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Headers => "headers",
        })
    }
}
