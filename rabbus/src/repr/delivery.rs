use serde::Deserialize;

/// Defines whether the broker persists a message to disk, which affects
/// whether such message is able to survive a broker restart.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Delivery mode `1`: non-persistent: messages sent with this mode will
    /// **not** survive a broker restart.
    #[default]
    #[serde(alias = "non_persistent")]
    Transient,
    /// Delivery mode `2`: persistent: messages sent with this mode will be
    /// written to disk and, if they are **also** routed to a **durable
    /// queue**, they **will** survive a broker restart.
    #[serde(alias = "durable")]
    Persistent,
}

impl DeliveryMode {
    /// Returns the appropriate `u8` value recognized by the broker.
    pub const fn amqp_value(&self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

impl From<u8> for DeliveryMode {
    fn from(value: u8) -> Self {
        match value {
            2 => DeliveryMode::Persistent,
            _ => DeliveryMode::Transient,
        }
    }
}
