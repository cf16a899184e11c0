use serde::Deserialize;

/// Defines the extent to which the broker must confirm a publish before the
/// [`Transport`](crate::Transport) reports it as successful.
///
/// If the confirmation level is set to the
/// [lowest level](ConfirmationLevel::Transmitted), then the confirmation is a
/// no-op, without any network communication. Any higher level enables
/// publisher confirms on the publishing channel, which implicitly switches to
/// an at-least-once guarantee: a message that is retried after a lost
/// confirmation may be published twice.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationLevel {
    /// Ensures network transmission.
    #[serde(alias = "transmit")]
    Transmitted,

    /// Ensures network transmission **and** exchange existence.
    #[default]
    #[serde(alias = "accept")]
    Accepted,

    /// Ensures network transmission **and** exchange existence **and** routing
    /// to at least one queue.
    #[serde(alias = "route")]
    Routed,
}

impl ConfirmationLevel {
    /// Reports whether this level requires publisher confirms to be enabled on
    /// the publishing channel.
    pub fn requires_publisher_confirms(&self) -> bool {
        match self {
            ConfirmationLevel::Transmitted => false,
            ConfirmationLevel::Accepted | ConfirmationLevel::Routed => true,
        }
    }

    /// Reports whether this level warrants a `mandatory` flag on the
    /// `basic.publish` call.
    pub fn requires_mandatory_publish(&self) -> bool {
        match self {
            ConfirmationLevel::Transmitted | ConfirmationLevel::Accepted => false,
            ConfirmationLevel::Routed => true,
        }
    }
}
