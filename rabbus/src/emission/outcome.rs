use crate::{OutboundMessage, TransportError};
use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;

/// Reports a message that was successfully published. Delivered on the
/// [ok channel](crate::Rabbus::emit_ok).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    message: OutboundMessage,
    attempts: u32,
}

/// Reports a message that could not be published. Delivered on the
/// [err channel](crate::Rabbus::emit_err).
///
/// The message is handed back, so that the caller may decide what to do with
/// it (e.g., store it for later, or publish it elsewhere).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct PublishingError {
    message: OutboundMessage,
    #[source]
    failure: PublishingFailure,
    attempts: u32,
}

/// Represents the reason a message ended up on the err channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishingFailure {
    /// The broker could not be reached or refused the message on the last
    /// attempt.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[source] TransportError),

    /// The last attempt did not complete within the configured deadline.
    #[error("publish attempt exceeded the deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// The circuit breaker refused the last attempt.
    #[error("the circuit breaker is open")]
    CircuitOpen,

    /// The pipeline was closed before the message could be published.
    #[error("the emission pipeline was closed before the message was published")]
    Cancelled,
}

/// Represents a message that could not be enqueued. The message is handed
/// back in either case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    /// The pipeline no longer accepts messages.
    #[error("the emission pipeline is closed")]
    Closed(OutboundMessage),

    /// The queue is at capacity. Only returned by
    /// [`try_emit`](crate::EmitSender::try_emit).
    #[error("the emission queue is full")]
    Full(OutboundMessage),
}

impl Published {
    pub(crate) fn new(message: OutboundMessage, attempts: u32) -> Self {
        Self { message, attempts }
    }

    /// Exposes the published message.
    pub fn message(&self) -> &OutboundMessage {
        &self.message
    }

    /// Reports how many attempts it took, including the successful one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Unwraps the published message.
    pub fn into_message(self) -> OutboundMessage {
        self.message
    }
}

impl PublishingError {
    pub(crate) fn new(message: OutboundMessage, failure: PublishingFailure, attempts: u32) -> Self {
        Self {
            message,
            failure,
            attempts,
        }
    }

    /// Exposes the message that was not published.
    pub fn message(&self) -> &OutboundMessage {
        &self.message
    }

    /// Reports the reason of the last failed attempt.
    pub fn failure(&self) -> &PublishingFailure {
        &self.failure
    }

    /// Reports how many attempts were made. Zero for messages that were still
    /// queued when the pipeline closed.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Unwraps the message that was not published.
    pub fn into_message(self) -> OutboundMessage {
        self.message
    }
}

impl Display for PublishingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to publish a message to exchange '{}' after {} attempt(s): {}",
            self.message.exchange(),
            self.attempts,
            self.failure,
        )
    }
}

impl EmitError {
    /// Unwraps the message that was not enqueued.
    pub fn into_message(self) -> OutboundMessage {
        match self {
            EmitError::Closed(message) | EmitError::Full(message) => message,
        }
    }
}
