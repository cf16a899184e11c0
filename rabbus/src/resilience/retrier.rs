use crate::{CircuitBreaker, OutboundMessage, PublishingFailure, RetryConfig, Transport};
use rabbus_util::Backoff;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Publishes a single [`OutboundMessage`] up to a bounded number of times,
/// consulting the [`CircuitBreaker`] before every attempt.
///
/// Each call to [`publish`](Retrier::publish) owns a fresh [`Backoff`], so the
/// wait between attempts of one message never depends on another message.
pub(crate) struct Retrier {
    name: Arc<str>,
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    publish_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

/// The terminal result of retrying one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attempted {
    /// Number of attempts made, including those refused by the breaker.
    pub(crate) attempts: u32,
    pub(crate) result: Result<(), PublishingFailure>,
}

impl Retrier {
    pub(crate) fn new(
        name: Arc<str>,
        transport: Arc<dyn Transport>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryConfig,
        publish_timeout: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name,
            transport,
            breaker,
            retry,
            publish_timeout,
            shutdown,
        }
    }

    /// Attempts the given message until it is published, the attempts run
    /// out, or the shutdown token interrupts a wait between attempts.
    pub(crate) async fn publish(&self, message: &OutboundMessage) -> Attempted {
        let max_attempts = self.retry.attempts().max(1);
        let backoff = self.retry.backoff().map(Backoff::new);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let failure = match self.attempt(message).await {
                Ok(()) => {
                    return Attempted {
                        attempts,
                        result: Ok(()),
                    };
                }
                Err(failure) => failure,
            };

            warn!(
                rabbus = self.name.as_ref(),
                attempt = attempts,
                max_attempts,
                exchange = message.exchange(),
                routing_key = message.routing_key(),
                error_message = %failure,
                "Publish attempt failed",
            );

            if attempts >= max_attempts {
                return Attempted {
                    attempts,
                    result: Err(failure),
                };
            }

            if !self.wait(backoff.as_ref()).await {
                return Attempted {
                    attempts,
                    result: Err(PublishingFailure::Cancelled),
                };
            }
        }
    }

    /// Makes a single attempt, reporting its result to the breaker.
    async fn attempt(&self, message: &OutboundMessage) -> Result<(), PublishingFailure> {
        if !self.breaker.allow() {
            return Err(PublishingFailure::CircuitOpen);
        }

        let result = match self.publish_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.transport.publish(message)).await {
                    Ok(result) => result.map_err(PublishingFailure::BrokerUnavailable),
                    Err(_) => Err(PublishingFailure::DeadlineExceeded(deadline)),
                }
            }
            None => self
                .transport
                .publish(message)
                .await
                .map_err(PublishingFailure::BrokerUnavailable),
        };

        if result.is_ok() {
            self.breaker.report_success();
        } else {
            self.breaker.report_failure();
        }

        result
    }

    /// Waits out the next backoff interval. Returns `false` if shutdown was
    /// requested before or during the wait.
    async fn wait(&self, backoff: Option<&Backoff>) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }

        let Some(backoff) = backoff else {
            return true;
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = backoff.sleep_next() => true,
        }
    }
}
