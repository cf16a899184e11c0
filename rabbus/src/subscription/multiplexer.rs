use crate::transport::Consumption;
use crate::{InboundMessage, ListenRoute, Transport, TransportError};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A live consumer on a broker queue, yielding [`InboundMessage`]s.
///
/// Implements [`Stream`]. The stream ends when the subscription is
/// [closed](Subscription::close), when the owning [`Rabbus`](crate::Rabbus)
/// is closed, or when the broker ends the consumer. Dropping the subscription
/// cancels the consumer on the broker.
pub struct Subscription {
    consumer_tag: Arc<str>,
    route: ListenRoute,
    deliveries: mpsc::Receiver<Result<InboundMessage, DeliveryError>>,
    cancel: CancellationToken,
}

/// Represents a single delivery that could not be received. The subscription
/// goes on after it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to receive a delivery on consumer '{consumer_tag}': {source}")]
pub struct DeliveryError {
    /// The tag of the affected consumer.
    pub consumer_tag: String,
    /// The underlying transport error.
    pub source: TransportError,
}

impl Subscription {
    /// Spawns the task that moves deliveries from the given [`Consumption`]
    /// into a new [`Subscription`]. The task cancels the consumer on the
    /// transport once the given token is cancelled.
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        route: ListenRoute,
        consumption: Consumption,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let consumer_tag: Arc<str> = Arc::from(consumption.consumer_tag.as_str());
        let (sender, receiver) = mpsc::channel(capacity);

        let feeder = Feeder {
            transport,
            consumer_tag: consumer_tag.clone(),
            sender,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(feeder.run(consumption));

        debug!(
            consumer = consumer_tag.as_ref(),
            exchange = route.exchange(),
            queue = route.queue(),
            "Started consuming",
        );

        let subscription = Self {
            consumer_tag,
            route,
            deliveries: receiver,
            cancel,
        };

        (subscription, handle)
    }

    /// Reports the consumer tag on the broker.
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Exposes the validated route of this subscription.
    pub fn route(&self) -> &ListenRoute {
        &self.route
    }

    /// Receives the next delivery, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Result<InboundMessage, DeliveryError>> {
        self.deliveries.recv().await
    }

    /// Cancels the consumer. Deliveries already buffered can still be
    /// received, though finalizing them may fail once the transport has closed
    /// the consumer's channel.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.deliveries.close();
    }

    /// Reports whether this subscription has been closed, either directly or
    /// through its owning instance.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for Subscription {
    type Item = Result<InboundMessage, DeliveryError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.deliveries.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Feeder {
    transport: Arc<dyn Transport>,
    consumer_tag: Arc<str>,
    sender: mpsc::Sender<Result<InboundMessage, DeliveryError>>,
    cancel: CancellationToken,
}

impl Feeder {
    async fn run(self, consumption: Consumption) {
        let mut deliveries = consumption.deliveries;
        let mut ended_by_broker = false;

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = deliveries.next() => match item {
                    Some(item) => item,
                    None => {
                        ended_by_broker = true;
                        break;
                    }
                },
            };

            let item = match item {
                Ok(delivery) => Ok(InboundMessage::new(self.consumer_tag.clone(), delivery)),
                Err(source) => Err(DeliveryError {
                    consumer_tag: self.consumer_tag.to_string(),
                    source,
                }),
            };

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = self.sender.reserve() => permit.ok(),
            };

            match permit {
                Some(permit) => permit.send(item),
                None => {
                    // Nobody will see this delivery, give it back to the queue
                    if let Ok(message) = item {
                        let delivery_tag = message.delivery_tag();
                        if let Err(error) = message.reject(true).await {
                            warn!(
                                alert = true,
                                consumer = self.consumer_tag.as_ref(),
                                delivery_tag,
                                ?error,
                                error_message = %error,
                                "Failed to requeue an undelivered message",
                            );
                        }
                    }
                    break;
                }
            }
        }

        drop(deliveries);

        if ended_by_broker {
            debug!(
                consumer = self.consumer_tag.as_ref(),
                "The broker ended the consumer",
            );
        }

        match self.transport.cancel(&self.consumer_tag).await {
            Ok(()) => debug!(consumer = self.consumer_tag.as_ref(), "Cancelled consumer"),
            Err(error) => warn!(
                alert = true,
                consumer = self.consumer_tag.as_ref(),
                ?error,
                error_message = %error,
                "Failed to cancel a consumer",
            ),
        }
    }
}
