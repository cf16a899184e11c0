use crate::transport::{Acker, Consumption, DeliveryProperties, RawDelivery};
use crate::{ListenRoute, OutboundMessage, Transport, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

type DeliverySender = mpsc::UnboundedSender<Result<RawDelivery, TransportError>>;

/// A [`Transport`] for unit tests: publishes follow a script, consumers are
/// fed by hand through [`deliver`](ScriptedTransport::deliver).
pub(crate) struct ScriptedTransport {
    script: SyncMutex<VecDeque<Result<(), TransportError>>>,
    fallback: Result<(), TransportError>,
    delay: Option<Duration>,
    attempts: AtomicU32,
    published: SyncMutex<Vec<OutboundMessage>>,
    consumers: SyncMutex<HashMap<String, DeliverySender>>,
    routes: SyncMutex<Vec<ListenRoute>>,
    cancelled: SyncMutex<Vec<String>>,
    finalized: Arc<SyncMutex<Vec<(u64, &'static str)>>>,
    next_tag: AtomicU64,
}

impl ScriptedTransport {
    pub(crate) fn healthy() -> Self {
        Self::scripted([])
    }

    pub(crate) fn failing() -> Self {
        Self {
            fallback: Err(TransportError::BrokerUnavailable(
                "connection refused".to_string(),
            )),
            ..Self::healthy()
        }
    }

    pub(crate) fn scripted(script: impl IntoIterator<Item = Result<(), TransportError>>) -> Self {
        Self {
            script: SyncMutex::new(script.into_iter().collect()),
            fallback: Ok(()),
            delay: None,
            attempts: AtomicU32::new(0),
            published: SyncMutex::new(Vec::new()),
            consumers: SyncMutex::new(HashMap::new()),
            routes: SyncMutex::new(Vec::new()),
            cancelled: SyncMutex::new(Vec::new()),
            finalized: Arc::new(SyncMutex::new(Vec::new())),
            next_tag: AtomicU64::new(1),
        }
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().clone()
    }

    pub(crate) fn routes(&self) -> Vec<ListenRoute> {
        self.routes.lock().clone()
    }

    pub(crate) fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    pub(crate) fn finalized(&self) -> Vec<(u64, &'static str)> {
        self.finalized.lock().clone()
    }

    /// Pushes a delivery (or a delivery error) to the consumer with the given
    /// tag. Returns `false` if no such consumer is registered.
    pub(crate) fn deliver(&self, consumer_tag: &str, item: Result<&str, TransportError>) -> bool {
        let Some(sender) = self.consumers.lock().get(consumer_tag).cloned() else {
            return false;
        };

        let item = item.map(|body| {
            let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst);

            RawDelivery {
                delivery_tag,
                exchange: "test_ex".to_string(),
                routing_key: "test_key".to_string(),
                redelivered: false,
                properties: DeliveryProperties::default(),
                body: body.as_bytes().to_vec(),
                acker: Box::new(RecordingAcker {
                    delivery_tag,
                    finalized: self.finalized.clone(),
                }),
            }
        });

        sender.send(item).is_ok()
    }
}

impl ScriptedTransport {
    /// Ends the delivery stream of the given consumer the way a broker-side
    /// cancellation would, without recording a cancel.
    pub(crate) fn end_consumer(&self, consumer_tag: &str) -> bool {
        self.consumers.lock().remove(consumer_tag).is_some()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if result.is_ok() {
            self.published.lock().push(message.clone());
        }

        result
    }

    async fn consume(&self, route: &ListenRoute) -> Result<Consumption, TransportError> {
        let consumer_tag = format!("ctag-{}", route.queue());
        let (sender, receiver) = mpsc::unbounded_channel();

        self.routes.lock().push(route.clone());
        self.consumers.lock().insert(consumer_tag.clone(), sender);

        let deliveries = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed();

        Ok(Consumption {
            consumer_tag,
            deliveries,
        })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        self.consumers.lock().remove(consumer_tag);
        self.cancelled.lock().push(consumer_tag.to_string());

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.consumers.lock().clear();

        Ok(())
    }
}

struct RecordingAcker {
    delivery_tag: u64,
    finalized: Arc<SyncMutex<Vec<(u64, &'static str)>>>,
}

#[async_trait]
impl Acker for RecordingAcker {
    async fn ack(&self, _multiple: bool) -> Result<(), TransportError> {
        self.finalized.lock().push((self.delivery_tag, "ack"));
        Ok(())
    }

    async fn nack(&self, _multiple: bool, _requeue: bool) -> Result<(), TransportError> {
        self.finalized.lock().push((self.delivery_tag, "nack"));
        Ok(())
    }

    async fn reject(&self, _requeue: bool) -> Result<(), TransportError> {
        self.finalized.lock().push((self.delivery_tag, "reject"));
        Ok(())
    }
}
