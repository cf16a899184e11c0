use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use rabbus::{
    Acker, Consumption, DeliveryProperties, ExchangeKind, ListenRoute, OutboundMessage,
    RawDelivery, Transport, TransportError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

type DeliverySender = mpsc::UnboundedSender<Result<RawDelivery, TransportError>>;

/// An in-memory broker: routes published messages into bound queues, hands
/// them to at most one consumer per queue, and re-queues rejected messages.
pub struct MemoryBroker {
    shared: Arc<Mutex<State>>,
    gate: watch::Sender<bool>,
}

struct State {
    reachable: bool,
    failures_left: u32,
    publish_calls: u32,
    next_delivery_tag: u64,
    next_consumer: u64,
    bindings: Vec<Binding>,
    queues: HashMap<String, Queue>,
    cancelled: Vec<String>,
    acked: Vec<String>,
    closed: bool,
}

struct Binding {
    exchange: String,
    kind: ExchangeKind,
    key: String,
    queue: String,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Stored>,
    consumer: Option<(String, DeliverySender)>,
}

#[derive(Clone)]
struct Stored {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

struct MemoryAcker {
    shared: Arc<Mutex<State>>,
    queue: String,
    stored: Stored,
}

impl MemoryBroker {
    /// A reachable broker with an open publishing gate.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(State {
                reachable: true,
                failures_left: 0,
                publish_calls: 0,
                next_delivery_tag: 1,
                next_consumer: 0,
                bindings: Vec::new(),
                queues: HashMap::new(),
                cancelled: Vec::new(),
                acked: Vec::new(),
                closed: false,
            })),
            gate: watch::Sender::new(true),
        }
    }

    /// A broker that refuses every publish.
    pub fn unreachable() -> Self {
        let broker = Self::new();
        broker.set_reachable(false);

        broker
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.shared.lock().reachable = reachable;
    }

    /// Makes the next `count` publishes fail.
    pub fn fail_next(&self, count: u32) {
        self.shared.lock().failures_left = count;
    }

    /// Holds every publish until [`resume`](MemoryBroker::resume) is called.
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Counts publish calls, including those still held by the gate.
    pub fn publish_calls(&self) -> u32 {
        self.shared.lock().publish_calls
    }

    /// Counts the queue bindings created by consumers.
    pub fn bindings(&self) -> usize {
        self.shared.lock().bindings.len()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.shared.lock().cancelled.clone()
    }

    /// Lists the payloads of acknowledged messages.
    pub fn acked(&self) -> Vec<String> {
        self.shared.lock().acked.clone()
    }

    /// Counts the messages waiting in the given queue for a consumer.
    pub fn ready(&self, queue: &str) -> usize {
        self.shared
            .lock()
            .queues
            .get(queue)
            .map_or(0, |queue| queue.ready.len())
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.shared.lock().publish_calls += 1;

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(TransportError::Closed);
        }

        let mut state = self.shared.lock();

        if state.closed {
            return Err(TransportError::Closed);
        }

        if !state.reachable {
            return Err(TransportError::BrokerUnavailable(
                "connection refused".to_string(),
            ));
        }

        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(TransportError::BrokerUnavailable(
                "connection reset".to_string(),
            ));
        }

        let queues = state
            .bindings
            .iter()
            .filter(|binding| binding.routes(message))
            .map(|binding| binding.queue.clone())
            .collect::<Vec<_>>();

        for queue in queues {
            let stored = Stored {
                exchange: message.exchange().to_string(),
                routing_key: message.routing_key().to_string(),
                body: message.payload().to_vec(),
                redelivered: false,
            };
            dispatch(&self.shared, &mut state, &queue, stored);
        }

        Ok(())
    }

    async fn consume(&self, route: &ListenRoute) -> Result<Consumption, TransportError> {
        let mut state = self.shared.lock();

        if state.closed {
            return Err(TransportError::Closed);
        }

        state.bindings.push(Binding {
            exchange: route.exchange().to_string(),
            kind: route.kind(),
            key: route.routing_key().to_string(),
            queue: route.queue().to_string(),
        });

        let consumer_tag = format!("memory.{}.{}", route.queue(), state.next_consumer);
        state.next_consumer += 1;

        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = state.queues.entry(route.queue().to_string()).or_default();
        queue.consumer = Some((consumer_tag.clone(), sender));
        let backlog = queue.ready.drain(..).collect::<Vec<_>>();

        for stored in backlog {
            dispatch(&self.shared, &mut state, route.queue(), stored);
        }

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
        let mut state = self.shared.lock();

        for queue in state.queues.values_mut() {
            if matches!(&queue.consumer, Some((tag, _)) if tag == consumer_tag) {
                queue.consumer = None;
            }
        }
        state.cancelled.push(consumer_tag.to_string());

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();

        state.closed = true;
        for queue in state.queues.values_mut() {
            queue.consumer = None;
        }

        Ok(())
    }
}

impl Binding {
    fn routes(&self, message: &OutboundMessage) -> bool {
        if self.exchange != message.exchange() {
            return false;
        }

        match self.kind {
            ExchangeKind::Direct => self.key == message.routing_key(),
            ExchangeKind::Topic => topic_matches(&self.key, message.routing_key()),
            ExchangeKind::Fanout | ExchangeKind::Headers => true,
        }
    }
}

/// Matches a routing key against a binding pattern with `*` (exactly one word)
/// and `#` (zero or more words).
fn topic_matches(pattern: &str, key: &str) -> bool {
    fn go(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| go(rest, &key[skip..])),
            Some((&"*", rest)) => !key.is_empty() && go(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && go(rest, &key[1..]),
        }
    }

    let pattern = pattern.split('.').collect::<Vec<_>>();
    let key = key.split('.').collect::<Vec<_>>();

    go(&pattern, &key)
}

/// Hands the message to the queue's consumer, or keeps it in the queue.
fn dispatch(shared: &Arc<Mutex<State>>, state: &mut State, queue: &str, stored: Stored) {
    let delivery_tag = state.next_delivery_tag;
    state.next_delivery_tag += 1;

    let entry = state.queues.entry(queue.to_string()).or_default();

    if let Some((_, sender)) = &entry.consumer {
        let delivery = RawDelivery {
            delivery_tag,
            exchange: stored.exchange.clone(),
            routing_key: stored.routing_key.clone(),
            redelivered: stored.redelivered,
            properties: DeliveryProperties::default(),
            body: stored.body.clone(),
            acker: Box::new(MemoryAcker {
                shared: shared.clone(),
                queue: queue.to_string(),
                stored: stored.clone(),
            }),
        };

        if sender.send(Ok(delivery)).is_ok() {
            return;
        }
    }

    entry.ready.push_back(stored);
}

impl MemoryAcker {
    fn settle(&self, requeue: bool) {
        if requeue {
            let stored = Stored {
                redelivered: true,
                ..self.stored.clone()
            };
            let mut state = self.shared.lock();
            dispatch(&self.shared, &mut state, &self.queue, stored);
        }
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self, _multiple: bool) -> Result<(), TransportError> {
        self.shared
            .lock()
            .acked
            .push(String::from_utf8_lossy(&self.stored.body).into_owned());

        Ok(())
    }

    async fn nack(&self, _multiple: bool, requeue: bool) -> Result<(), TransportError> {
        self.settle(requeue);

        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), TransportError> {
        self.settle(requeue);

        Ok(())
    }
}
