use crate::common::broker::MemoryBroker;
use crate::common::names::{EXCHANGE, KEY, QUEUE};
use rabbus::{
    BreakerConfig, ExchangeKind, ListenConfig, OutboundMessage, OutcomeReceiver, Published,
    PublishingError, Rabbus, RabbusConfig, RetryConfig,
};
use std::sync::Arc;
use std::time::Duration;

/// A config with the given number of attempts and no backoff.
pub fn make_config(attempts: u32) -> RabbusConfig {
    RabbusConfig::builder()
        .with_name("test")
        .with_retry(RetryConfig::new(attempts))
        .build()
        .expect("hard-coded config should be valid")
}

/// A config with a single attempt per message and the given breaker policy.
pub fn make_breaker_config(threshold: u32, timeout: Duration) -> RabbusConfig {
    RabbusConfig::builder()
        .with_name("test")
        .with_retry(RetryConfig::new(1))
        .with_breaker(
            BreakerConfig::default()
                .with_threshold(threshold)
                .with_timeout(timeout),
        )
        .build()
        .expect("hard-coded config should be valid")
}

pub fn make_rabbus(config: RabbusConfig, broker: &Arc<MemoryBroker>) -> Rabbus {
    Rabbus::with_transport(config, broker.clone())
}

pub fn make_message(payload: &str) -> OutboundMessage {
    OutboundMessage::builder()
        .with_exchange(EXCHANGE)
        .with_kind(ExchangeKind::Direct)
        .with_routing_key(KEY)
        .with_payload(payload)
        .build()
        .expect("hard-coded message should be valid")
}

pub fn make_listen_config() -> ListenConfig {
    ListenConfig::new()
        .with_exchange(EXCHANGE)
        .with_kind("direct")
        .with_key(KEY)
        .with_queue(QUEUE)
}

/// Reads the given channel until it ends.
pub async fn drain<T>(receiver: OutcomeReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();

    while let Some(item) = receiver.recv().await {
        items.push(item);
    }

    items
}

/// Reads both result channels until they end.
pub async fn drain_outcomes(rabbus: &Rabbus) -> (Vec<Published>, Vec<PublishingError>) {
    tokio::join!(drain(rabbus.emit_ok()), drain(rabbus.emit_err()))
}

/// Extracts the payloads as strings.
pub fn payloads<'a>(messages: impl IntoIterator<Item = &'a OutboundMessage>) -> Vec<String> {
    messages
        .into_iter()
        .map(|message| String::from_utf8_lossy(message.payload()).into_owned())
        .collect()
}
