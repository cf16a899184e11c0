use crate::transport::{Acker, Consumption, RawDelivery};
use crate::{ConfirmationLevel, ListenRoute, OutboundMessage, RabbusConfig, Transport, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker as LapinAcker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Error as LapinError};
use parking_lot::Mutex as SyncMutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, error, info, warn};

mod convert;

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

/// The production [`Transport`], speaking AMQP 0-9-1 through `lapin`.
///
/// ## Connection
///
/// Connects eagerly: [`connect`](LapinTransport::connect) fails if the broker
/// cannot be reached. A dropped connection is not re-established; every
/// subsequent operation reports the broker as
/// [unavailable](TransportError::BrokerUnavailable), which in turn trips the
/// circuit breaker.
///
/// ## Publishing
///
/// No more than one publishing [`Channel`] is kept, and it is re-created after
/// any channel-level failure. Publisher confirms are enabled on it whenever the
/// [`ConfirmationLevel`] requires them. Every exchange is declared the first
/// time a message is published to it on the current channel.
///
/// ## Consuming
///
/// Every consumer gets its own [`Channel`], which is closed when the consumer
/// is [cancelled](Transport::cancel).
pub struct LapinTransport {
    name: Arc<str>,
    identifier: Arc<str>,
    connection: Connection,
    durable: bool,
    confirmation: ConfirmationLevel,
    publishing: AsyncMutex<Option<PublishingChannel>>,
    consumers: SyncMutex<HashMap<String, Channel>>,
    consumer_counter: AtomicUsize,
    closed: AtomicBool,
}

/// A publishing channel plus the exchanges already declared on it.
struct PublishingChannel {
    channel: Channel,
    declared: HashSet<String>,
}

/// Finalizes a single delivery through its `lapin` acker.
struct AmqpAcker(LapinAcker);

impl LapinTransport {
    /// Connects to the broker described by the given config.
    pub async fn connect(config: &RabbusConfig) -> Result<Self, TransportError> {
        // Set up the connection properties to use the current Tokio context
        let connection_properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let connection = Connection::connect(config.dsn().unsecure(), connection_properties)
            .await
            .map_err(|error| {
                error!(
                    alert = true,
                    rabbus = config.name(),
                    identifier = config.identifier(),
                    ?error,
                    error_message = %error,
                    "Failed to connect to RabbitMQ",
                );
                unavailable(error)
            })?;

        info!(
            rabbus = config.name(),
            identifier = config.identifier(),
            "Connected to RabbitMQ",
        );

        Ok(Self {
            name: Arc::from(config.name()),
            identifier: Arc::from(config.identifier()),
            connection,
            durable: config.durable(),
            confirmation: config.confirmation(),
            publishing: AsyncMutex::new(None),
            consumers: SyncMutex::new(HashMap::new()),
            consumer_counter: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Reports the connection identifier (the DSN without the password).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Closes a consumer channel that never got registered.
    async fn discard_channel(&self, channel: &Channel, reason: &str) {
        if !channel.status().connected() {
            return;
        }

        if let Err(error) = channel.close(REPLY_SUCCESS, reason).await {
            warn!(
                alert = true,
                rabbus = self.name.as_ref(),
                ?error,
                error_message = %error,
                "Failed to close a discarded RabbitMQ channel",
            );
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        Ok(())
    }

    /// Takes the publishing channel from under the lock, or opens a fresh one.
    async fn grab_channel(
        &self,
    ) -> Result<(MutexGuard<'_, Option<PublishingChannel>>, PublishingChannel), TransportError>
    {
        let mut guard = self.publishing.lock().await;

        let publishing = match guard.take() {
            Some(publishing) => publishing,
            None => self.open_publishing_channel().await?,
        };

        Ok((guard, publishing))
    }

    async fn open_publishing_channel(&self) -> Result<PublishingChannel, TransportError> {
        let channel = self.connection.create_channel().await.map_err(|error| {
            error!(
                alert = true,
                rabbus = self.name.as_ref(),
                ?error,
                error_message = %error,
                "Failed to open a RabbitMQ channel for publishing",
            );
            unavailable(error)
        })?;

        if self.confirmation.requires_publisher_confirms() {
            channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await
                .map_err(|error| {
                    error!(
                        alert = true,
                        rabbus = self.name.as_ref(),
                        ?error,
                        error_message = %error,
                        "Failed to enable publisher confirms on a RabbitMQ channel",
                    );
                    unavailable(error)
                })?;
        }

        Ok(PublishingChannel {
            channel,
            declared: HashSet::new(),
        })
    }

    async fn try_publish(
        &self,
        publishing: &mut PublishingChannel,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        if !publishing.declared.contains(message.exchange()) {
            publishing
                .channel
                .exchange_declare(
                    message.exchange(),
                    message.kind().lapin_value(),
                    ExchangeDeclareOptions {
                        passive: false,
                        durable: self.durable,
                        auto_delete: false,
                        internal: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(unavailable)?;

            publishing.declared.insert(message.exchange().to_string());
        }

        let future_confirm = publishing
            .channel
            .basic_publish(
                message.exchange(),
                message.routing_key(),
                BasicPublishOptions {
                    mandatory: self.confirmation.requires_mandatory_publish(),
                    immediate: false, // this flag is not supported and ignored by RabbitMQ v3+
                },
                message.payload(),
                convert::basic_properties(message),
            )
            .await
            .map_err(unavailable)?;

        match future_confirm.await.map_err(unavailable)? {
            Confirmation::NotRequested | Confirmation::Ack(None) => Ok(()),
            Confirmation::Ack(Some(_returned)) => Err(TransportError::Unroutable {
                exchange: message.exchange().to_string(),
                routing_key: message.routing_key().to_string(),
            }),
            Confirmation::Nack(_) => Err(TransportError::NegativelyAcknowledged),
        }
    }

    async fn declare_route(&self, channel: &Channel, route: &ListenRoute) -> Result<(), LapinError> {
        if let Some(prefetch_count) = route.prefetch_count() {
            channel
                .basic_qos(prefetch_count, BasicQosOptions { global: false })
                .await?;
        }

        channel
            .exchange_declare(
                route.exchange(),
                route.kind().lapin_value(),
                ExchangeDeclareOptions {
                    passive: route.passive_exchange(),
                    durable: route.durable(),
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                route.queue(),
                QueueDeclareOptions {
                    passive: false,
                    durable: route.durable(),
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                convert::field_table(route.declare_args()),
            )
            .await?;

        channel
            .queue_bind(
                route.queue(),
                route.exchange(),
                route.routing_key(),
                QueueBindOptions { nowait: false },
                convert::field_table(route.bind_args()),
            )
            .await?;

        Ok(())
    }

    fn compose_consumer_tag(&self, route: &ListenRoute) -> String {
        let index = self.consumer_counter.fetch_add(1, Ordering::Relaxed);

        format!("{}.{}.{}", self.name, route.queue(), index)
    }
}

#[async_trait]
impl Transport for LapinTransport {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.ensure_open()?;

        let (mut guard, mut publishing) = self.grab_channel().await?;
        let result = self.try_publish(&mut publishing, message).await;

        // Keep the channel only while it is healthy
        if publishing.channel.status().connected() {
            *guard = Some(publishing);
        }
        drop(guard);

        if let Err(ref error) = result {
            error!(
                alert = true,
                rabbus = self.name.as_ref(),
                exchange = message.exchange(),
                routing_key = message.routing_key(),
                ?error,
                error_message = %error,
                byte_preview = message.byte_preview().as_str(),
                "Failed to publish a message to RabbitMQ",
            );
        }

        result
    }

    async fn consume(&self, route: &ListenRoute) -> Result<Consumption, TransportError> {
        self.ensure_open()?;

        let channel = self.connection.create_channel().await.map_err(unavailable)?;

        if let Err(error) = self.declare_route(&channel, route).await {
            error!(
                alert = true,
                rabbus = self.name.as_ref(),
                exchange = route.exchange(),
                queue = route.queue(),
                ?error,
                error_message = %error,
                "Failed to declare a RabbitMQ subscription route",
            );
            self.discard_channel(&channel, "declaration failed").await;

            return Err(unavailable(error));
        }

        let consumer_tag = self.compose_consumer_tag(route);
        let consumer = match channel
            .basic_consume(
                route.queue(),
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(error) => {
                self.discard_channel(&channel, "consume failed").await;

                return Err(unavailable(error));
            }
        };

        self.consumers.lock().insert(consumer_tag.clone(), channel);

        let deliveries = consumer
            .map(|result| result.map(raw_delivery).map_err(unavailable))
            .boxed();

        Ok(Consumption {
            consumer_tag,
            deliveries,
        })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), TransportError> {
        let channel = self.consumers.lock().remove(consumer_tag);
        let Some(channel) = channel else {
            return Ok(());
        };

        if !channel.status().connected() {
            return Ok(());
        }

        channel
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await
            .map_err(unavailable)?;
        channel
            .close(REPLY_SUCCESS, "consumer cancelled")
            .await
            .map_err(unavailable)?;

        debug!(
            rabbus = self.name.as_ref(),
            consumer = consumer_tag,
            "Closed a RabbitMQ consumer channel",
        );

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }

        self.publishing.lock().await.take();
        self.consumers.lock().clear();

        if !self.connection.status().connected() {
            return Ok(());
        }

        self.connection
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(unavailable)?;

        info!(
            rabbus = self.name.as_ref(),
            identifier = self.identifier.as_ref(),
            "Disconnected from RabbitMQ",
        );

        Ok(())
    }
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self, multiple: bool) -> Result<(), TransportError> {
        self.0
            .ack(BasicAckOptions { multiple })
            .await
            .map_err(unavailable)
    }

    async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), TransportError> {
        self.0
            .nack(BasicNackOptions { multiple, requeue })
            .await
            .map_err(unavailable)
    }

    async fn reject(&self, requeue: bool) -> Result<(), TransportError> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(unavailable)
    }
}

fn raw_delivery(delivery: Delivery) -> RawDelivery {
    let Delivery {
        delivery_tag,
        exchange,
        routing_key,
        redelivered,
        properties,
        data,
        acker,
    } = delivery;

    RawDelivery {
        delivery_tag,
        exchange: exchange.as_str().to_string(),
        routing_key: routing_key.as_str().to_string(),
        redelivered,
        properties: convert::delivery_properties(&properties),
        body: data,
        acker: Box::new(AmqpAcker(acker)),
    }
}

fn unavailable(error: LapinError) -> TransportError {
    TransportError::BrokerUnavailable(error.to_string())
}
