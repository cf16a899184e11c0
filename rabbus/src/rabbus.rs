use crate::emission::pipeline::Pipeline;
use crate::resilience::retrier::Retrier;
use crate::{
    CircuitBreaker, CircuitState, ConfigError, EmitSender, LapinTransport, ListenConfig,
    ListenError, OutcomeReceiver, Published, PublishingError, RabbusConfig, Subscription,
    Transport, TransportError,
};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The resilient emission and subscription façade over a single broker
/// [`Transport`].
///
/// ## Emission
///
/// Messages are enqueued through the [`EmitSender`] returned from
/// [`emit_async`](Rabbus::emit_async), and are published by a single
/// background worker, in FIFO order, through a shared [`CircuitBreaker`] and a
/// bounded retry loop. Every enqueued message yields exactly one outcome:
/// either on [`emit_ok`](Rabbus::emit_ok) or on [`emit_err`](Rabbus::emit_err).
///
/// ## Subscription
///
/// [`listen`](Rabbus::listen) validates a [`ListenConfig`], registers a
/// consumer on the transport, and returns a [`Subscription`] stream of
/// acknowledgeable messages.
///
/// ## Shutdown
///
/// [`close`](Rabbus::close) stops the emission worker, ends every
/// subscription, and closes the transport. Both result channels must be read
/// until they end, or the worker may block while reporting cancelled messages.
pub struct Rabbus {
    name: Arc<str>,
    config: RabbusConfig,
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    pipeline: Pipeline,
    shutdown: CancellationToken,
    feeders: SyncMutex<Vec<JoinHandle<()>>>,
}

/// Represents a failure to construct a [`Rabbus`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RabbusError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport could not be set up.
    #[error("failed to set up the broker transport: {0}")]
    Transport(#[from] TransportError),
}

/// Represents a failure to close a [`Rabbus`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseError {
    /// The instance has already been closed.
    #[error("the instance is already closed")]
    AlreadyClosed,

    /// The transport failed to release its resources.
    #[error("failed to close the broker transport: {0}")]
    Transport(#[from] TransportError),
}

impl Rabbus {
    /// Connects to the broker described by the given config through a
    /// [`LapinTransport`], and starts the emission worker.
    pub async fn connect(config: RabbusConfig) -> Result<Self, RabbusError> {
        let transport = LapinTransport::connect(&config).await?;

        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Starts the emission worker over the given transport.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_transport(config: RabbusConfig, transport: Arc<dyn Transport>) -> Self {
        let name: Arc<str> = Arc::from(config.name());
        let shutdown = CancellationToken::new();
        let breaker = Arc::new(CircuitBreaker::new(&name, *config.breaker()));

        let pipeline_shutdown = shutdown.child_token();
        let retrier = Retrier::new(
            name.clone(),
            transport.clone(),
            breaker.clone(),
            config.retry().clone(),
            config.publish_timeout(),
            pipeline_shutdown.clone(),
        );
        let pipeline = Pipeline::spawn(
            name.clone(),
            retrier,
            pipeline_shutdown,
            config.queue_capacity(),
            config.outcome_capacity(),
        );

        info!(
            rabbus = name.as_ref(),
            identifier = config.identifier(),
            "Started the emission worker",
        );

        Self {
            name,
            config,
            transport,
            breaker,
            pipeline,
            shutdown,
            feeders: SyncMutex::new(Vec::new()),
        }
    }

    /// Reports the name of this instance.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exposes the config this instance was started with.
    pub fn config(&self) -> &RabbusConfig {
        &self.config
    }

    /// Returns the enqueue side of the emission pipeline.
    pub fn emit_async(&self) -> EmitSender {
        self.pipeline.sender()
    }

    /// Returns the channel of successfully published messages.
    pub fn emit_ok(&self) -> OutcomeReceiver<Published> {
        self.pipeline.ok()
    }

    /// Returns the channel of messages that could not be published.
    pub fn emit_err(&self) -> OutcomeReceiver<PublishingError> {
        self.pipeline.err()
    }

    /// Reports the current state of the circuit breaker.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Subscribes to the state transitions of the circuit breaker.
    pub fn breaker_transitions(&self) -> watch::Receiver<CircuitState> {
        self.breaker.subscribe()
    }

    /// Reports whether this instance has been closed.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.pipeline.is_closed()
    }

    /// Validates the given config and starts consuming from the broker.
    ///
    /// Nothing reaches the transport unless the config is valid.
    pub async fn listen(&self, config: ListenConfig) -> Result<Subscription, ListenError> {
        if self.is_closed() {
            return Err(ListenError::Closed);
        }

        let route = config.validate(self.config.durable())?;

        let consumption = self.transport.consume(&route).await.map_err(|error| {
            error!(
                alert = true,
                rabbus = self.name.as_ref(),
                exchange = route.exchange(),
                queue = route.queue(),
                ?error,
                error_message = %error,
                "Failed to start consuming",
            );
            ListenError::from(error)
        })?;

        let (subscription, feeder) = Subscription::spawn(
            self.transport.clone(),
            route,
            consumption,
            self.config.delivery_capacity(),
            self.shutdown.child_token(),
        );

        let mut feeders = self.feeders.lock();
        feeders.retain(|feeder| !feeder.is_finished());
        feeders.push(feeder);

        Ok(subscription)
    }

    /// Closes the emission pipeline, every subscription, and the transport.
    ///
    /// Queued messages are reported as cancelled on the err channel; keep
    /// reading both result channels until they end.
    pub async fn close(&self) -> Result<(), CloseError> {
        self.pipeline.close().await?;
        self.shutdown.cancel();

        let feeders = std::mem::take(&mut *self.feeders.lock());
        for feeder in feeders {
            if let Err(error) = feeder.await {
                error!(
                    alert = true,
                    rabbus = self.name.as_ref(),
                    ?error,
                    error_message = %error,
                    "A subscription feeder did not exit cleanly",
                );
            }
        }

        self.transport.close().await?;

        info!(rabbus = self.name.as_ref(), "Closed");

        Ok(())
    }
}
