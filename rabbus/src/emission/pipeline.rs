use crate::resilience::retrier::{Attempted, Retrier};
use crate::{CloseError, EmitError, OutboundMessage, Published, PublishingError, PublishingFailure};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The enqueue side of the emission pipeline.
///
/// Cheap to clone; all clones feed the same bounded queue, which is drained by
/// a single worker in FIFO order.
#[derive(Clone)]
pub struct EmitSender {
    queue: mpsc::Sender<OutboundMessage>,
    closed: CancellationToken,
}

/// One of the two result channels of the emission pipeline.
///
/// Cheap to clone; every item is delivered to exactly one reader. The channel
/// ends (yields `None`) once the pipeline is closed and every outcome has been
/// read.
pub struct OutcomeReceiver<T> {
    inner: Arc<AsyncMutex<mpsc::Receiver<T>>>,
}

/// Owns the worker task that drains the queue through the [`Retrier`] and
/// reports every message on exactly one of the two result channels.
pub(crate) struct Pipeline {
    sender: EmitSender,
    ok: OutcomeReceiver<Published>,
    err: OutcomeReceiver<PublishingError>,
    shutdown: CancellationToken,
    worker: SyncMutex<Option<JoinHandle<()>>>,
}

struct Worker {
    name: Arc<str>,
    queue: mpsc::Receiver<OutboundMessage>,
    retrier: Retrier,
    ok: mpsc::Sender<Published>,
    err: mpsc::Sender<PublishingError>,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Spawns the worker on the current runtime.
    pub(crate) fn spawn(
        name: Arc<str>,
        retrier: Retrier,
        shutdown: CancellationToken,
        queue_capacity: usize,
        outcome_capacity: usize,
    ) -> Self {
        let (queue_sender, queue_receiver) = mpsc::channel(queue_capacity);
        let (ok_sender, ok_receiver) = mpsc::channel(outcome_capacity);
        let (err_sender, err_receiver) = mpsc::channel(outcome_capacity);

        let worker = Worker {
            name,
            queue: queue_receiver,
            retrier,
            ok: ok_sender,
            err: err_sender,
            shutdown: shutdown.clone(),
        };
        let worker = tokio::spawn(worker.run());

        Self {
            sender: EmitSender {
                queue: queue_sender,
                closed: shutdown.clone(),
            },
            ok: OutcomeReceiver::new(ok_receiver),
            err: OutcomeReceiver::new(err_receiver),
            shutdown,
            worker: SyncMutex::new(Some(worker)),
        }
    }

    pub(crate) fn sender(&self) -> EmitSender {
        self.sender.clone()
    }

    pub(crate) fn ok(&self) -> OutcomeReceiver<Published> {
        self.ok.clone()
    }

    pub(crate) fn err(&self) -> OutcomeReceiver<PublishingError> {
        self.err.clone()
    }

    /// Stops accepting messages, lets the in-flight message finish, reports
    /// every queued message as [cancelled](PublishingFailure::Cancelled), and
    /// waits for the worker to exit.
    ///
    /// The worker blocks on full result channels, so somebody must keep
    /// reading them until they end, or this method never returns.
    pub(crate) async fn close(&self) -> Result<(), CloseError> {
        let Some(worker) = self.worker.lock().take() else {
            return Err(CloseError::AlreadyClosed);
        };

        self.shutdown.cancel();

        if let Err(error) = worker.await {
            error!(
                alert = true,
                ?error,
                error_message = %error,
                "The emission worker did not exit cleanly",
            );
        }

        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Worker {
    async fn run(mut self) {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                message = self.queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let Attempted { attempts, result } = self.retrier.publish(&message).await;

            match result {
                Ok(()) => self.report_ok(Published::new(message, attempts)).await,
                Err(failure) => {
                    self.report_err(PublishingError::new(message, failure, attempts))
                        .await
                }
            }
        }

        // Refuse further messages but drain what is already queued
        self.queue.close();

        let mut cancelled = 0usize;
        while let Some(message) = self.queue.recv().await {
            cancelled += 1;
            self.report_err(PublishingError::new(
                message,
                PublishingFailure::Cancelled,
                0,
            ))
            .await;
        }

        info!(
            rabbus = self.name.as_ref(),
            cancelled, "Emission pipeline closed",
        );
    }

    async fn report_ok(&self, published: Published) {
        if self.ok.send(published).await.is_err() {
            warn!(
                rabbus = self.name.as_ref(),
                "Dropping a publishing outcome: nobody is listening on the ok channel",
            );
        }
    }

    async fn report_err(&self, publishing_error: PublishingError) {
        error!(
            alert = true,
            rabbus = self.name.as_ref(),
            exchange = publishing_error.message().exchange(),
            routing_key = publishing_error.message().routing_key(),
            attempts = publishing_error.attempts(),
            error_message = %publishing_error.failure(),
            byte_preview = publishing_error.message().byte_preview().as_str(),
            "Failed to publish a message",
        );

        if self.err.send(publishing_error).await.is_err() {
            warn!(
                rabbus = self.name.as_ref(),
                "Dropping a publishing outcome: nobody is listening on the err channel",
            );
        }
    }
}

impl EmitSender {
    /// Enqueues the given message, waiting for a free slot while the queue is
    /// full. Returns the message back if the pipeline is closed before it
    /// could be enqueued.
    pub async fn emit(&self, message: OutboundMessage) -> Result<(), EmitError> {
        if self.closed.is_cancelled() {
            return Err(EmitError::Closed(message));
        }

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(EmitError::Closed(message)),
            permit = self.queue.reserve() => match permit {
                Ok(permit) => {
                    permit.send(message);
                    Ok(())
                }
                Err(_) => Err(EmitError::Closed(message)),
            },
        }
    }

    /// Enqueues the given message without waiting. Returns the message back if
    /// the queue is full or the pipeline is closed.
    pub fn try_emit(&self, message: OutboundMessage) -> Result<(), EmitError> {
        if self.closed.is_cancelled() {
            return Err(EmitError::Closed(message));
        }

        self.queue.try_send(message).map_err(|error| match error {
            TrySendError::Full(message) => EmitError::Full(message),
            TrySendError::Closed(message) => EmitError::Closed(message),
        })
    }

    /// Reports whether the pipeline stopped accepting messages.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.queue.is_closed()
    }
}

impl<T> OutcomeReceiver<T> {
    fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(AsyncMutex::new(receiver)),
        }
    }

    /// Receives the next outcome, or `None` once the pipeline is closed and
    /// the channel is drained.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }

    /// Receives the next outcome if one is immediately available.
    pub fn try_recv(&self) -> Option<T> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }
}

impl<T> Clone for OutcomeReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
