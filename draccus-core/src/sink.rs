//! The [Sink] drains the queue: it runs one or more polling loops against a [QueueTransport],
//! hands every non-empty receive to a [BatchHandler], and deletes messages from the queue only when
//! the handler's owner calls [Sink::acknowledge].
//!
//! Each polling loop is a small state machine:
//! ```text
//!            +-----------------------------------------------+
//!            v                                               |
//!   (receive) --messages--> [reset backoff] --> (handle) ----+
//!       |
//!       +--empty/error--> (stop when empty?) --no--> (sleep backoff) --+
//!                                |                                     |
//!                               yes --> (queue counts) --drained--> [Stopped]
//!                                                |                     |
//!                                                +--not drained/err----+
//! ```
//! The loop never issues the next receive before `handle` returned, so every loop has at most one
//! batch outstanding. The backoff grows by [EMPTY_POLL_DELAY_STEP] up to [MAX_EMPTY_POLL_DELAY]
//! and is private to its loop; the received/acknowledged totals are shared by all loops.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use backoff::strategy::linear::Linear;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::message::{Message, ReceiptHandle};
use crate::store::Acknowledge;
use crate::transport::{DeleteEntry, QueueTransport, ReceiveRequest};

pub const DEFAULT_MAX_MESSAGES: i32 = 10;
pub const DEFAULT_WAIT_TIME_SECONDS: i32 = 10;
pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: i32 = 90;

pub const EMPTY_POLL_DELAY_STEP: Duration = Duration::from_secs(2);
pub const MAX_EMPTY_POLL_DELAY: Duration = Duration::from_secs(15);

/// Most handles a single batch delete accepts.
const ACK_CHUNK_SIZE: usize = draccus_sqs::MAX_BATCH_SIZE;

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub max_messages: i32,
    pub wait_time_seconds: i32,
    /// How long a received message stays leased before the queue may redeliver it.
    pub visibility_timeout_seconds: i32,
    /// Stop a loop once the queue reports nothing visible, in flight or delayed.
    pub stop_when_empty: bool,
    pub max_concurrent_receivers: usize,
    /// Terminate the process on unexpected errors. Only test harnesses turn this off.
    pub exit_on_errors: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            wait_time_seconds: DEFAULT_WAIT_TIME_SECONDS,
            visibility_timeout_seconds: DEFAULT_VISIBILITY_TIMEOUT_SECONDS,
            stop_when_empty: false,
            max_concurrent_receivers: 1,
            exit_on_errors: true,
        }
    }
}

/// Consumer of received batches, i.e. the [crate::store::Store].
#[trait_variant::make(BatchHandler: Send)]
#[allow(dead_code)]
pub trait LocalBatchHandler {
    /// Takes ownership of a batch. Returning is the signal for the calling loop to receive again,
    /// so implementations must not wait for persistence here. An error is a bug, not a transient
    /// condition.
    async fn handle(&self, batch: Vec<Message>) -> Result<()>;
}

/// Totals across all polling loops of one sink. Observability only.
#[derive(Debug, Default)]
pub struct SinkCounters {
    received: AtomicU64,
    acked: AtomicU64,
}

impl SinkCounters {
    pub fn total_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn total_acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    fn add_received(&self, count: u64) -> u64 {
        self.received.fetch_add(count, Ordering::Relaxed) + count
    }

    fn add_acked(&self, count: u64) -> u64 {
        self.acked.fetch_add(count, Ordering::Relaxed) + count
    }
}

/// Per-loop state.
#[derive(Debug)]
struct PollState {
    receiver: usize,
    backoff: Linear,
}

impl PollState {
    fn new(receiver: usize) -> Self {
        Self {
            receiver,
            backoff: Linear::new(Duration::ZERO, EMPTY_POLL_DELAY_STEP, MAX_EMPTY_POLL_DELAY),
        }
    }

    /// Delay the next retry will wait.
    fn empty_poll_delay(&self) -> Duration {
        self.backoff.current()
    }

    /// Hands out the current delay and grows it for the retry after.
    fn next_delay(&mut self) -> Duration {
        self.backoff.next().unwrap_or(MAX_EMPTY_POLL_DELAY)
    }

    fn reset(&mut self) {
        self.backoff.reset();
    }
}

struct SinkInner<T> {
    transport: T,
    config: SinkConfig,
    counters: SinkCounters,
    receiving: AtomicBool,
}

/// Cheap to clone; clones share transport, configuration and counters.
pub struct Sink<T> {
    inner: Arc<SinkInner<T>>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Sink<T>
where
    T: QueueTransport + Send + Sync + 'static,
{
    pub fn new(transport: T, config: SinkConfig) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                transport,
                config,
                counters: SinkCounters::default(),
                receiving: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.inner.receiving.load(Ordering::SeqCst)
    }

    pub fn counters(&self) -> &SinkCounters {
        &self.inner.counters
    }

    /// Runs `max_concurrent_receivers` polling loops until every loop stopped, either because the
    /// queue is drained (when `stop_when_empty`) or because `cln_token` was cancelled.
    ///
    /// An error from the handler or a panicking loop is fatal: with `exit_on_errors` the process
    /// exits with status 1, otherwise the remaining loops are cancelled and [Error::Fatal] is
    /// returned.
    pub async fn run<H>(&self, handler: H, cln_token: CancellationToken) -> Result<()>
    where
        H: BatchHandler + Clone + Sync + 'static,
    {
        if self.inner.receiving.swap(true, Ordering::SeqCst) {
            warn!("Sink is already receiving messages");
            return Ok(());
        }

        let receivers = self.inner.config.max_concurrent_receivers.max(1);
        info!(
            receivers,
            stop_when_empty = self.inner.config.stop_when_empty,
            "Checking queue for messages"
        );

        let loops_token = cln_token.child_token();
        let mut loops = JoinSet::new();
        for receiver in 0..receivers {
            loops.spawn(
                self.clone()
                    .poll_loop(handler.clone(), receiver, loops_token.clone()),
            );
        }

        let mut outcome = Ok(());
        while let Some(joined) = loops.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(Error::Fatal(format!("Polling loop terminated abnormally: {e}")))
            });
            if let Err(e) = result
                && outcome.is_ok()
            {
                outcome = Err(self.fail(e));
                loops_token.cancel();
            }
        }

        self.inner.receiving.store(false, Ordering::SeqCst);
        info!(
            total_received = self.inner.counters.total_received(),
            total_acked = self.inner.counters.total_acked(),
            "Stopped polling"
        );
        outcome
    }

    /// Deletes `handles` from the queue in chunks of at most 10, in input order, one batch delete
    /// per chunk. Failed entries are logged and left alone: their lease runs out and the queue
    /// delivers them again.
    pub async fn acknowledge(&self, handles: Vec<ReceiptHandle>) {
        if handles.is_empty() {
            return;
        }
        let deletes = handles
            .chunks(ACK_CHUNK_SIZE)
            .map(|chunk| self.acknowledge_chunk(chunk));
        futures::future::join_all(deletes).await;
    }

    async fn acknowledge_chunk(&self, handles: &[ReceiptHandle]) {
        let entries = handles
            .iter()
            .enumerate()
            .map(|(index, handle)| DeleteEntry {
                id: index.to_string(),
                handle: handle.clone(),
            })
            .collect();

        let outcome = match self.inner.transport.delete_batch(entries).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(?e, count = handles.len(), "Failed to remove messages from queue");
                return;
            }
        };

        let total_acked = self
            .inner
            .counters
            .add_acked(outcome.succeeded.len() as u64);

        if outcome.failed.is_empty() {
            info!(
                count = outcome.succeeded.len(),
                total_acked, "Messages removed from queue"
            );
            return;
        }

        for failed in &outcome.failed {
            let handle = failed
                .id
                .parse::<usize>()
                .ok()
                .and_then(|index| handles.get(index));
            error!(
                id = %failed.id,
                handle = ?handle.map(ReceiptHandle::as_str),
                code = %failed.code,
                message = ?failed.message,
                sender_fault = failed.sender_fault,
                "Failed to remove message from queue"
            );
        }
        warn!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            total_acked,
            "Messages partially removed from queue, failed ones will be redelivered"
        );
    }

    fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest {
            max_messages: self.inner.config.max_messages,
            wait_time_seconds: self.inner.config.wait_time_seconds,
            visibility_timeout_seconds: self.inner.config.visibility_timeout_seconds,
        }
    }

    async fn poll_loop<H>(self, handler: H, receiver: usize, cln_token: CancellationToken) -> Result<()>
    where
        H: BatchHandler + Sync,
    {
        let mut state = PollState::new(receiver);
        let request = self.receive_request();

        loop {
            let received = tokio::select! {
                biased;
                _ = cln_token.cancelled() => {
                    debug!(receiver, "Polling cancelled");
                    return Ok(());
                }
                result = self.inner.transport.receive(request) => result,
            };

            match received {
                Ok(messages) if !messages.is_empty() => {
                    let count = messages.len();
                    let total_received = self.inner.counters.add_received(count as u64);
                    info!(receiver, count, total_received, "Messages received");

                    state.reset();
                    handler
                        .handle(messages)
                        .await
                        .map_err(|e| Error::Fatal(format!("Failed to hand over batch: {e}")))?;
                    continue;
                }
                Ok(_) => {
                    debug!(receiver, "No messages received");
                    if self.inner.config.stop_when_empty && self.queue_is_drained(receiver).await {
                        info!(
                            receiver,
                            total_received = self.inner.counters.total_received(),
                            total_acked = self.inner.counters.total_acked(),
                            "The queue is empty, stopping polling"
                        );
                        return Ok(());
                    }
                }
                Err(e) => {
                    error!(?e, receiver, "Failed receiving messages");
                }
            }

            let delay = state.next_delay();
            debug!(
                receiver = state.receiver,
                delay_secs = delay.as_secs(),
                next_delay_secs = state.empty_poll_delay().as_secs(),
                "Backing off before next receive"
            );
            tokio::select! {
                biased;
                _ = cln_token.cancelled() => {
                    debug!(receiver, "Polling cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Asks the queue whether anything is left that a later receive could return.
    async fn queue_is_drained(&self, receiver: usize) -> bool {
        let counts = match self.inner.transport.queue_counts().await {
            Ok(counts) => counts,
            Err(e) => {
                error!(?e, receiver, "Failed querying queue attributes");
                return false;
            }
        };

        if counts.visible != 0 {
            info!(receiver, count = counts.visible, "Messages still in the queue, retrying");
        } else if counts.delayed != 0 {
            info!(receiver, count = counts.delayed, "Delayed messages, waiting");
        } else if counts.in_flight != 0 {
            info!(receiver, count = counts.in_flight, "Invisible messages, waiting");
        }
        counts.is_drained()
    }

    #[allow(clippy::exit)]
    fn fail(&self, err: Error) -> Error {
        error!(?err, "Unexpected error while polling");
        if self.inner.config.exit_on_errors {
            std::process::exit(1);
        }
        err
    }
}

impl<T> Acknowledge for Sink<T>
where
    T: QueueTransport + Send + Sync + 'static,
{
    async fn acknowledge(&self, handles: Vec<ReceiptHandle>) {
        Sink::acknowledge(self, handles).await
    }
}
