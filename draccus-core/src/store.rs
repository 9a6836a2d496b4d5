//! The [Store] decouples acknowledging messages from persisting them. Received batches are merged
//! into a [PendingBatch]; a one-shot timer flushes it through a [Writer], and only the messages of
//! a successfully written batch are acknowledged.
//!
//! ```text
//!   handle(batch) --Idle--> [arm timer] --> Scheduled --(flush interval)--> Flushing
//!                                                                              |
//!   Idle <---------------------- write ok: acknowledge / write err: drop ------+
//! ```
//! While a flush is in progress the timer stays disarmed. Messages arriving meanwhile wait in the
//! pending batch, and the timer is armed again by the first message that arrives after the flush
//! completed. A store that stops receiving after a flush therefore holds on to its tail until
//! [Store::drain] is called on shutdown.
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::message::{Message, PendingBatch, ReceiptHandle};
use crate::sink::BatchHandler;
use crate::writer::Writer;

pub mod filename;

pub use filename::FilenamePattern;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Deletes written messages from the queue, implemented by [crate::sink::Sink].
#[trait_variant::make(Acknowledge: Send)]
#[allow(dead_code)]
pub trait LocalAcknowledge {
    async fn acknowledge(&self, handles: Vec<ReceiptHandle>);
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub flush_interval: Duration,
    pub filename_pattern: FilenamePattern,
    /// Terminate the process when a flush task panics. Only test harnesses turn this off.
    pub exit_on_errors: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            filename_pattern: FilenamePattern::default(),
            exit_on_errors: true,
        }
    }
}

#[derive(Debug)]
enum FlushState {
    Idle,
    /// The timer is armed; cancelling the token disarms it.
    Scheduled(CancellationToken),
    Flushing,
}

#[derive(Debug)]
struct StoreState {
    pending: PendingBatch,
    flush: FlushState,
}

struct StoreInner<W, A> {
    writer: W,
    acker: A,
    config: StoreConfig,
    state: Mutex<StoreState>,
    /// Serializes flushes, so the timer flush and the final drain never write concurrently.
    flush_lock: tokio::sync::Mutex<()>,
}

pub struct Store<W, A> {
    inner: Arc<StoreInner<W, A>>,
}

impl<W, A> Clone for Store<W, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W, A> Store<W, A>
where
    W: Writer + Sync + 'static,
    A: Acknowledge + Sync + 'static,
{
    pub fn new(writer: W, acker: A, config: StoreConfig) -> Self {
        info!(
            flush_interval_secs = config.flush_interval.as_secs(),
            filename_pattern = config.filename_pattern.as_str(),
            "Writing messages in batches"
        );
        Self {
            inner: Arc::new(StoreInner {
                writer,
                acker,
                config,
                state: Mutex::new(StoreState {
                    pending: PendingBatch::default(),
                    flush: FlushState::Idle,
                }),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn is_flush_scheduled(&self) -> bool {
        matches!(self.inner.state.lock().flush, FlushState::Scheduled(_))
    }

    /// Number of messages waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn new_filename(&self) -> String {
        self.inner.config.filename_pattern.expand()
    }

    /// Merges `batch` into the pending batch and arms the flush timer unless a flush is already
    /// scheduled or running. Never waits for persistence.
    pub fn handle(&self, batch: Vec<Message>) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.pending.extend(batch);
        if matches!(state.flush, FlushState::Idle) {
            self.arm_flush_timer(&mut state)?;
        }
        Ok(())
    }

    /// Writes whatever is still pending and acknowledges it, after any in-flight flush finished.
    /// Called once the polling loops have stopped.
    pub async fn drain(&self) {
        {
            let mut state = self.inner.state.lock();
            if let FlushState::Scheduled(timer) = &state.flush {
                timer.cancel();
                state.flush = FlushState::Idle;
            }
        }

        let _guard = self.inner.flush_lock.lock().await;
        let batch = std::mem::take(&mut self.inner.state.lock().pending);
        if !batch.is_empty() {
            info!(count = batch.len(), "Flushing remaining messages");
        }
        self.write_and_acknowledge(batch).await;
    }

    fn arm_flush_timer(&self, state: &mut StoreState) -> Result<()> {
        if !matches!(state.flush, FlushState::Idle) {
            return Err(Error::Store(format!(
                "flush timer armed while in state {:?}",
                state.flush
            )));
        }

        let timer = CancellationToken::new();
        let interval = self.inner.config.flush_interval;
        let store = self.clone();
        let disarmed = timer.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = disarmed.cancelled() => {}
                _ = tokio::time::sleep(interval) => {
                    let flush = tokio::spawn({
                        let store = store.clone();
                        async move { store.flush().await }
                    });
                    if let Err(e) = flush.await {
                        store.flush_failed(e);
                    }
                }
            }
        });

        debug!(interval_secs = interval.as_secs(), "Flush scheduled");
        state.flush = FlushState::Scheduled(timer);
        Ok(())
    }

    async fn flush(&self) {
        let _guard = self.inner.flush_lock.lock().await;
        let batch = {
            let mut state = self.inner.state.lock();
            state.flush = FlushState::Flushing;
            std::mem::take(&mut state.pending)
        };

        self.write_and_acknowledge(batch).await;

        let mut state = self.inner.state.lock();
        if matches!(state.flush, FlushState::Flushing) {
            state.flush = FlushState::Idle;
        }
        if !state.pending.is_empty() {
            debug!(
                count = state.pending.len(),
                "Messages arrived during flush, waiting for the next message to schedule a flush"
            );
        }
    }

    /// The flush task panicked in the writer or the acker. Its batch is gone from the store and
    /// the queue redelivers it once the leases expire.
    #[allow(clippy::exit)]
    fn flush_failed(&self, err: JoinError) {
        error!(?err, "Flush task terminated abnormally");
        if self.inner.config.exit_on_errors {
            std::process::exit(1);
        }
        let mut state = self.inner.state.lock();
        if matches!(state.flush, FlushState::Flushing) {
            state.flush = FlushState::Idle;
        }
    }

    async fn write_and_acknowledge(&self, batch: PendingBatch) {
        if batch.is_empty() {
            debug!("Nothing to flush");
            return;
        }

        let count = batch.len();
        let name = self.new_filename();
        match self.inner.writer.write(batch.serialize(), &name).await {
            Ok(identifier) => {
                info!(count, identifier, "Messages written");
                self.inner.acker.acknowledge(batch.into_handles()).await;
            }
            Err(e) => {
                // not acknowledged, the queue redelivers them once their visibility timeout expires
                error!(?e, count, name, "Failed to write messages");
            }
        }
    }
}

impl<W, A> BatchHandler for Store<W, A>
where
    W: Writer + Sync + 'static,
    A: Acknowledge + Sync + 'static,
{
    async fn handle(&self, batch: Vec<Message>) -> Result<()> {
        Store::handle(self, batch)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use bytes::Bytes;
    use tokio::sync::{Semaphore, mpsc};
    use tokio::time::Instant;

    use super::*;

    struct MockWriter {
        writes: mpsc::UnboundedSender<(Bytes, String)>,
        gate: Option<Arc<Semaphore>>,
        fail: bool,
    }

    impl Writer for MockWriter {
        async fn write(&self, data: Bytes, name: &str) -> Result<String> {
            let _ = self.writes.send((data, name.to_string()));
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            if self.fail {
                return Err(Error::Write("disk full".to_string()));
            }
            Ok(format!("mock://{name}"))
        }

        async fn verify_writable(&self) -> Result<bool> {
            Ok(true)
        }
    }

    struct MockAcker {
        acks: mpsc::UnboundedSender<(Instant, Vec<ReceiptHandle>)>,
    }

    impl Acknowledge for MockAcker {
        async fn acknowledge(&self, handles: Vec<ReceiptHandle>) {
            let _ = self.acks.send((Instant::now(), handles));
        }
    }

    struct Harness {
        store: Store<MockWriter, MockAcker>,
        writes: mpsc::UnboundedReceiver<(Bytes, String)>,
        acks: mpsc::UnboundedReceiver<(Instant, Vec<ReceiptHandle>)>,
    }

    fn harness(gate: Option<Arc<Semaphore>>, fail: bool) -> Harness {
        let (writes_tx, writes) = mpsc::unbounded_channel();
        let (acks_tx, acks) = mpsc::unbounded_channel();
        let store = Store::new(
            MockWriter {
                writes: writes_tx,
                gate,
                fail,
            },
            MockAcker { acks: acks_tx },
            StoreConfig {
                flush_interval: Duration::from_secs(60),
                filename_pattern: FilenamePattern::new("batch-%s.txt").unwrap(),
                exit_on_errors: false,
            },
        );
        Harness {
            store,
            writes,
            acks,
        }
    }

    fn handles(names: &[&str]) -> Vec<ReceiptHandle> {
        names.iter().map(|name| ReceiptHandle::from(*name)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_before_flush_are_coalesced() {
        let mut h = harness(None, false);
        let start = Instant::now();

        h.store.handle(vec![Message::new("A", "123")]).unwrap();
        assert!(h.store.is_flush_scheduled());

        tokio::time::sleep(Duration::from_secs(10)).await;
        h.store.handle(vec![Message::new("B", "456")]).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        h.store
            .handle(vec![Message::new("C", "789"), Message::new("D", "0AB")])
            .unwrap();
        assert_eq!(h.store.pending(), 4);

        let (acked_at, acked) = h.acks.recv().await.unwrap();
        assert_eq!(acked_at - start, Duration::from_secs(60));
        assert_eq!(acked, handles(&["A", "B", "C", "D"]));

        let (data, name) = h.writes.recv().await.unwrap();
        assert_eq!(data, Bytes::from("123\n456\n789\n0AB\n"));
        assert!(name.starts_with("batch-") && name.ends_with(".txt"));
        assert!(h.writes.try_recv().is_err(), "one write for the whole batch");

        assert!(!h.store.is_flush_scheduled());
        assert_eq!(h.store.pending(), 0);
    }

    #[tokio::test]
    async fn test_second_timer_is_an_error() {
        let h = harness(None, false);
        let mut state = h.store.inner.state.lock();
        h.store.arm_flush_timer(&mut state).unwrap();
        assert!(matches!(
            h.store.arm_flush_timer(&mut state),
            Err(Error::Store(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_does_not_rearm_scheduled_timer() {
        let mut h = harness(None, false);
        let start = Instant::now();

        for name in ["A", "B", "C"] {
            h.store.handle(vec![Message::new(name, name)]).unwrap();
            tokio::time::sleep(Duration::from_secs(25)).await;
        }

        // the timer armed by A fires at 60s and takes all three
        let (acked_at, acked) = h.acks.recv().await.unwrap();
        assert_eq!(acked_at - start, Duration::from_secs(60));
        assert_eq!(acked, handles(&["A", "B", "C"]));
        assert_eq!(h.writes.recv().await.unwrap().0, Bytes::from("A\nB\nC\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_does_not_acknowledge() {
        let mut h = harness(None, true);

        h.store
            .handle(vec![Message::new("A", "123"), Message::new("B", "456")])
            .unwrap();
        h.writes.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(h.acks.try_recv().is_err());
        assert!(!h.store.is_flush_scheduled());
        assert_eq!(h.store.pending(), 0, "failed batch is dropped, not re-queued");

        h.store.handle(vec![Message::new("C", "789")]).unwrap();
        assert!(h.store.is_flush_scheduled());
        assert_eq!(h.writes.recv().await.unwrap().0, Bytes::from("789\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_during_flush_wait_for_next_message() {
        let gate = Arc::new(Semaphore::new(0));
        let mut h = harness(Some(Arc::clone(&gate)), false);

        h.store.handle(vec![Message::new("A", "123")]).unwrap();
        h.writes.recv().await.unwrap();

        // flush in progress: the timer stays disarmed
        h.store.handle(vec![Message::new("B", "456")]).unwrap();
        assert!(!h.store.is_flush_scheduled());

        gate.add_permits(1);
        let (_, acked) = h.acks.recv().await.unwrap();
        assert_eq!(acked, handles(&["A"]));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(h.writes.try_recv().is_err(), "tail is held until the next message");
        assert!(!h.store.is_flush_scheduled());
        assert_eq!(h.store.pending(), 1);

        let rearmed_at = Instant::now();
        h.store.handle(vec![Message::new("C", "789")]).unwrap();
        assert!(h.store.is_flush_scheduled());
        gate.add_permits(1);

        let (data, _) = h.writes.recv().await.unwrap();
        assert_eq!(data, Bytes::from("456\n789\n"));
        let (acked_at, acked) = h.acks.recv().await.unwrap();
        assert_eq!(acked_at - rearmed_at, Duration::from_secs(60));
        assert_eq!(acked, handles(&["B", "C"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_flushes_tail_and_disarms_timer() {
        let mut h = harness(None, false);

        h.store
            .handle(vec![Message::new("A", "123"), Message::new("B", "456")])
            .unwrap();
        assert!(h.store.is_flush_scheduled());

        h.store.drain().await;
        assert!(!h.store.is_flush_scheduled());
        assert_eq!(h.writes.recv().await.unwrap().0, Bytes::from("123\n456\n"));
        assert_eq!(h.acks.recv().await.unwrap().1, handles(&["A", "B"]));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(h.writes.try_recv().is_err(), "cancelled timer must not flush");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_in_flight_flush() {
        let gate = Arc::new(Semaphore::new(0));
        let mut h = harness(Some(Arc::clone(&gate)), false);

        h.store.handle(vec![Message::new("A", "123")]).unwrap();
        h.writes.recv().await.unwrap();
        h.store.handle(vec![Message::new("B", "456")]).unwrap();

        let drain = tokio::spawn({
            let store = h.store.clone();
            async move { store.drain().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!drain.is_finished());

        gate.add_permits(2);
        drain.await.unwrap();

        assert_eq!(h.acks.recv().await.unwrap().1, handles(&["A"]));
        assert_eq!(h.writes.recv().await.unwrap().0, Bytes::from("456\n"));
        assert_eq!(h.acks.recv().await.unwrap().1, handles(&["B"]));
    }

    #[tokio::test]
    async fn test_drain_empty_store_writes_nothing() {
        let mut h = harness(None, false);
        h.store.drain().await;
        assert!(h.writes.try_recv().is_err());
        assert!(h.acks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_batch_handler_returns_immediately() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(Some(gate), false);

        BatchHandler::handle(&h.store, vec![Message::new("A", "123")])
            .await
            .unwrap();
        assert!(h.store.is_flush_scheduled());
        assert_eq!(h.store.pending(), 1);
    }

    /// Panics on its first write, then behaves.
    struct PanicOnceWriter {
        panicked: AtomicBool,
        writes: mpsc::UnboundedSender<Bytes>,
    }

    impl Writer for PanicOnceWriter {
        async fn write(&self, data: Bytes, name: &str) -> Result<String> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("writer bug");
            }
            let _ = self.writes.send(data);
            Ok(format!("mock://{name}"))
        }

        async fn verify_writable(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_recovers_from_panicked_flush() {
        let (writes_tx, mut writes) = mpsc::unbounded_channel();
        let (acks_tx, mut acks) = mpsc::unbounded_channel();
        let store = Store::new(
            PanicOnceWriter {
                panicked: AtomicBool::new(false),
                writes: writes_tx,
            },
            MockAcker { acks: acks_tx },
            StoreConfig {
                exit_on_errors: false,
                ..StoreConfig::default()
            },
        );

        store.handle(vec![Message::new("A", "123")]).unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(matches!(store.inner.state.lock().flush, FlushState::Idle));
        assert_eq!(store.pending(), 0, "the panicked batch is left to redelivery");
        assert!(acks.try_recv().is_err());

        let rearmed_at = Instant::now();
        store.handle(vec![Message::new("B", "456")]).unwrap();
        assert!(store.is_flush_scheduled());

        assert_eq!(writes.recv().await.unwrap(), Bytes::from("456\n"));
        let (acked_at, acked) = acks.recv().await.unwrap();
        assert_eq!(acked_at - rearmed_at, Duration::from_secs(60));
        assert_eq!(acked, handles(&["B"]));
    }
}
