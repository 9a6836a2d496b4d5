//! Wires the queue, the [Sink] and the [Store] together for one drain, from queue resolution to
//! the final flush.
//!
//! ```text
//!   (resolve queue) --> (verify backend) --> Sink::run(Store) --> Store::drain --> [summary]
//!                                              ^
//!                     SIGINT / SIGTERM --------+ (cancel)
//! ```
use draccus_s3::{S3Bucket, create_s3_client};
use draccus_sqs::queue::SqsQueueBuilder;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Backend, Settings};
use crate::error::{Error, Result};
use crate::sink::{Sink, SinkConfig};
use crate::store::{Store, StoreConfig};
use crate::transport::QueueTransport;
use crate::writer::Writer;
use crate::writer::console::ConsoleWriter;
use crate::writer::file::FileWriter;

/// Totals of a finished drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub received: u64,
    pub acked: u64,
}

/// Drains the configured queue into the configured backend until the queue is empty (or forever in
/// daemon mode), stopping early on SIGINT/SIGTERM.
pub async fn run(settings: Settings) -> Result<DrainSummary> {
    let cln_token = CancellationToken::new();
    let shutdown_cln_token = cln_token.clone();

    // wait for SIG{INT,TERM} and invoke cancellation token.
    let shutdown_handle: JoinHandle<()> = tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_cln_token.cancel();
    });

    let result = start_drain(&settings, cln_token).await;
    if !shutdown_handle.is_finished() {
        shutdown_handle.abort();
    }

    match &result {
        Ok(summary) => info!(
            received = summary.received,
            acked = summary.acked,
            "Drain finished"
        ),
        Err(e) => error!(?e, "Drain failed"),
    }
    result
}

async fn start_drain(settings: &Settings, cln_token: CancellationToken) -> Result<DrainSummary> {
    let queue = SqsQueueBuilder::new(settings.queue_name.clone())
        .config(settings.sqs.clone())
        .raw_messages(settings.raw_messages)
        .build()
        .await
        .map_err(|e| {
            Error::Config(format!(
                "Unable to resolve queue {:?}: {e}",
                settings.queue_name
            ))
        })?;

    info!(
        queue_url = queue.queue_url(),
        backend = %settings.backend,
        "Draining queue"
    );

    let sink_config = settings.sink_config();
    let store_config = settings.store_config();
    match &settings.backend {
        Backend::S3 { bucket } => {
            let s3_config = settings.s3.clone().ok_or_else(|| {
                Error::Config("s3 backend selected without s3 client settings".to_string())
            })?;
            let bucket = S3Bucket::new(create_s3_client(s3_config).await?, bucket.clone());
            drain_with(queue, bucket, sink_config, store_config, cln_token).await
        }
        Backend::File { out_dir } => {
            let writer = FileWriter::new(out_dir.clone());
            drain_with(queue, writer, sink_config, store_config, cln_token).await
        }
        Backend::Console => {
            let writer = ConsoleWriter::stdout();
            drain_with(queue, writer, sink_config, store_config, cln_token).await
        }
    }
}

/// Runs the sink into a store backed by `writer`, then flushes whatever the store still holds.
/// A fatal sink error skips the final flush.
pub async fn drain_with<T, W>(
    transport: T,
    writer: W,
    sink_config: SinkConfig,
    store_config: StoreConfig,
    cln_token: CancellationToken,
) -> Result<DrainSummary>
where
    T: QueueTransport + Send + Sync + 'static,
    W: Writer + Sync + 'static,
{
    if !writer.verify_writable().await? {
        return Err(Error::Config("Output is not writable".to_string()));
    }

    let sink = Sink::new(transport, sink_config);
    let store = Store::new(writer, sink.clone(), store_config);

    sink.run(store.clone(), cln_token).await?;
    store.drain().await;

    Ok(DrainSummary {
        received: sink.counters().total_received(),
        acked: sink.counters().total_acked(),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("Received Ctrl+C signal");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal");
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
