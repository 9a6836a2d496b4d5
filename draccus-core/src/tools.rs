//! Operator tools that put messages into a queue: synthetic load for testing a drain, and replaying
//! previously drained lines.
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::info;

use crate::error::{Error, Result};

/// Entries per send call.
const SEND_BATCH_SIZE: usize = draccus_sqs::MAX_BATCH_SIZE;

/// Sends message bodies to a queue.
#[trait_variant::make(MessageSender: Send)]
#[allow(dead_code)]
pub trait LocalMessageSender {
    /// Sends at most 10 bodies in one call and returns how many the queue accepted.
    async fn send_batch(&self, bodies: Vec<String>) -> Result<usize>;
}

/// Sends `batches` batches of 10 numbered messages.
pub async fn fill_queue<S: MessageSender + Sync>(queue: &S, batches: usize) -> Result<usize> {
    let mut count = 0;
    for _ in 0..batches {
        let bodies = (count..count + SEND_BATCH_SIZE)
            .map(|i| format!("Random message numero {i}"))
            .collect();
        info!(from = count, to = count + SEND_BATCH_SIZE, "Creating messages");
        queue.send_batch(bodies).await?;
        count += SEND_BATCH_SIZE;
    }
    info!(count, "All done");
    Ok(count)
}

/// Sends every non-empty line of `input` as one message, 10 lines per call.
pub async fn replay<S, R>(queue: &S, input: R) -> Result<usize>
where
    S: MessageSender + Sync,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut batch = Vec::with_capacity(SEND_BATCH_SIZE);
    let mut sent = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Error::Config(format!("Unable to read messages: {e}")))?
    {
        if line.is_empty() {
            continue;
        }
        batch.push(line);
        if batch.len() == SEND_BATCH_SIZE {
            sent += queue.send_batch(std::mem::take(&mut batch)).await?;
            info!(sent, "Messages sent");
        }
    }
    if !batch.is_empty() {
        sent += queue.send_batch(batch).await?;
        info!(sent, "Messages sent");
    }

    info!(sent, "All done");
    Ok(sent)
}
