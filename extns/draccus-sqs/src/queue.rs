//! A resolved SQS queue and the handful of calls draccus makes against it.
use std::collections::BTreeMap;

use aws_sdk_sqs::Client;
use aws_sdk_sqs::types::{
    BatchResultErrorEntry, DeleteMessageBatchRequestEntry, MessageSystemAttributeName,
    QueueAttributeName, SendMessageBatchRequestEntry,
};
use bytes::Bytes;
use serde::Serialize;

use crate::client::{SqsClientConfig, create_sqs_client};
use crate::{Error, MAX_BATCH_SIZE, Result, extract_aws_error};

/// A message as returned by a receive call, reduced to what the store needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub receipt_handle: String,
    /// The message body, or the whole message as JSON when the queue was built with
    /// [SqsQueueBuilder::raw_messages].
    pub payload: Bytes,
}

/// The full message record, serialized in raw mode. Field names follow the SQS wire format.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RawMessage<'a> {
    message_id: Option<&'a str>,
    receipt_handle: &'a str,
    #[serde(rename = "MD5OfBody")]
    md5_of_body: Option<&'a str>,
    body: &'a str,
    attributes: BTreeMap<String, &'a str>,
}

/// Approximate message counts reported by `GetQueueAttributes`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub visible: u64,
    pub in_flight: u64,
    pub delayed: u64,
}

/// A batch entry SQS refused, keyed by the request-local entry id.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedEntry {
    pub id: String,
    pub code: String,
    pub message: Option<String>,
    pub sender_fault: bool,
}

impl From<&BatchResultErrorEntry> for FailedEntry {
    fn from(entry: &BatchResultErrorEntry) -> Self {
        FailedEntry {
            id: entry.id().to_string(),
            code: entry.code().to_string(),
            message: entry.message().map(str::to_string),
            sender_fault: entry.sender_fault(),
        }
    }
}

/// Per-entry result of a batch call; ids are the request-local ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub successful: Vec<String>,
    pub failed: Vec<FailedEntry>,
}

/// Builder for [SqsQueue]. A pre-built client can be injected, otherwise one is created from the
/// client config.
pub struct SqsQueueBuilder {
    queue_name: String,
    config: Option<SqsClientConfig>,
    client: Option<Client>,
    raw_messages: bool,
}

impl SqsQueueBuilder {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            config: None,
            client: None,
            raw_messages: false,
        }
    }

    pub fn config(mut self, config: SqsClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Deliver the whole SQS message as JSON instead of just its body.
    pub fn raw_messages(mut self, raw_messages: bool) -> Self {
        self.raw_messages = raw_messages;
        self
    }

    /// Resolves the queue URL. Fails when the queue does not exist or cannot be reached.
    pub async fn build(self) -> Result<SqsQueue> {
        if self.queue_name.is_empty() {
            return Err(Error::InvalidConfig("queue name is required".to_string()));
        }

        let client = match (self.client, self.config) {
            (Some(client), _) => client,
            (None, Some(config)) => create_sqs_client(config).await?,
            (None, None) => {
                return Err(Error::InvalidConfig(
                    "either an SQS client or a client config is required".to_string(),
                ));
            }
        };

        let output = client
            .get_queue_url()
            .queue_name(&self.queue_name)
            .send()
            .await
            .map_err(|err| Error::Sqs(extract_aws_error(&err)))?;

        let queue_url = output
            .queue_url()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::Other(format!("Queue URL not found for {}", self.queue_name)))?
            .to_string();

        tracing::info!(queue_url = queue_url.clone(), "Queue URL found");

        Ok(SqsQueue {
            client,
            queue_url,
            raw_messages: self.raw_messages,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    raw_messages: bool,
}

impl SqsQueue {
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// One `ReceiveMessage` call. Long polls for up to `wait_time_seconds`; received messages stay
    /// invisible to other consumers for `visibility_timeout_seconds`.
    pub async fn receive_messages(
        &self,
        max_messages: i32,
        wait_time_seconds: i32,
        visibility_timeout_seconds: i32,
    ) -> Result<Vec<ReceivedMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_seconds)
            .visibility_timeout(visibility_timeout_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|err| Error::Sqs(extract_aws_error(&err)))?;

        let mut messages = Vec::with_capacity(output.messages().len());
        for msg in output.messages() {
            let Some(receipt_handle) = msg.receipt_handle() else {
                tracing::warn!(message_id = ?msg.message_id(), "Skipping message without receipt handle");
                continue;
            };
            let body = msg.body().unwrap_or_default();

            let payload = if self.raw_messages {
                let raw = RawMessage {
                    message_id: msg.message_id(),
                    receipt_handle,
                    md5_of_body: msg.md5_of_body(),
                    body,
                    attributes: msg
                        .attributes()
                        .map(|attrs| {
                            attrs
                                .iter()
                                .map(|(k, v)| (k.as_str().to_string(), v.as_str()))
                                .collect()
                        })
                        .unwrap_or_default(),
                };
                let json = serde_json::to_vec(&raw)
                    .map_err(|e| Error::Other(format!("Failed to serialize message: {e}")))?;
                Bytes::from(json)
            } else {
                Bytes::copy_from_slice(body.as_bytes())
            };

            messages.push(ReceivedMessage {
                receipt_handle: receipt_handle.to_string(),
                payload,
            });
        }
        Ok(messages)
    }

    /// One `DeleteMessageBatch` call for `(id, receipt_handle)` entries. SQS caps a batch at
    /// [MAX_BATCH_SIZE] entries; callers chunk.
    pub async fn delete_messages(&self, entries: Vec<(String, String)>) -> Result<BatchOutcome> {
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }
        if entries.len() > MAX_BATCH_SIZE {
            return Err(Error::Other(format!(
                "DeleteMessageBatch accepts at most {MAX_BATCH_SIZE} entries, got {}",
                entries.len()
            )));
        }

        let entries = entries
            .into_iter()
            .map(|(id, receipt_handle)| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(id)
                    .receipt_handle(receipt_handle)
                    .build()
                    .map_err(|e| Error::Other(format!("Failed to build delete entry: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|err| Error::Sqs(extract_aws_error(&err)))?;

        Ok(BatchOutcome {
            successful: output
                .successful()
                .iter()
                .map(|entry| entry.id().to_string())
                .collect(),
            failed: output.failed().iter().map(FailedEntry::from).collect(),
        })
    }

    /// Visible, in-flight and delayed counts. Attributes missing from the response count as zero.
    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesDelayed)
            .send()
            .await
            .map_err(|err| Error::Sqs(extract_aws_error(&err)))?;

        let Some(attributes) = output.attributes() else {
            return Ok(QueueCounts::default());
        };

        let count = |name: QueueAttributeName| -> Result<u64> {
            match attributes.get(&name) {
                None => Ok(0),
                Some(value) => value.parse::<u64>().map_err(|e| {
                    Error::Other(format!("Failed to parse {}={value}: {e}", name.as_str()))
                }),
            }
        };

        Ok(QueueCounts {
            visible: count(QueueAttributeName::ApproximateNumberOfMessages)?,
            in_flight: count(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)?,
            delayed: count(QueueAttributeName::ApproximateNumberOfMessagesDelayed)?,
        })
    }

    /// One `SendMessageBatch` call; entry ids are the positions in `bodies`.
    pub async fn send_messages(&self, bodies: Vec<String>) -> Result<BatchOutcome> {
        if bodies.is_empty() {
            return Ok(BatchOutcome::default());
        }
        if bodies.len() > MAX_BATCH_SIZE {
            return Err(Error::Other(format!(
                "SendMessageBatch accepts at most {MAX_BATCH_SIZE} entries, got {}",
                bodies.len()
            )));
        }

        let entries = bodies
            .into_iter()
            .enumerate()
            .map(|(index, body)| {
                SendMessageBatchRequestEntry::builder()
                    .id(index.to_string())
                    .message_body(body)
                    .build()
                    .map_err(|e| Error::Other(format!("Failed to build send entry: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|err| Error::Sqs(extract_aws_error(&err)))?;

        Ok(BatchOutcome {
            successful: output
                .successful()
                .iter()
                .map(|entry| entry.id().to_string())
                .collect(),
            failed: output.failed().iter().map(FailedEntry::from).collect(),
        })
    }
}
