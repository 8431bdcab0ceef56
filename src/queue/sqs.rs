//! AWS SQS queue client

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sqs::config::{Credentials as AwsCredentials, Region};
use aws_sdk_sqs::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::operation::send_message::SendMessageError;
use aws_sdk_sqs::types::{MessageAttributeValue, MessageSystemAttributeName};
use tracing::debug;

use crate::config::Config;
use crate::error::QueueError;
use crate::queue::{QueueClient, QueueMessage};
use crate::types::{LineId, MessageId, QueueUrl, ReceiptHandle};

/// Message attribute carrying the gateway's line id on sent messages
pub const LINE_ID_ATTRIBUTE: &str = "GatewayLineId";

/// Queue client backed by AWS SQS, with static credentials from the config
#[derive(Debug, Clone)]
pub struct SqsClient {
    client: aws_sdk_sqs::Client,
}

/// Error codes SQS returns for a request that is invalid as sent
const VALIDATION_CODES: &[&str] = &[
    "InvalidMessageContents",
    "InvalidParameterValue",
    "InvalidAttributeValue",
    "ValidationError",
];

fn service_error(err: impl Into<aws_sdk_sqs::Error>) -> QueueError {
    QueueError::Service(err.into().to_string())
}

/// Separate bodies SQS will never accept from failures worth retrying
fn send_error(err: SdkError<SendMessageError>) -> QueueError {
    let rejected = match err.as_service_error() {
        Some(SendMessageError::InvalidMessageContents(_)) => true,
        Some(other) => other.code().is_some_and(|code| VALIDATION_CODES.contains(&code)),
        None => false,
    };
    if rejected {
        QueueError::Rejected(aws_sdk_sqs::Error::from(err).to_string())
    } else {
        service_error(err)
    }
}

impl SqsClient {
    pub async fn from_config(config: &Config) -> Self {
        let credentials = AwsCredentials::new(
            config.credentials.access_key_id.clone(),
            config.credentials.secret_access_key.clone(),
            None,
            None,
            "sqs-irc-gateway",
        );
        let shared = aws_config::from_env()
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        Self {
            client: aws_sdk_sqs::Client::new(&shared),
        }
    }
}

#[async_trait]
impl QueueClient for SqsClient {
    async fn bind(&self, name: &str) -> Result<QueueUrl, QueueError> {
        let output = self
            .client
            .create_queue()
            .queue_name(name)
            .send()
            .await
            .map_err(service_error)?;

        output
            .queue_url()
            .map(|url| QueueUrl(url.to_string()))
            .ok_or_else(|| QueueError::Service(format!("no URL returned for queue '{name}'")))
    }

    async fn receive(
        &self,
        queue: &QueueUrl,
        wait: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&queue.0)
            .max_number_of_messages(1)
            .wait_time_seconds(wait.as_secs() as i32)
            .message_system_attribute_names(MessageSystemAttributeName::SenderId)
            .send()
            .await
            .map_err(service_error)?;

        let Some(message) = output.messages.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };

        let (Some(id), Some(receipt)) = (message.message_id, message.receipt_handle) else {
            return Err(QueueError::Service(
                "received message without id or receipt handle".to_string(),
            ));
        };

        debug!(message_id = %id, "received queue message");
        Ok(Some(QueueMessage {
            id: MessageId(id),
            body: message.body.unwrap_or_default(),
            receipt: ReceiptHandle(receipt),
            queue: queue.clone(),
        }))
    }

    async fn send(&self, queue: &QueueUrl, body: &str, line: LineId) -> Result<(), QueueError> {
        let line_id = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(line.to_string())
            .build()
            .map_err(|e| QueueError::Rejected(e.to_string()))?;

        self.client
            .send_message()
            .queue_url(&queue.0)
            .message_body(body)
            .message_attributes(LINE_ID_ATTRIBUTE, line_id)
            .send()
            .await
            .map_err(send_error)?;
        Ok(())
    }

    async fn delete(&self, queue: &QueueUrl, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&queue.0)
            .receipt_handle(&receipt.0)
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }
}
