use crate::error::StoreError;
use crate::store::{Challenge, ChallengeStore};
use anyhow::anyhow;
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use tracing::{debug, error};

const COLUMN_DOMAIN: &str = "domain";
const COLUMN_KEY_AUTH: &str = "keyAuth";
/// Partition key of the table
const COLUMN_TOKEN: &str = "token";

/// Error codes DynamoDB uses to signal throughput exhaustion
const RATE_LIMIT_ERROR_CODES: [&str; 3] = [
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "ThrottlingException",
];
const NOT_FOUND_ERROR_CODE: &str = "ResourceNotFoundException";

/// [`ChallengeStore`] backed by a DynamoDB table with a string partition key `token`.
#[derive(Debug, Clone)]
pub struct DynamoDbStore {
    client: Client,
    table: String,
}

impl DynamoDbStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl ChallengeStore for DynamoDbStore {
    async fn put(&self, challenge: &Challenge) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table)
            .item(COLUMN_DOMAIN, AttributeValue::S(challenge.domain.clone()))
            .item(COLUMN_TOKEN, AttributeValue::S(challenge.token.clone()))
            .item(COLUMN_KEY_AUTH, AttributeValue::S(challenge.key_auth.clone()))
            .send()
            .await
            .map_err(|e| store_error(e, Operation::Put))?;
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Challenge, StoreError> {
        // The writer ran in another process moments ago; an eventually consistent read may not see it yet.
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(COLUMN_TOKEN, AttributeValue::S(token.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| store_error(e, Operation::Get))?;
        let item = output.item().ok_or(StoreError::NotFound)?;
        Ok(Challenge::new(
            string_attribute(item, COLUMN_DOMAIN)?,
            token,
            string_attribute(item, COLUMN_KEY_AUTH)?,
        ))
    }

    async fn delete(&self, token: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key(COLUMN_TOKEN, AttributeValue::S(token.to_string()))
            .send()
            .await
            .map_err(|e| store_error(e, Operation::Delete))?;
        Ok(())
    }
}

fn string_attribute(
    item: &HashMap<String, AttributeValue>,
    column: &str,
) -> Result<String, StoreError> {
    item.get(column)
        .and_then(|value| value.as_s().ok())
        .cloned()
        .ok_or_else(|| {
            StoreError::Backend(anyhow!(
                "Stored challenge is missing string attribute {column}"
            ))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Put,
    Get,
    Delete,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Put => write!(f, "PutItem"),
            Operation::Get => write!(f, "GetItem"),
            Operation::Delete => write!(f, "DeleteItem"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    RateLimited,
    NotFound,
    Other,
}

/// Only a lookup may treat a missing table as a missing challenge. Writes and deletes against
/// a missing table are misconfiguration.
fn classify_error_code(code: Option<&str>, operation: Operation) -> ErrorClass {
    match code {
        Some(code) if RATE_LIMIT_ERROR_CODES.contains(&code) => ErrorClass::RateLimited,
        Some(NOT_FOUND_ERROR_CODE) if operation == Operation::Get => ErrorClass::NotFound,
        _ => ErrorClass::Other,
    }
}

fn store_error<E, R>(err: SdkError<E, R>, operation: Operation) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug + Send + Sync + 'static,
{
    let code = err
        .as_service_error()
        .and_then(|service_error| service_error.code())
        .map(str::to_string);
    debug!("DynamoDB {operation} failed with error code {code:?}");
    match classify_error_code(code.as_deref(), operation) {
        ErrorClass::RateLimited => StoreError::RateLimited,
        ErrorClass::NotFound => StoreError::NotFound,
        ErrorClass::Other => {
            error!("DynamoDB {operation} failed: {err}");
            StoreError::Backend(err.into())
        }
    }
}
