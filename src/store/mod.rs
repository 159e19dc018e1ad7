//! Durable persistence of HTTP-01 challenges between the invocation that presents them and the
//! (entirely separate) invocation that answers the CA's validation request.

use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub mod dynamodb;

/// Everything needed to answer one HTTP-01 validation request. `token` is the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub domain: String,
    pub token: String,
    pub key_auth: String,
}

impl Challenge {
    pub fn new(
        domain: impl Into<String>,
        token: impl Into<String>,
        key_auth: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            token: token.into(),
            key_auth: key_auth.into(),
        }
    }
}

/// Key-value persistence of [`Challenge`]s, keyed by token.
///
/// Implementations must serve `get` with read-after-write consistency: the writer and the reader
/// are different processes with nothing else synchronizing them.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Inserts or replaces the challenge stored under `challenge.token`.
    async fn put(&self, challenge: &Challenge) -> Result<(), StoreError>;
    async fn get(&self, token: &str) -> Result<Challenge, StoreError>;
    /// Removes the challenge. Removing a token that does not exist succeeds.
    async fn delete(&self, token: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: ChallengeStore + ?Sized> ChallengeStore for Arc<T> {
    async fn put(&self, challenge: &Challenge) -> Result<(), StoreError> {
        (**self).put(challenge).await
    }

    async fn get(&self, token: &str) -> Result<Challenge, StoreError> {
        (**self).get(token).await
    }

    async fn delete(&self, token: &str) -> Result<(), StoreError> {
        (**self).delete(token).await
    }
}

/// Process-local store, for tests and single-process setups where presenter and responder
/// share memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.challenges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.lock().is_empty()
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn put(&self, challenge: &Challenge) -> Result<(), StoreError> {
        self.challenges
            .lock()
            .insert(challenge.token.clone(), challenge.clone());
        Ok(())
    }

    async fn get(&self, token: &str) -> Result<Challenge, StoreError> {
        self.challenges
            .lock()
            .get(token)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, token: &str) -> Result<(), StoreError> {
        self.challenges.lock().remove(token);
        Ok(())
    }
}
