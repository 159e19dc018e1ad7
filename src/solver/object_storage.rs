use crate::solver::{ChallengeKind, ChallengeSolver, challenge_path};
use crate::time::humanize_duration_core;
use anyhow::{Context, Error};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Minimal object-storage surface needed to publish HTTP-01 proofs.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Uploads `body` as a publicly readable object.
    async fn put_public_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), Error>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error>;
}

#[async_trait]
impl<T: ObjectStorage + ?Sized> ObjectStorage for Arc<T> {
    async fn put_public_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), Error> {
        (**self).put_public_object(bucket, key, body).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        (**self).delete_object(bucket, key).await
    }
}

#[derive(Debug, Clone)]
pub struct S3ObjectStorage {
    client: Client,
}

impl S3ObjectStorage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn put_public_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), Error> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .body(ByteStream::from(body.to_vec()))
            .send()
            .await
            .with_context(|| format!("Uploading s3://{bucket}/{key} failed"))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Deleting s3://{bucket}/{key} failed"))?;
        Ok(())
    }
}

/// In-process object storage. Objects are keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put_public_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), Error> {
        self.objects
            .lock()
            .insert((bucket.to_string(), key.to_string()), body.to_vec());
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        self.objects
            .lock()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// HTTP-01 solver that writes the proof straight into a bucket named exactly like the domain,
/// which is assumed to back the domain's website.
pub struct ObjectStorageSolver<O> {
    storage: O,
    delay: Duration,
}

impl<O: ObjectStorage> ObjectStorageSolver<O> {
    pub fn new(storage: O) -> Self {
        Self {
            storage,
            delay: Duration::ZERO,
        }
    }

    /// Wait this long after each upload, for storage that replicates asynchronously.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl<O: ObjectStorage> ChallengeSolver for ObjectStorageSolver<O> {
    fn long_name(&self) -> &'static str {
        "object storage solver"
    }

    fn short_name(&self) -> &'static str {
        "object-storage"
    }

    fn challenge_kind(&self) -> ChallengeKind {
        ChallengeKind::Http01
    }

    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), Error> {
        let key = challenge_path(token);
        info!("Uploading HTTP-01 proof for {domain} to bucket {domain} at {key}");
        self.storage
            .put_public_object(domain, &key, key_auth.as_bytes())
            .await?;
        if !self.delay.is_zero() {
            if let Ok(delay) = humanize_duration_core(self.delay) {
                debug!("Waiting {delay} for the proof to replicate");
            }
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }

    async fn clean_up(&self, domain: &str, token: &str, _key_auth: &str) -> Result<(), Error> {
        let key = challenge_path(token);
        self.storage.delete_object(domain, &key).await?;
        info!("Removed HTTP-01 proof for {domain} from {key}");
        Ok(())
    }
}
