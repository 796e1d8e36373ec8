mod blob;
mod local;

pub use blob::{BlobConnection, BlobSink};
pub use local::LocalSink;

use babymaker_contracts::errors::GenerationError;
use babymaker_contracts::results::{GenerationKind, StoredRef};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::client::ImageBytes;
use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageBucket {
    ParentPhotos,
    GeneratedBabies,
    GeneratedFamilies,
    TempUploads,
}

impl StorageBucket {
    pub const ALL: [StorageBucket; 4] = [
        Self::ParentPhotos,
        Self::GeneratedBabies,
        Self::GeneratedFamilies,
        Self::TempUploads,
    ];

    /// Container name, also used as the local directory name.
    pub fn name(self) -> &'static str {
        match self {
            Self::ParentPhotos => "parent-photos",
            Self::GeneratedBabies => "generated-babies",
            Self::GeneratedFamilies => "generated-families",
            Self::TempUploads => "temp-uploads",
        }
    }

    pub fn for_kind(kind: GenerationKind) -> Self {
        match kind {
            GenerationKind::Baby => Self::GeneratedBabies,
            GenerationKind::Family => Self::GeneratedFamilies,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, GenerationError> {
        let wanted = raw.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|bucket| bucket.name() == wanted)
            .ok_or_else(|| GenerationError::InvalidOption {
                field: "bucket".to_string(),
                value: raw.to_string(),
            })
    }
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

pub trait StorageSink: Send + Sync {
    fn name(&self) -> &str;

    /// True when stored images are reachable by the remote model.
    fn is_remote(&self) -> bool;

    /// Writes the image under `identifier` plus an extension. Never
    /// overwrites an existing object.
    fn persist(
        &self,
        image: &ImageBytes,
        bucket: StorageBucket,
        identifier: &str,
    ) -> Result<StoredRef, GenerationError>;

    /// A URL the remote model can fetch the stored object from.
    fn fetch_url(&self, _stored: &StoredRef) -> Option<String> {
        None
    }

    fn list(&self, bucket: StorageBucket) -> Result<Vec<StoredObject>, GenerationError>;

    fn delete(&self, bucket: StorageBucket, name: &str) -> Result<(), GenerationError>;

    /// Confirms the sink is reachable and writable. Returns a one-line
    /// description for `babymaker check`.
    fn check(&self) -> Result<String, GenerationError>;
}

/// Deletes every object in `bucket` last modified before `now - max_age`.
/// Returns the deleted names.
pub fn cleanup_older_than(
    sink: &dyn StorageSink,
    bucket: StorageBucket,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<String>, GenerationError> {
    let cutoff = now - max_age;
    let mut deleted = Vec::new();
    for object in sink.list(bucket)? {
        if object.last_modified < cutoff {
            sink.delete(bucket, &object.name)?;
            deleted.push(object.name);
        }
    }
    Ok(deleted)
}

/// Object names must stay inside their bucket.
fn validate_object_name(name: &str) -> Result<(), GenerationError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(GenerationError::InvalidOption {
            field: "name".to_string(),
            value: name.to_string(),
        });
    }
    Ok(())
}

/// Blob storage when a connection string is configured, local disk otherwise.
pub fn sink_from_config(config: &EngineConfig) -> Result<Box<dyn StorageSink>, GenerationError> {
    match &config.blob_connection_string {
        Some(connection_string) => {
            let connection = BlobConnection::parse(connection_string)?;
            Ok(Box::new(BlobSink::new(connection, config.http_timeout)?))
        }
        None => Ok(Box::new(LocalSink::new(&config.storage_root))),
    }
}

/// `{prefix}_{YYYYmmdd_HHMMSS}_{seed}_{nn}_{hash8}`.
pub fn image_identifier(
    prefix: &str,
    stamp: DateTime<Utc>,
    seed: i64,
    index: usize,
    bytes: &[u8],
) -> String {
    format!(
        "{prefix}_{}_{seed}_{index:02}_{}",
        stamp.format("%Y%m%d_%H%M%S"),
        short_hash(bytes)
    )
}

pub fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..4])
}
