use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use babymaker_contracts::errors::GenerationError;
use babymaker_contracts::results::StoredRef;
use chrono::{DateTime, Utc};

use super::{validate_object_name, StorageBucket, StoredObject, StorageSink};
use crate::client::ImageBytes;

const MAX_SUFFIX: usize = 1000;

/// Writes `{root}/{bucket}/{identifier}.{ext}`.
#[derive(Debug, Clone)]
pub struct LocalSink {
    root: PathBuf,
}

impl LocalSink {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StorageSink for LocalSink {
    fn name(&self) -> &str {
        "local"
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn persist(
        &self,
        image: &ImageBytes,
        bucket: StorageBucket,
        identifier: &str,
    ) -> Result<StoredRef, GenerationError> {
        let dir = self.root.join(bucket.name());
        fs::create_dir_all(&dir).map_err(|err| {
            GenerationError::StorageFailure(format!("failed to create {}: {err}", dir.display()))
        })?;
        let ext = image.extension();

        for suffix in 0..MAX_SUFFIX {
            let file_name = if suffix == 0 {
                format!("{identifier}.{ext}")
            } else {
                format!("{identifier}-{suffix}.{ext}")
            };
            let path = dir.join(file_name);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(GenerationError::StorageFailure(format!(
                        "failed to create {}: {err}",
                        path.display()
                    )))
                }
            };
            file.write_all(&image.bytes).map_err(|err| {
                GenerationError::StorageFailure(format!(
                    "failed to write {}: {err}",
                    path.display()
                ))
            })?;
            return Ok(StoredRef::Local { path });
        }
        Err(GenerationError::StorageFailure(format!(
            "no free file name for {identifier} in {}",
            dir.display()
        )))
    }

    fn list(&self, bucket: StorageBucket) -> Result<Vec<StoredObject>, GenerationError> {
        let dir = self.root.join(bucket.name());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(GenerationError::StorageFailure(format!(
                    "failed to read {}: {err}",
                    dir.display()
                )))
            }
        };
        let mut objects = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                GenerationError::StorageFailure(format!("failed to read {}: {err}", dir.display()))
            })?;
            let metadata = entry.metadata().map_err(|err| {
                GenerationError::StorageFailure(format!(
                    "failed to stat {}: {err}",
                    entry.path().display()
                ))
            })?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map_err(|err| {
                GenerationError::StorageFailure(format!(
                    "no modification time for {}: {err}",
                    entry.path().display()
                ))
            })?;
            objects.push(StoredObject {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                last_modified: DateTime::<Utc>::from(modified),
            });
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    fn delete(&self, bucket: StorageBucket, name: &str) -> Result<(), GenerationError> {
        validate_object_name(name)?;
        let path = self.root.join(bucket.name()).join(name);
        fs::remove_file(&path).map_err(|err| {
            GenerationError::StorageFailure(format!("failed to delete {}: {err}", path.display()))
        })
    }

    fn check(&self) -> Result<String, GenerationError> {
        for bucket in StorageBucket::ALL {
            let dir = self.root.join(bucket.name());
            fs::create_dir_all(&dir).map_err(|err| {
                GenerationError::StorageFailure(format!(
                    "failed to create {}: {err}",
                    dir.display()
                ))
            })?;
        }
        Ok(format!("local ({})", self.root.display()))
    }
}
