//! Local filesystem backend.
//!
//! Objects live at `{root}/{container}/{object_name}`. Every name is checked
//! to consist of plain path components and to resolve inside the root before
//! any file is touched.

use crate::{
    models::grant::GrantPermission,
    storage::{ByteStream, Grant, Storage, StorageBackend, StorageError, StorageResult, StoredObject},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use futures::StreamExt;
use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

const MAX_OBJECT_NAME_LEN: usize = 1024;

#[derive(Clone, Debug)]
pub struct LocalStorage {
    /// Canonicalized storage root.
    root: PathBuf,
    container: String,
}

impl LocalStorage {
    /// Create the root (and container directory) if missing.
    pub async fn new(root: impl AsRef<Path>, container: impl Into<String>) -> StorageResult<Self> {
        let container = container.into();
        ensure_name_safe(&container)?;

        let root = root.as_ref();
        fs::create_dir_all(root.join(&container)).await.map_err(|e| {
            StorageError::Config(format!(
                "failed to create storage directory {}: {}",
                root.display(),
                e
            ))
        })?;
        let root = fs::canonicalize(root).await.map_err(|e| {
            StorageError::Config(format!("failed to canonicalize {}: {}", root.display(), e))
        })?;

        Ok(Self { root, container })
    }

    /// Resolve `container/object_name` to a path strictly inside the root.
    async fn resolve(&self, container: &str, object_name: &str) -> StorageResult<PathBuf> {
        ensure_name_safe(container)?;
        ensure_name_safe(object_name)?;

        let path = self.root.join(container).join(object_name);

        // Symlinks inside the root could still point elsewhere; check the
        // deepest existing ancestor after resolution.
        let mut ancestor = path.as_path();
        loop {
            match fs::canonicalize(ancestor).await {
                Ok(resolved) => {
                    if resolved.starts_with(&self.root) {
                        break;
                    }
                    return Err(StorageError::InvalidObjectName(object_name.to_string()));
                }
                Err(_) => match ancestor.parent() {
                    Some(parent) => ancestor = parent,
                    None => break,
                },
            }
        }

        Ok(path)
    }
}

/// Accept only relative names made of normal components.
fn ensure_name_safe(name: &str) -> StorageResult<()> {
    let invalid = || StorageError::InvalidObjectName(name.to_string());
    if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
        return Err(invalid());
    }
    if name
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(invalid());
    }
    if !Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(invalid());
    }
    Ok(())
}

/// Removes a temp file on drop unless it was moved into place. Dropping an
/// in-flight `put` therefore leaves no partial object behind.
struct TempFile {
    path: PathBuf,
    armed: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(
        &self,
        object_name: &str,
        data: Bytes,
        _content_type: &str,
    ) -> StorageResult<StoredObject> {
        let path = self.resolve(&self.container, object_name).await?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::InvalidObjectName(object_name.to_string()))?;
        fs::create_dir_all(&parent).await?;

        let start = std::time::Instant::now();
        let mut tmp = TempFile::new(parent.join(format!(".tmp-{}", Uuid::new_v4())));
        let write = async {
            let mut file = fs::File::create(&tmp.path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp.path, &path).await
        };
        write.await.map_err(|e| {
            StorageError::Unavailable(format!("failed to write {}: {}", path.display(), e))
        })?;
        tmp.disarm();

        info!(
            path = %path.display(),
            object = %object_name,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "local storage write complete"
        );

        Ok(StoredObject {
            container: self.container.clone(),
            object_name: object_name.to_string(),
            url: None,
        })
    }

    async fn get(&self, container: &str, object_name: &str) -> StorageResult<ByteStream> {
        let path = self.resolve(container, object_name).await?;
        let file = fs::File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(object_name.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn delete(&self, container: &str, object_name: &str) -> StorageResult<()> {
        let path = self.resolve(container, object_name).await?;
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("{} already missing", path.display());
            }
            Err(err) => {
                return Err(StorageError::Unavailable(format!(
                    "failed to delete {}: {}",
                    path.display(),
                    err
                )));
            }
        }
        Ok(())
    }

    async fn grant(
        &self,
        _container: &str,
        _object_name: &str,
        _ttl: Duration,
        _permission: GrantPermission,
    ) -> Grant {
        Grant::Unbounded
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Local
    }

    fn container(&self) -> &str {
        &self.container
    }
}
