//! Object storage backend.
//!
//! Each object is a pair of files under the storage root: the bytes at
//! `{id}` and the descriptor at `{id}.json`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use super::kinds::{Combination, DeliveryType, ResourceType};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object '{0}' not found")]
    NotFound(String),
    #[error("invalid object id '{0}'")]
    InvalidId(String),
    #[error("corrupt descriptor for '{id}': {reason}")]
    Corrupt { id: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Descriptor of a stored object. `resource_type` is always concrete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub id: String,
    pub group_id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub resource_type: ResourceType,
    pub delivery_type: DeliveryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn combination(&self) -> Combination {
        Combination::new(self.resource_type, self.delivery_type)
    }
}

/// Upload request before an id is assigned.
#[derive(Debug, Clone)]
pub struct NewObject {
    pub group_id: String,
    pub file_name: String,
    pub content_type: String,
    pub resource_type: ResourceType,
    pub delivery_type: DeliveryType,
    pub uploaded_by: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, object: NewObject, bytes: Vec<u8>) -> Result<StoredObject, StoreError>;

    /// Objects in a group, oldest first.
    async fn list(&self, group_id: &str) -> Result<Vec<StoredObject>, StoreError>;

    async fn metadata(&self, id: &str) -> Result<StoredObject, StoreError>;

    async fn read(&self, id: &str) -> Result<(StoredObject, Vec<u8>), StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, id: &str) -> Result<(PathBuf, PathBuf), StoreError> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok((
            self.root.join(id),
            self.root.join(format!("{}.json", id)),
        ))
    }

    async fn read_descriptor(&self, id: &str, path: &Path) -> Result<StoredObject, StoreError> {
        let json = match fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, object: NewObject, bytes: Vec<u8>) -> Result<StoredObject, StoreError> {
        fs::create_dir_all(&self.root).await?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let (data_path, meta_path) = self.paths(&id)?;
        let stored = StoredObject {
            resource_type: object.resource_type.resolve(&object.content_type),
            id,
            group_id: object.group_id,
            file_name: object.file_name,
            content_type: object.content_type,
            size: bytes.len() as u64,
            delivery_type: object.delivery_type,
            uploaded_by: object.uploaded_by,
            uploaded_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&stored).map_err(|e| StoreError::Corrupt {
            id: stored.id.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&data_path, &bytes).await?;
        fs::write(&meta_path, json).await?;

        debug!(
            id = %stored.id,
            size = stored.size,
            combination = %stored.combination(),
            "Stored object"
        );
        Ok(stored)
    }

    async fn list(&self, group_id: &str) -> Result<Vec<StoredObject>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            match self.read_descriptor(id, &path).await {
                Ok(object) if object.group_id == group_id => objects.push(object),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable descriptor {}: {}", path.display(), e),
            }
        }
        objects.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id)));
        Ok(objects)
    }

    async fn metadata(&self, id: &str) -> Result<StoredObject, StoreError> {
        let (_, meta_path) = self.paths(id)?;
        self.read_descriptor(id, &meta_path).await
    }

    async fn read(&self, id: &str) -> Result<(StoredObject, Vec<u8>), StoreError> {
        let (data_path, meta_path) = self.paths(id)?;
        let object = self.read_descriptor(id, &meta_path).await?;
        let bytes = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok((object, bytes))
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let (data_path, meta_path) = self.paths(id)?;
        match fs::remove_file(&meta_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = fs::remove_file(&data_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_object(group: &str, name: &str, content_type: &str) -> NewObject {
        NewObject {
            group_id: group.to_string(),
            file_name: name.to_string(),
            content_type: content_type.to_string(),
            resource_type: ResourceType::Auto,
            delivery_type: DeliveryType::Authenticated,
            uploaded_by: Some("u1".to_string()),
        }
    }

    #[tokio::test]
    async fn put_resolves_auto_and_reads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path().join("objects"));

        let pdf = store
            .put(new_object("g1", "a.pdf", "application/pdf"), b"%PDF-1.7".to_vec())
            .await
            .unwrap();
        assert_eq!(pdf.resource_type, ResourceType::Raw);
        assert_eq!(pdf.size, 8);

        let png = store
            .put(new_object("g1", "b.png", "image/png"), vec![0x89, 0x50])
            .await
            .unwrap();
        assert_eq!(png.resource_type, ResourceType::Image);

        let (meta, bytes) = store.read(&pdf.id).await.unwrap();
        assert_eq!(meta, pdf);
        assert_eq!(bytes, b"%PDF-1.7");
    }

    #[tokio::test]
    async fn list_filters_by_group() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());

        store.put(new_object("g1", "a.txt", "text/plain"), vec![1]).await.unwrap();
        store.put(new_object("g2", "b.txt", "text/plain"), vec![2]).await.unwrap();
        store.put(new_object("g1", "c.txt", "text/plain"), vec![3]).await.unwrap();

        let listed = store.list("g1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|o| o.group_id == "g1"));
        assert!(store.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_both_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let object = store
            .put(new_object("g1", "a.txt", "text/plain"), vec![1])
            .await
            .unwrap();

        store.delete(&object.id).await.unwrap();
        assert!(matches!(
            store.metadata(&object.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&object.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!tmp.path().join(&object.id).exists());
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        for id in ["../etc/passwd", "a/b", "", "x.json"] {
            assert!(matches!(
                store.metadata(id).await,
                Err(StoreError::InvalidId(_))
            ));
        }
    }

    #[tokio::test]
    async fn missing_root_lists_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path().join("never-created"));
        assert!(store.list("g").await.unwrap().is_empty());
    }
}
