use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;

/// Account status the gate consults on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("user store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed user store: {0}")]
    Malformed(String),
}

/// Read-only view of user records. Implementations must not cache
/// between requests: a disabled flag takes effect on the next call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, uid: &str) -> Result<Option<UserRecord>, UserStoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    users: HashMap<String, UserRecord>,
}

impl InMemoryUserStore {
    pub fn new(records: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            users: records.into_iter().map(|r| (r.uid.clone(), r)).collect(),
        }
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get(&self, uid: &str) -> Result<Option<UserRecord>, UserStoreError> {
        Ok(self.users.get(uid).cloned())
    }
}

/// JSON array of [`UserRecord`]s, re-read on every lookup.
#[derive(Debug, Clone)]
pub struct JsonFileUserStore {
    path: PathBuf,
}

impl JsonFileUserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl UserStore for JsonFileUserStore {
    async fn get(&self, uid: &str) -> Result<Option<UserRecord>, UserStoreError> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(UserStoreError::Unavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        let records: Vec<UserRecord> =
            serde_json::from_str(&json).map_err(|e| UserStoreError::Malformed(e.to_string()))?;
        Ok(records.into_iter().find(|r| r.uid == uid))
    }
}
