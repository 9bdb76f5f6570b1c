use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::kinds::Combination;

/// Per-resource record of the combination that last delivered successfully.
///
/// Clones share the same table. Entries are only written after a success
/// and only removed when the resource is deleted.
#[derive(Debug, Clone, Default)]
pub struct CompatibilityTable {
    entries: Arc<RwLock<HashMap<String, Combination>>>,
}

impl CompatibilityTable {
    pub async fn get(&self, id: &str) -> Option<Combination> {
        self.entries.read().await.get(id).copied()
    }

    pub async fn record(&self, id: &str, combination: Combination) {
        self.entries
            .write()
            .await
            .insert(id.to_string(), combination);
    }

    /// Returns whether an entry existed.
    pub async fn forget(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::kinds::{DeliveryType, ResourceType};

    #[tokio::test]
    async fn record_overwrites_and_forget_removes() {
        let table = CompatibilityTable::default();
        let shared = table.clone();
        let image = Combination::new(ResourceType::Image, DeliveryType::Upload);
        let raw = Combination::new(ResourceType::Raw, DeliveryType::Authenticated);

        table.record("r1", image).await;
        assert_eq!(shared.get("r1").await, Some(image));

        table.record("r1", raw).await;
        assert_eq!(shared.get("r1").await, Some(raw));
        assert_eq!(shared.len().await, 1);

        assert!(shared.forget("r1").await);
        assert!(!shared.forget("r1").await);
        assert!(table.is_empty().await);
    }
}
