//! In-memory feature cache
//!
//! Reference backend. Each namespace sits behind its own lock, and the
//! registry lock is only held long enough to clone a namespace handle, so a
//! batch pass writing one namespace never stalls readers of another and
//! readers of the same namespace wait at most for a single insert.

use super::{FeatureCache, NamespaceRecords};
use crate::error::{FeatureStoreError, Result};
use crate::types::{EntityKey, FeatureValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

type Records = Arc<RwLock<HashMap<EntityKey, Option<FeatureValue>>>>;

/// Process-local cache backed by hash maps
pub struct InMemoryFeatureCache {
    /// Namespace registry
    namespaces: RwLock<HashMap<String, Records>>,
    /// Supported names in creation order
    supported: RwLock<Vec<String>>,
}

impl InMemoryFeatureCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            supported: RwLock::new(Vec::new()),
        }
    }

    async fn records(&self, namespace: &str) -> Result<Records> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(namespace)
            .cloned()
            .ok_or_else(|| FeatureStoreError::UnknownNamespace(namespace.to_string()))
    }
}

impl Default for InMemoryFeatureCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeatureCache for InMemoryFeatureCache {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        if namespaces.contains_key(name) {
            debug!("Feature namespace {} already in cache", name);
            return Ok(());
        }

        info!("Adding feature namespace {} to cache", name);
        namespaces.insert(name.to_string(), Arc::new(RwLock::new(HashMap::new())));
        self.supported.write().await.push(name.to_string());
        Ok(())
    }

    async fn insert(
        &self,
        namespace: &str,
        key: EntityKey,
        value: Option<FeatureValue>,
    ) -> Result<()> {
        let records = self.records(namespace).await?;
        records.write().await.insert(key, value);
        Ok(())
    }

    async fn get_one(&self, namespace: &str, key: EntityKey) -> Result<Option<FeatureValue>> {
        let records = self.records(namespace).await?;
        let records = records.read().await;
        records
            .get(&key)
            .cloned()
            .ok_or_else(|| FeatureStoreError::UnknownKey {
                namespace: namespace.to_string(),
                key: key.to_string(),
            })
    }

    async fn get_all(&self, namespace: &str) -> Result<NamespaceRecords> {
        let records = self.records(namespace).await?;
        let records = records.read().await;
        Ok(records.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    async fn delete(&self, namespace: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().await;
        if namespaces.remove(namespace).is_none() {
            debug!("Feature namespace {} not in cache, nothing to delete", namespace);
            return Ok(false);
        }

        self.supported.write().await.retain(|name| name != namespace);
        info!("Deleted feature namespace {}", namespace);
        Ok(true)
    }

    async fn supported_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.supported.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_create_namespace_is_idempotent() {
        let cache = InMemoryFeatureCache::new();
        cache.create_namespace("payment_transaction_type").await.unwrap();
        cache.create_namespace("payment_transaction_type").await.unwrap();

        let supported = cache.supported_namespaces().await.unwrap();
        assert_eq!(supported, vec!["payment_transaction_type".to_string()]);
    }

    #[tokio::test]
    async fn test_insert_into_unknown_namespace_writes_nothing() {
        let cache = InMemoryFeatureCache::new();
        let err = cache
            .insert("missing", EntityKey(1), Some(FeatureValue::Count(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureStoreError::UnknownNamespace(_)));
        assert!(cache.supported_namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_one_distinguishes_missing_namespace_and_key() {
        let cache = InMemoryFeatureCache::new();
        cache.create_namespace("ns").await.unwrap();
        cache.insert("ns", EntityKey(1), None).await.unwrap();

        assert!(matches!(
            cache.get_one("other", EntityKey(1)).await,
            Err(FeatureStoreError::UnknownNamespace(_))
        ));
        assert!(matches!(
            cache.get_one("ns", EntityKey(2)).await,
            Err(FeatureStoreError::UnknownKey { .. })
        ));
        // known but unresolved
        assert_eq!(cache.get_one("ns", EntityKey(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_all_and_delete() {
        let cache = InMemoryFeatureCache::new();
        cache.create_namespace("ns").await.unwrap();
        assert!(cache.get_all("ns").await.unwrap().is_empty());

        cache
            .insert("ns", EntityKey(2), Some(FeatureValue::Label("DEBIT".into())))
            .await
            .unwrap();
        cache.insert("ns", EntityKey(1), None).await.unwrap();

        let all = cache.get_all("ns").await.unwrap();
        assert_eq!(all.keys().copied().collect::<Vec<_>>(), vec![EntityKey(1), EntityKey(2)]);

        assert!(cache.delete("ns").await.unwrap());
        assert!(!cache.delete("ns").await.unwrap());
        assert!(matches!(
            cache.get_all("ns").await,
            Err(FeatureStoreError::UnknownNamespace(_))
        ));
        assert!(cache.supported_namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readers_proceed_while_other_namespace_is_written() {
        let cache = Arc::new(InMemoryFeatureCache::new());
        cache.create_namespace("a").await.unwrap();
        cache.create_namespace("b").await.unwrap();
        cache.insert("b", EntityKey(7), Some(FeatureValue::Count(7))).await.unwrap();

        let records = cache.records("a").await.unwrap();
        let _writer = records.write().await;

        let value = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            cache.get_one("b", EntityKey(7)),
        )
        .await
        .expect("reader blocked by writer on another namespace")
        .unwrap();
        assert_eq!(value, Some(FeatureValue::Count(7)));
    }

    proptest! {
        #[test]
        fn prop_last_write_wins(writes in proptest::collection::vec((0i64..8, any::<i64>()), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let cache = InMemoryFeatureCache::new();
                cache.create_namespace("ns").await.unwrap();

                let mut expected = HashMap::new();
                for (key, count) in &writes {
                    cache
                        .insert("ns", EntityKey(*key), Some(FeatureValue::Count(*count)))
                        .await
                        .unwrap();
                    expected.insert(*key, *count);
                }

                for (key, count) in expected {
                    let got = cache.get_one("ns", EntityKey(key)).await.unwrap();
                    prop_assert_eq!(got, Some(FeatureValue::Count(count)));
                }
                Ok(())
            })?;
        }
    }
}
