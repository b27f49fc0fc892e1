use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::filter::FieldFilter;
use crate::types::Method;

/// Resolved field filters of one view, keyed by method.
///
/// Entries live until invalidated; callers that change key configuration
/// at runtime must invalidate the affected methods.
#[derive(Debug, Default)]
pub struct FilterCache {
    entries: RwLock<HashMap<Method, Arc<FieldFilter>>>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached filter for `method`, resolving and storing it on a miss
    pub async fn get_or_resolve<F>(&self, method: Method, resolve: F) -> Arc<FieldFilter>
    where
        F: FnOnce() -> FieldFilter,
    {
        // Fast path: try read lock
        {
            let entries = self.entries.read().await;
            if let Some(filter) = entries.get(&method) {
                return filter.clone();
            }
        }

        let mut entries = self.entries.write().await;
        entries.entry(method).or_insert_with(|| Arc::new(resolve())).clone()
    }

    pub async fn invalidate(&self, method: Method) {
        self.entries.write().await.remove(&method);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_once_per_method() {
        let cache = FilterCache::new();
        let first = cache.get_or_resolve(Method::Get, || FieldFilter::blocking(["password"])).await;
        let second = cache.get_or_resolve(Method::Get, || FieldFilter::allow_all()).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!second.allows("password"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn invalidation_forces_resolution() {
        let cache = FilterCache::new();
        cache.get_or_resolve(Method::Get, || FieldFilter::blocking(["password"])).await;
        cache.get_or_resolve(Method::Post, FieldFilter::allow_all).await;
        cache.invalidate(Method::Get).await;
        let fresh = cache.get_or_resolve(Method::Get, FieldFilter::allow_all).await;
        assert!(fresh.allows("password"));
        cache.clear().await;
        assert_eq!(cache.len().await, 0);
    }
}
