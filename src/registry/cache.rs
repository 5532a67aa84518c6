//! 服务缓存
//!
//! 按服务名索引的并发安全容器，基于分段锁的 `DashMap`。
//! 任何操作都不会在持有分段锁期间调用服务代码。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::debug;

use super::service::ServiceEntry;

/// 服务缓存
#[derive(Debug, Default)]
pub struct ServiceCache {
    entries: DashMap<String, Arc<ServiceEntry>>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入条目，覆盖同名条目
    pub fn store(&self, name: impl Into<String>, entry: Arc<ServiceEntry>) {
        let name = name.into();
        debug!(service = %name, "Storing service in cache");
        self.entries.insert(name, entry);
    }

    /// 仅在名称不存在时写入，返回是否写入
    pub fn try_store(&self, name: impl Into<String>, entry: Arc<ServiceEntry>) -> bool {
        match self.entries.entry(name.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                debug!(service = %vacant.key(), "Storing service in cache");
                vacant.insert(entry);
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// 删除条目，返回被删除的条目
    pub fn delete(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        let removed = self.entries.remove(name).map(|(_, entry)| entry);
        if removed.is_some() {
            debug!(service = %name, "Removed service from cache");
        }
        removed
    }

    /// 仅当名称仍指向 `entry` 本身时删除
    pub fn delete_entry(&self, name: &str, entry: &Arc<ServiceEntry>) -> bool {
        let removed = self
            .entries
            .remove_if(name, |_, current| Arc::ptr_eq(current, entry))
            .is_some();
        if removed {
            debug!(service = %name, "Removed service from cache");
        }
        removed
    }

    /// 当前所有条目的快照
    pub fn snapshot(&self) -> Vec<(String, Arc<ServiceEntry>)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// 在快照上遍历，回调期间不持有任何锁，可以安全地修改缓存
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<ServiceEntry>),
    {
        for (name, entry) in self.snapshot() {
            f(&name, &entry);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::endpoint::Endpoint;
    use crate::registry::service::EndpointService;

    fn entry(name: &str) -> Arc<ServiceEntry> {
        Arc::new(ServiceEntry::new(Arc::new(EndpointService::new(
            Endpoint::new(name, "10.0.0.1"),
        ))))
    }

    #[test]
    fn test_store_get_delete() {
        let cache = ServiceCache::new();
        cache.store("a", entry("a"));
        assert!(cache.exists("a"));
        assert_eq!(cache.get("a").unwrap().name(), "a");
        assert!(cache.get("b").is_none());

        assert!(cache.delete("a").is_some());
        assert!(cache.delete("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_entry_ignores_replaced_entry() {
        let cache = ServiceCache::new();
        let old = entry("a");
        cache.store("a", old.clone());
        let replacement = entry("a");
        cache.store("a", replacement.clone());

        assert!(!cache.delete_entry("a", &old));
        assert!(Arc::ptr_eq(&cache.get("a").unwrap(), &replacement));
        assert!(cache.delete_entry("a", &replacement));
        assert!(!cache.exists("a"));
    }

    #[test]
    fn test_try_store_keeps_existing() {
        let cache = ServiceCache::new();
        let first = entry("a");
        assert!(cache.try_store("a", first.clone()));
        assert!(!cache.try_store("a", entry("a")));
        assert!(Arc::ptr_eq(&cache.get("a").unwrap(), &first));
    }

    #[test]
    fn test_for_each_tolerates_mutation() {
        let cache = ServiceCache::new();
        for name in ["a", "b", "c"] {
            cache.store(name, entry(name));
        }

        let mut visited = Vec::new();
        cache.for_each(|name, _| {
            visited.push(name.to_string());
            cache.delete(name);
            cache.store(format!("{}-new", name), entry(name));
        });

        visited.sort();
        assert_eq!(visited, vec!["a", "b", "c"]);
        assert_eq!(cache.len(), 3);
        assert!(cache.exists("a-new"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_try_store_single_winner() {
        let cache = Arc::new(ServiceCache::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.try_store("x", entry("x")) }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(cache.len(), 1);
    }
}
