//! Reusable object pools

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::info;

type Create<T> = Box<dyn Fn() -> T + Send + Sync>;
type Hook<T> = Box<dyn Fn(&mut T) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub identifier: String,
    pub type_name: String,
    /// Zero means unbounded
    pub max_size: usize,
    pub count_all: usize,
    pub count_active: usize,
    pub count_inactive: usize,
    pub gets: usize,
    pub returns: usize,
    pub created: usize,
    pub destroyed: usize,
}

pub struct ObjectPool<T> {
    identifier: String,
    items: Mutex<Vec<T>>,
    create: Create<T>,
    reset: Option<Hook<T>>,
    destroy: Option<Hook<T>>,
    max_size: usize,
    count_all: AtomicUsize,
    count_active: AtomicUsize,
    gets: AtomicUsize,
    returns: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl<T: Send + 'static> ObjectPool<T> {
    pub fn new(identifier: &str, create: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            identifier: identifier.to_string(),
            items: Mutex::new(Vec::new()),
            create: Box::new(create),
            reset: None,
            destroy: None,
            max_size: 0,
            count_all: AtomicUsize::new(0),
            count_active: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            returns: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }

    /// Called on every returned object
    pub fn with_reset(mut self, reset: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Called on objects dropped by a full pool or by `clear`
    pub fn with_destroy(mut self, destroy: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.destroy = Some(Box::new(destroy));
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn preallocate(self, count: usize) -> Self {
        {
            let mut items = self.items.lock();
            for _ in 0..count {
                items.push((self.create)());
            }
        }
        self.count_all.fetch_add(count, Ordering::Relaxed);
        self.created.fetch_add(count, Ordering::Relaxed);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn get(&self) -> T {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.count_active.fetch_add(1, Ordering::Relaxed);
        if let Some(item) = self.items.lock().pop() {
            return item;
        }
        self.count_all.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::Relaxed);
        (self.create)()
    }

    pub fn put(&self, mut item: T) {
        self.returns.fetch_add(1, Ordering::Relaxed);
        if let Some(reset) = &self.reset {
            reset(&mut item);
        }
        self.count_active.fetch_sub(1, Ordering::Relaxed);

        let mut items = self.items.lock();
        if self.max_size > 0 && items.len() >= self.max_size {
            drop(items);
            self.discard(item);
            return;
        }
        items.push(item);
    }

    pub fn clear(&self) {
        let drained: Vec<T> = self.items.lock().drain(..).collect();
        for item in drained {
            self.discard(item);
        }
    }

    fn discard(&self, mut item: T) {
        if let Some(destroy) = &self.destroy {
            destroy(&mut item);
        }
        self.count_all.fetch_sub(1, Ordering::Relaxed);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_all(&self) -> usize {
        self.count_all.load(Ordering::Relaxed)
    }

    pub fn count_active(&self) -> usize {
        self.count_active.load(Ordering::Relaxed)
    }

    pub fn count_inactive(&self) -> usize {
        self.items.lock().len()
    }
}

/// Type-erased view for the pool registry
trait PoolEntry: Send + Sync {
    fn stats(&self) -> PoolStats;
    fn clear(&self);
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + 'static> PoolEntry for ObjectPool<T> {
    fn stats(&self) -> PoolStats {
        PoolStats {
            identifier: self.identifier.clone(),
            type_name: std::any::type_name::<T>().to_string(),
            max_size: self.max_size,
            count_all: self.count_all(),
            count_active: self.count_active(),
            count_inactive: self.count_inactive(),
            gets: self.gets.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
        }
    }

    fn clear(&self) {
        ObjectPool::clear(self);
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolServiceStats {
    pub pools: usize,
    pub total_objects: usize,
    pub active_objects: usize,
    pub inactive_objects: usize,
}

/// Registry of named pools
#[derive(Default)]
pub struct PoolService {
    pools: RwLock<BTreeMap<String, Arc<dyn PoolEntry>>>,
}

impl PoolService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool under its identifier, replacing any previous one
    pub fn add<T: Send + 'static>(&self, pool: ObjectPool<T>) -> Arc<ObjectPool<T>> {
        let pool = Arc::new(pool);
        let id = pool.identifier().to_string();
        self.pools.write().insert(id.clone(), pool.clone());
        info!(pool = %id, item = std::any::type_name::<T>(), "Created object pool");
        pool
    }

    pub fn get<T: Send + 'static>(&self, identifier: &str) -> Option<Arc<ObjectPool<T>>> {
        let entry = self.pools.read().get(identifier).cloned()?;
        entry.as_any().downcast::<ObjectPool<T>>().ok()
    }

    pub fn destroy(&self, identifier: &str) -> bool {
        let Some(pool) = self.pools.write().remove(identifier) else {
            return false;
        };
        pool.clear();
        info!(pool = identifier, "Destroyed object pool");
        true
    }

    pub fn clear(&self, identifier: &str) -> bool {
        match self.pools.read().get(identifier) {
            Some(pool) => {
                pool.clear();
                true
            }
            None => false,
        }
    }

    pub fn pool_stats(&self, identifier: &str) -> Option<PoolStats> {
        self.pools.read().get(identifier).map(|p| p.stats())
    }

    pub fn all_pool_stats(&self) -> Vec<PoolStats> {
        self.pools.read().values().map(|p| p.stats()).collect()
    }

    pub fn stats(&self) -> PoolServiceStats {
        let all = self.all_pool_stats();
        PoolServiceStats {
            pools: all.len(),
            total_objects: all.iter().map(|s| s.count_all).sum(),
            active_objects: all.iter().map(|s| s.count_active).sum(),
            inactive_objects: all.iter().map(|s| s.count_inactive).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_reuses_returned_objects() {
        let pool = ObjectPool::new("buffers", || Vec::<u8>::with_capacity(16))
            .with_reset(|v| v.clear());

        let mut buf = pool.get();
        buf.push(1);
        pool.put(buf);

        let again = pool.get();
        assert!(again.is_empty());
        assert_eq!(pool.count_all(), 1);
        assert_eq!(pool.count_active(), 1);
    }

    #[test]
    fn test_preallocate_and_max_size() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let sink = destroyed.clone();
        let pool = ObjectPool::new("ints", || 0u32)
            .with_max_size(2)
            .with_destroy(move |_| {
                sink.fetch_add(1, Ordering::Relaxed);
            })
            .preallocate(2);
        assert_eq!(pool.count_inactive(), 2);

        let extra = pool.get();
        let a = pool.get();
        let b = pool.get();
        assert_eq!(pool.count_all(), 3);
        pool.put(extra);
        pool.put(a);
        pool.put(b);

        assert_eq!(pool.count_inactive(), 2);
        assert_eq!(pool.count_all(), 2);
        assert_eq!(destroyed.load(Ordering::Relaxed), 1);

        pool.clear();
        assert_eq!(pool.count_all(), 0);
        assert_eq!(destroyed.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_service_typed_lookup() {
        let service = PoolService::new();
        service.add(ObjectPool::new("strings", String::new).preallocate(3));

        assert!(service.get::<String>("strings").is_some());
        assert!(service.get::<u32>("strings").is_none());
        assert!(service.get::<String>("missing").is_none());

        let stats = service.stats();
        assert_eq!(stats.pools, 1);
        assert_eq!(stats.inactive_objects, 3);

        assert!(service.clear("strings"));
        assert_eq!(service.pool_stats("strings").unwrap().count_all, 0);
        assert!(service.destroy("strings"));
        assert!(!service.destroy("strings"));
    }
}
