use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::model::User;

/// Remembers the last user row written during a run so unchanged authors
/// are not re-upserted for every message they posted.
#[derive(Clone)]
pub struct UserCache {
    cache: Arc<Mutex<LruCache<u64, User>>>,
}

impl UserCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    /// True when `user` differs from what was last recorded (or was never seen).
    pub fn needs_upsert(&self, user: &User) -> bool {
        match self.cache.lock() {
            Ok(mut cache) => cache.get(&user.id) != Some(user),
            Err(_) => true,
        }
    }

    pub fn record(&self, user: &User) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(user.id, user.clone());
        }
    }
}
