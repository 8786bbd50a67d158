//! Bounded in-memory store of synthesized audio, keyed by message id.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_core::types::SynthesizedAudio;

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, SynthesizedAudio>,
    order: VecDeque<String>,
}

/// Oldest entries are evicted once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct AudioCache {
    inner: Arc<Mutex<CacheInner>>,
    capacity: usize,
}

impl AudioCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, message_id: impl Into<String>, audio: SynthesizedAudio) {
        let message_id = message_id.into();
        let mut inner = self.lock();
        if inner.entries.insert(message_id.clone(), audio).is_none() {
            inner.order.push_back(message_id);
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, message_id: &str) -> Option<SynthesizedAudio> {
        self.lock().entries.get(message_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(byte: u8) -> SynthesizedAudio {
        SynthesizedAudio::new(vec![byte], "audio/mpeg")
    }

    #[test]
    fn test_insert_and_get() {
        let cache = AudioCache::new(4);
        cache.insert("m1", clip(1));
        assert_eq!(cache.get("m1").unwrap().bytes, vec![1]);
        assert!(cache.get("m2").is_none());
    }

    #[test]
    fn test_evicts_oldest() {
        let cache = AudioCache::new(2);
        cache.insert("m1", clip(1));
        cache.insert("m2", clip(2));
        cache.insert("m3", clip(3));
        assert!(cache.get("m1").is_none());
        assert!(cache.get("m2").is_some());
        assert!(cache.get("m3").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overwrite_keeps_single_slot() {
        let cache = AudioCache::new(2);
        cache.insert("m1", clip(1));
        cache.insert("m1", clip(9));
        cache.insert("m2", clip(2));
        assert_eq!(cache.get("m1").unwrap().bytes, vec![9]);
        assert_eq!(cache.len(), 2);
    }
}
