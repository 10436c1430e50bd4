//! Hash-keyed content cache for OCR text and extraction results.
//!
//! Avoids repeating expensive OCR/LLM work when identical file content
//! shows up again within the TTL. Entries are overwritten wholesale on
//! refresh; expired entries are dropped on read and swept on write.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::llm::LlmFields;

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn get(&self) -> Option<T> {
        if Instant::now() >= self.expires_at {
            None
        } else {
            Some(self.value.clone())
        }
    }
}

/// Counts reported by [`ContentCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub ocr_entries: usize,
    pub extraction_entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Shared cache keyed by `(kind, content_hash)`.
pub struct ContentCache {
    ocr: RwLock<HashMap<String, Entry<String>>>,
    extraction: RwLock<HashMap<String, Entry<LlmFields>>>,
    counters: RwLock<(u64, u64)>,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ocr: RwLock::new(HashMap::new()),
            extraction: RwLock::new(HashMap::new()),
            counters: RwLock::new((0, 0)),
            ttl,
        }
    }

    pub fn get_ocr(&self, content_hash: &str) -> Option<String> {
        let value = self
            .ocr
            .read()
            .unwrap()
            .get(content_hash)
            .and_then(Entry::get);
        self.count(value.is_some());
        value
    }

    pub fn put_ocr(&self, content_hash: &str, text: String) {
        if text.is_empty() {
            return;
        }
        let mut map = self.ocr.write().unwrap();
        Self::sweep(&mut map);
        map.insert(content_hash.to_string(), Entry::new(text, self.ttl));
    }

    pub fn get_extraction(&self, content_hash: &str) -> Option<LlmFields> {
        let value = self
            .extraction
            .read()
            .unwrap()
            .get(content_hash)
            .and_then(Entry::get);
        self.count(value.is_some());
        value
    }

    pub fn put_extraction(&self, content_hash: &str, fields: LlmFields) {
        if fields.is_empty() {
            return;
        }
        let mut map = self.extraction.write().unwrap();
        Self::sweep(&mut map);
        map.insert(content_hash.to_string(), Entry::new(fields, self.ttl));
    }

    pub fn stats(&self) -> CacheStats {
        let (hits, misses) = *self.counters.read().unwrap();
        CacheStats {
            ocr_entries: self.ocr.read().unwrap().len(),
            extraction_entries: self.extraction.read().unwrap().len(),
            hits,
            misses,
        }
    }

    pub fn clear(&self) {
        self.ocr.write().unwrap().clear();
        self.extraction.write().unwrap().clear();
    }

    fn sweep<T>(map: &mut HashMap<String, Entry<T>>) {
        let now = Instant::now();
        map.retain(|_, e| e.expires_at > now);
    }

    fn count(&self, hit: bool) {
        let mut counters = self.counters.write().unwrap();
        if hit {
            counters.0 += 1;
        } else {
            counters.1 += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_round_trip() {
        let cache = ContentCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_ocr("abc"), None);
        cache.put_ocr("abc", "page text".to_string());
        assert_eq!(cache.get_ocr("abc").as_deref(), Some("page text"));
        let stats = cache.stats();
        assert_eq!(stats.ocr_entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn empty_values_are_not_cached() {
        let cache = ContentCache::new(Duration::from_secs(60));
        cache.put_ocr("abc", String::new());
        assert_eq!(cache.stats().ocr_entries, 0);
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = ContentCache::new(Duration::from_millis(0));
        cache.put_ocr("abc", "text".to_string());
        assert_eq!(cache.get_ocr("abc"), None);
    }

    #[test]
    fn refresh_overwrites_wholesale() {
        let cache = ContentCache::new(Duration::from_secs(60));
        cache.put_ocr("abc", "old".to_string());
        cache.put_ocr("abc", "new".to_string());
        assert_eq!(cache.get_ocr("abc").as_deref(), Some("new"));
        assert_eq!(cache.stats().ocr_entries, 1);
    }

    #[test]
    fn extraction_entries_are_separate() {
        let cache = ContentCache::new(Duration::from_secs(60));
        cache.put_ocr("abc", "text".to_string());
        assert_eq!(cache.get_extraction("abc"), None);
    }
}
