//! Cache Service
//!
//! Two independent caches behind one configuration: a screen-context cache
//! validated against file modification times, and a response cache matched by
//! normalized-text similarity scoped to a screen's context hash. Response
//! entries are matched by meaning, not exact string: a paraphrase close enough
//! to a stored query reuses its response as long as the screen identity is the
//! same.
//!
//! The context hash covers screen identity (name + element ids) only; screen
//! content changing without the identity changing is a known staleness window.

use crate::config::CacheSettings;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;
use tracing::debug;

/// Words stripped from queries before similarity comparison
const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "please", "can", "could", "would", "you", "me", "my", "just", "now",
];

/// Identity of the screen a query was made against
#[derive(Debug, Clone)]
pub struct ScreenContext {
    pub screen_name: String,
    pub element_ids: Vec<String>,
}

impl ScreenContext {
    pub fn new(screen_name: &str, element_ids: Vec<String>) -> Self {
        Self {
            screen_name: screen_name.to_string(),
            element_ids,
        }
    }

    /// Stable fingerprint of the screen's identity: name plus sorted element
    /// ids, hashed
    pub fn context_hash(&self) -> String {
        let mut ids = self.element_ids.clone();
        ids.sort();
        let mut hasher = Sha256::new();
        hasher.update(self.screen_name.as_bytes());
        hasher.update(b":");
        hasher.update(ids.join(",").as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Lowercase, strip punctuation, drop filler words
pub fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .filter(|w| !FILLER_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity over normalized word sets, 1.0 for identical text
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let set_a: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let set_b: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

struct ScreenContextEntry {
    data: Value,
    mtime: SystemTime,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

struct ResponseEntry {
    normalized_query: String,
    context_hash: String,
    response: Value,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

/// A cached response lookup result
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub response: Value,
    pub similarity: f64,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct CacheStats {
    pub screen_hits: u64,
    pub screen_misses: u64,
    pub response_hits: u64,
    pub response_misses: u64,
}

pub struct CacheService {
    config: CacheSettings,
    ttl: Duration,
    screen_entries: RwLock<HashMap<(String, String), ScreenContextEntry>>,
    response_entries: RwLock<Vec<ResponseEntry>>,
    screen_hits: AtomicU64,
    screen_misses: AtomicU64,
    response_hits: AtomicU64,
    response_misses: AtomicU64,
}

impl CacheService {
    pub fn new(config: CacheSettings) -> Self {
        let ttl = Duration::from_secs(config.ttl_seconds);
        Self {
            config,
            ttl,
            screen_entries: RwLock::new(HashMap::new()),
            response_entries: RwLock::new(Vec::new()),
            screen_hits: AtomicU64::new(0),
            screen_misses: AtomicU64::new(0),
            response_hits: AtomicU64::new(0),
            response_misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            screen_hits: self.screen_hits.load(Ordering::Relaxed),
            screen_misses: self.screen_misses.load(Ordering::Relaxed),
            response_hits: self.response_hits.load(Ordering::Relaxed),
            response_misses: self.response_misses.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Screen-context cache
    // ------------------------------------------------------------------

    /// A hit requires the stored mtime to equal the file's current mtime AND
    /// the entry to be within TTL. Any mismatch deletes the stale entry.
    pub async fn get_screen_context(&self, file_path: &str, screen_name: &str) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }
        let key = (file_path.to_string(), screen_name.to_string());
        let mut entries = self.screen_entries.write().await;

        let valid = match entries.get(&key) {
            Some(entry) => {
                if entry.created_at.elapsed() > self.ttl {
                    debug!(file = %file_path, screen = %screen_name, "Screen context expired");
                    false
                } else {
                    match live_mtime(file_path) {
                        Some(mtime) if mtime == entry.mtime => true,
                        _ => {
                            debug!(file = %file_path, screen = %screen_name, "Screen file changed, invalidating");
                            false
                        }
                    }
                }
            }
            None => {
                self.screen_misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if !valid {
            entries.remove(&key);
            self.screen_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entry = entries.get_mut(&key)?;
        entry.last_accessed = Instant::now();
        entry.access_count += 1;
        self.screen_hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.data.clone())
    }

    /// Store screen data together with the file's current mtime
    pub async fn set_screen_context(
        &self,
        file_path: &str,
        screen_name: &str,
        data: Value,
    ) -> std::io::Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let mtime = std::fs::metadata(file_path)?.modified()?;
        let mut entries = self.screen_entries.write().await;

        let key = (file_path.to_string(), screen_name.to_string());
        if !entries.contains_key(&key) && entries.len() >= self.config.max_size {
            Self::evict_screen_quarter(&mut entries, self.config.max_size);
        }

        let now = Instant::now();
        entries.insert(
            key,
            ScreenContextEntry {
                data,
                mtime,
                created_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );
        Ok(())
    }

    /// Batch LRU: drop the oldest-accessed 25% in one pass
    fn evict_screen_quarter(
        entries: &mut HashMap<(String, String), ScreenContextEntry>,
        max_size: usize,
    ) {
        let evict_count = (max_size / 4).max(1);
        let mut by_access: Vec<((String, String), Instant)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.last_accessed))
            .collect();
        by_access.sort_by_key(|(_, at)| *at);
        for (key, _) in by_access.into_iter().take(evict_count) {
            entries.remove(&key);
        }
        debug!(evicted = evict_count, "Screen-context cache eviction");
    }

    // ------------------------------------------------------------------
    // Response cache
    // ------------------------------------------------------------------

    /// Similarity-matched lookup scoped to the screen's context hash. Expired
    /// entries are lazily purged on each read.
    pub async fn get_response(&self, query: &str, screen: &ScreenContext) -> Option<CachedResponse> {
        if !self.config.enabled {
            return None;
        }
        let context_hash = screen.context_hash();
        let normalized = normalize_query(query);
        let mut entries = self.response_entries.write().await;

        entries.retain(|e| e.created_at.elapsed() <= self.ttl);

        let mut best: Option<(usize, f64)> = None;
        for (idx, entry) in entries.iter().enumerate() {
            if entry.context_hash != context_hash {
                continue;
            }
            let score = similarity(&normalized, &entry.normalized_query);
            if score < self.config.similarity_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_idx, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && entry.created_at > entries[best_idx].created_at)
                }
            };
            if better {
                best = Some((idx, score));
            }
        }

        match best {
            Some((idx, score)) => {
                let entry = &mut entries[idx];
                entry.last_accessed = Instant::now();
                entry.access_count += 1;
                self.response_hits.fetch_add(1, Ordering::Relaxed);
                Some(CachedResponse {
                    response: entry.response.clone(),
                    similarity: score,
                })
            }
            None => {
                self.response_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Append a response entry, evicting the oldest-accessed 25% at capacity
    pub async fn cache_response(&self, query: &str, screen: &ScreenContext, response: Value) {
        if !self.config.enabled {
            return;
        }
        let mut entries = self.response_entries.write().await;

        if entries.len() >= self.config.max_size {
            let evict_count = (self.config.max_size / 4).max(1);
            entries.sort_by_key(|e| e.last_accessed);
            let evict_count = evict_count.min(entries.len());
            entries.drain(0..evict_count);
            debug!(evicted = evict_count, "Response cache eviction");
        }

        let now = Instant::now();
        entries.push(ResponseEntry {
            normalized_query: normalize_query(query),
            context_hash: screen.context_hash(),
            response,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        });
    }

    pub async fn clear(&self) {
        self.screen_entries.write().await.clear();
        self.response_entries.write().await.clear();
    }
}

fn live_mtime(file_path: &str) -> Option<SystemTime> {
    std::fs::metadata(Path::new(file_path))
        .and_then(|m| m.modified())
        .ok()
}
