use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::events::Timestamp;
use crate::store::Journal;
use chrono::Duration;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

const JOURNAL_NAME: &str = "cache.jsonl";

/// Characters of the original prompt kept alongside a cache entry
const ORIGINAL_QUERY_CHARS: usize = 200;

/// A remembered model response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub prompt_hash: String,
    /// Leading characters of the user prompt, for inspection only
    pub original_query: String,
    pub response: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub created_at: Timestamp,
}

impl CacheEntry {
    pub fn new(
        prompt_hash: String,
        prompt: &str,
        response: String,
        input_tokens: u64,
        output_tokens: u64,
        created_at: Timestamp,
    ) -> Self {
        Self {
            prompt_hash,
            original_query: prompt.chars().take(ORIGINAL_QUERY_CHARS).collect(),
            response,
            input_tokens,
            output_tokens,
            created_at,
        }
    }
}

/// Deterministic cache key for a prompt and its system context
///
/// Both parts are length-prefixed so that moving text between them changes
/// the key.
pub fn cache_key(prompt: &str, system_context: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [prompt, system_context] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Response cache keyed by prompt hash with a fixed time-to-live
///
/// Entries older than the TTL are never returned and are dropped on lookup
/// or when the journal is replayed.
pub struct ResponseCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    journal: Option<Journal>,
}

impl ResponseCache {
    /// Create an in-memory cache
    pub fn new(ttl: std::time::Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(36_500)),
            clock,
            entries: Mutex::new(HashMap::new()),
            journal: None,
        }
    }

    /// Open a journaled cache in `dir`, discarding expired entries
    pub fn open(dir: &Path, ttl: std::time::Duration) -> Result<Self, StoreError> {
        Self::open_with_clock(dir, ttl, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        dir: &Path,
        ttl: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let (journal, stored) = Journal::open_with_records::<CacheEntry>(dir, JOURNAL_NAME)?;
        let mut cache = Self::with_clock(ttl, clock);

        let now = cache.clock.now();
        let entries = cache.entries.get_mut().unwrap();
        for entry in stored {
            if !is_expired(&entry, cache.ttl, now) {
                entries.insert(entry.prompt_hash.clone(), entry);
            }
        }

        info!(
            "Loaded {} live cache entries from {}",
            entries.len(),
            journal.path().display()
        );
        cache.journal = Some(journal);
        Ok(cache)
    }

    /// Look up a live entry by key
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();

        let expired = is_expired(entries.get(key)?, self.ttl, now);
        if expired {
            debug!("Cache entry {} expired", key);
            entries.remove(key);
            return None;
        }
        entries.get(key).cloned()
    }

    /// Store an entry, replacing any previous entry with the same key
    ///
    /// Expired entries are swept on every insert, so keys that are never
    /// looked up again do not accumulate.
    pub fn insert(&self, entry: CacheEntry) -> Result<(), StoreError> {
        if let Some(journal) = &self.journal {
            journal.append(&entry)?;
        }
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, existing| !is_expired(existing, self.ttl, now));
        if entries.len() < before {
            debug!("Swept {} expired cache entries", before - entries.len());
        }
        entries.insert(entry.prompt_hash.clone(), entry);
        Ok(())
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !is_expired(entry, self.ttl, now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_expired(entry: &CacheEntry, ttl: Duration, now: Timestamp) -> bool {
    now - entry.created_at > ttl
}
