//! Persisted cache of externally resolved drugs.
//!
//! Drugs picked from an external source that the national formulary lacks are kept
//! here so later searches find them. The cache is bounded: idle entries are pruned
//! once it fills up and least-recently-used entries are evicted past capacity.
//! Every mutation is written through to a [`KeyValueStore`] as one checksummed blob.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::config::ExpansionConfig;
use crate::models::{ExpansionCacheEntry, FormularyRecord, SourceId};
use crate::resolver::normalize;
use crate::store::{KeyValueStore, MemoryStore, StoreError};

/// Default storage key of the persisted blob.
pub const EXPANSION_STORAGE_KEY: &str = "druglink.expansion_cache";

/// Current blob format version.
pub const EXPANSION_BLOB_VERSION: u32 = 2;

// ============================================================================
// Persisted format
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct PersistedBlob {
    version: u32,
    /// SHA-256 of the serialized entries
    checksum: String,
    saved_at: DateTime<Utc>,
    entries: Vec<ExpansionCacheEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredBlob {
    Versioned(PersistedBlob),
    Legacy(Vec<LegacyEntry>),
}

/// Unversioned format: a bare array with epoch-millisecond timestamps.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEntry {
    id: String,
    name: String,
    #[serde(default)]
    base_name: String,
    #[serde(default)]
    active_ingredient: String,
    #[serde(default)]
    atc_code: String,
    #[serde(default)]
    is_marketed: bool,
    #[serde(default)]
    route: Option<String>,
    #[serde(default)]
    prescription_only: bool,
    #[serde(default)]
    form: Option<String>,
    #[serde(default)]
    strength: Option<String>,
    added_at: i64,
    #[serde(default)]
    last_used: Option<i64>,
    #[serde(default = "default_use_count")]
    use_count: u32,
    #[serde(default)]
    source: Option<String>,
}

fn default_use_count() -> u32 {
    1
}

impl LegacyEntry {
    fn migrate(self) -> ExpansionCacheEntry {
        let source = match self.source.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("ema") | Some("authorization") => SourceId::Authorization,
            _ => SourceId::Label,
        };
        let first_seen = epoch_millis(self.added_at);
        let last_used = self.last_used.map(epoch_millis).unwrap_or(first_seen);

        let mut record = FormularyRecord::new(self.id, self.name);
        record.base_name = self.base_name;
        record.active_ingredient = self.active_ingredient;
        record.atc_code = self.atc_code;
        record.is_marketed = self.is_marketed;
        record.route = self.route;
        record.prescription_only = self.prescription_only;
        record.form = self.form;
        record.strength = self.strength;
        record.prepare_search_fields();

        ExpansionCacheEntry {
            record,
            source,
            first_seen,
            last_used,
            use_count: self.use_count.max(1),
        }
    }
}

fn epoch_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn checksum(entries: &[ExpansionCacheEntry]) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(entries)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Default)]
struct ExpansionState {
    entries: HashMap<String, ExpansionCacheEntry>,
    loaded: bool,
}

/// The expansion cache.
pub struct ExpansionCache {
    state: Mutex<ExpansionState>,
    store: Arc<dyn KeyValueStore>,
    config: ExpansionConfig,
    clock: SharedClock,
    /// Bumped on every mutation so dependent caches can invalidate
    generation: AtomicU64,
}

impl std::fmt::Debug for ExpansionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpansionCache")
            .field("config", &self.config)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl ExpansionCache {
    /// Create a cache backed by `store`. Nothing is read until first use.
    pub fn new(store: Arc<dyn KeyValueStore>, config: ExpansionConfig, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(ExpansionState::default()),
            store,
            config,
            clock,
            generation: AtomicU64::new(0),
        }
    }

    /// Create a cache that only lives in memory.
    pub fn in_memory(config: ExpansionConfig, clock: SharedClock) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config, clock)
    }

    /// Mutation counter.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Read the persisted blob if it has not been read yet. Returns the entry count.
    pub async fn load(&self) -> usize {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);
        state.entries.len()
    }

    /// Add an externally resolved record, or refresh it if already present.
    pub async fn add(&self, record: FormularyRecord, source: SourceId) -> ExpansionCacheEntry {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);

        let now = self.clock.utc_now();
        let mut record = record;
        record.prepare_search_fields();

        let entry = match state.entries.get_mut(&record.id) {
            Some(existing) => {
                existing.record = record;
                existing.source = source;
                existing.touch(now);
                existing.clone()
            }
            None => {
                let entry = ExpansionCacheEntry::new(record, source, now);
                debug!(id = %entry.id(), %source, "Adding expansion cache entry");
                state.entries.insert(entry.id().to_string(), entry.clone());
                entry
            }
        };

        self.after_mutation(&mut state);
        entry
    }

    /// Record a use of an entry. Returns false if the id is unknown.
    pub async fn touch(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);

        let now = self.clock.utc_now();
        match state.entries.get_mut(id) {
            Some(entry) => entry.touch(now),
            None => return false,
        }
        self.after_mutation(&mut state);
        true
    }

    /// Look up an entry without counting it as a use.
    pub async fn get(&self, id: &str) -> Option<ExpansionCacheEntry> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);
        state.entries.get(id).cloned()
    }

    /// Entries whose name, base name or ingredient contains the normalized query,
    /// most recently used first.
    pub async fn search(&self, query: &str) -> Vec<ExpansionCacheEntry> {
        let needle = normalize(query);
        if needle.is_empty() {
            return Vec::new();
        }

        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);

        let mut hits: Vec<ExpansionCacheEntry> = state
            .entries
            .values()
            .filter(|entry| {
                let record = &entry.record;
                record.search_name.contains(&needle)
                    || record.search_ingredient.contains(&needle)
                    || normalize(&record.base_name).contains(&needle)
            })
            .cloned()
            .collect();
        sort_recent_first(&mut hits);
        hits
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);

        if state.entries.remove(id).is_none() {
            return false;
        }
        self.after_mutation(&mut state);
        true
    }

    /// All entries, most recently used first.
    pub async fn entries(&self) -> Vec<ExpansionCacheEntry> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);

        let mut entries: Vec<ExpansionCacheEntry> = state.entries.values().cloned().collect();
        sort_recent_first(&mut entries);
        entries
    }

    pub async fn len(&self) -> usize {
        self.load().await
    }

    pub async fn is_empty(&self) -> bool {
        self.load().await == 0
    }

    /// Drop every entry, in memory and in storage.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.loaded = true;
        if let Err(e) = self.store.remove(&self.config.storage_key) {
            warn!(error = %e, "Failed to remove persisted expansion cache");
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Remove idle entries regardless of fill level. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state);

        let removed = self.prune_idle(&mut state);
        if removed > 0 {
            self.persist(&mut state);
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    // ------------------------------------------------------------------------
    // Internals (caller holds the lock)
    // ------------------------------------------------------------------------

    fn ensure_loaded(&self, state: &mut ExpansionState) {
        if state.loaded {
            return;
        }
        state.loaded = true;

        let raw = match self.store.get(&self.config.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to read expansion cache; starting empty");
                return;
            }
        };

        let (entries, migrated) = match serde_json::from_str::<StoredBlob>(&raw) {
            Ok(StoredBlob::Versioned(blob)) => {
                match checksum(&blob.entries) {
                    Ok(sum) if sum == blob.checksum => {}
                    _ => {
                        warn!(
                            version = blob.version,
                            "Expansion cache checksum mismatch; discarding persisted entries"
                        );
                        return;
                    }
                }
                (blob.entries, false)
            }
            Ok(StoredBlob::Legacy(legacy)) => {
                info!(count = legacy.len(), "Migrating legacy expansion cache");
                (legacy.into_iter().map(LegacyEntry::migrate).collect(), true)
            }
            Err(e) => {
                warn!(error = %e, "Unreadable expansion cache; starting empty");
                return;
            }
        };

        for mut entry in entries {
            entry.record.prepare_search_fields();
            state.entries.insert(entry.id().to_string(), entry);
        }

        let before = state.entries.len();
        if before > self.config.capacity {
            let excess = before - self.config.capacity;
            self.evict_lru(state, excess);
        }
        info!(count = state.entries.len(), "Loaded expansion cache");

        if migrated || state.entries.len() != before {
            self.persist(state);
        }
    }

    fn after_mutation(&self, state: &mut ExpansionState) {
        if state.entries.len() >= self.config.prune_watermark() {
            self.prune_idle(state);
        }
        if state.entries.len() > self.config.capacity {
            let excess = state.entries.len() - self.config.capacity;
            self.evict_lru(state, excess);
        }
        self.persist(state);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Remove entries idle past the limit, keeping frequently used ones.
    fn prune_idle(&self, state: &mut ExpansionState) -> usize {
        let cutoff = self.clock.utc_now() - chrono::Duration::days(self.config.idle_days);
        let keep_use_count = self.config.keep_use_count;
        let before = state.entries.len();

        state
            .entries
            .retain(|_, entry| entry.last_used >= cutoff || entry.use_count > keep_use_count);

        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(removed, "Pruned idle expansion cache entries");
        }
        removed
    }

    /// Evict the `count` least recently used entries; ties go to the less used one.
    fn evict_lru(&self, state: &mut ExpansionState, count: usize) {
        if count == 0 {
            return;
        }
        let mut order: Vec<(DateTime<Utc>, u32, String)> = state
            .entries
            .values()
            .map(|entry| (entry.last_used, entry.use_count, entry.id().to_string()))
            .collect();
        order.sort();

        for (_, _, id) in order.into_iter().take(count) {
            state.entries.remove(&id);
        }
        debug!(count, "Evicted expansion cache entries");
    }

    /// Write through to storage. Failures are logged, never returned.
    fn persist(&self, state: &mut ExpansionState) {
        match self.write_blob(state) {
            Ok(()) => {}
            Err(StoreError::QuotaExceeded { needed, limit }) => {
                let batch = self.config.quota_eviction_batch.min(state.entries.len());
                warn!(needed, limit, batch, "Storage quota exceeded; evicting and retrying");
                self.evict_lru(state, batch);
                if let Err(e) = self.write_blob(state) {
                    warn!(error = %e, "Failed to persist expansion cache after eviction");
                }
            }
            Err(e) => warn!(error = %e, "Failed to persist expansion cache"),
        }
    }

    fn write_blob(&self, state: &ExpansionState) -> Result<(), StoreError> {
        let mut entries: Vec<ExpansionCacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.id().cmp(b.id()));

        let blob = match checksum(&entries) {
            Ok(checksum) => PersistedBlob {
                version: EXPANSION_BLOB_VERSION,
                checksum,
                saved_at: self.clock.utc_now(),
                entries,
            },
            Err(e) => {
                warn!(error = %e, "Failed to serialize expansion cache");
                return Ok(());
            }
        };

        let json = match serde_json::to_string(&blob) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize expansion cache");
                return Ok(());
            }
        };
        self.store.set(&self.config.storage_key, &json)
    }
}

fn sort_recent_first(entries: &mut [ExpansionCacheEntry]) {
    entries.sort_by(|a, b| {
        b.last_used
            .cmp(&a.last_used)
            .then_with(|| a.id().cmp(b.id()))
    });
}
