// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The response cache and block-height cache (§3 `CacheEntry`, `BlockHeight`;
//! §4.6.2; I7).

use std::collections::HashMap;
use std::time::Instant;

use crate::fingerprint::RequestFingerprint;
use crate::wire::structures::RpcResponse;

/// The current block height, if the engine has one (§3 `BlockHeight`).
#[derive(Debug, Clone)]
pub struct BlockHeight {
    /// The block height value, e.g. `"0x10"`.
    pub value: String,
    /// When this value itself expires.
    pub expires_at: Instant,
}

/// The expiration policy of one cache entry (§3 `CacheEntry.expiration`).
#[derive(Debug, Clone, Copy)]
pub struct Expiration {
    /// If set, the entry is invalid whenever the current block height
    /// differs from `inception_block_height`, or there is no current
    /// block height, or the current block height has itself expired.
    pub when_block_height_changes: bool,
    /// If set, an absolute expiry for the entry regardless of block height.
    pub expires_at: Option<Instant>,
}

/// A cached response plus the metadata needed to judge its validity
/// (§3 `CacheEntry`).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached response (with its id already rewritten to the
    /// batch-local id it was produced under; callers rewrite on read).
    pub value: RpcResponse,
    /// The entry's expiration policy.
    pub expiration: Expiration,
    /// The block height in force when this entry was produced.
    pub inception_block_height: Option<String>,
    /// `true` if this entry was installed by a prediction rather than a
    /// direct caller request.
    pub prefetched: bool,
}

impl CacheEntry {
    /// Apply I7: a cache entry is valid iff `now < expires_at` (when set)
    /// AND (NOT `when_block_height_changes` OR the inception height
    /// matches the still-unexpired current height).
    pub fn is_valid(&self, now: Instant, current: Option<&BlockHeight>) -> bool {
        if let Some(expires_at) = self.expiration.expires_at {
            if now >= expires_at {
                return false;
            }
        }
        if self.expiration.when_block_height_changes {
            match current {
                Some(current) if now < current.expires_at => {
                    if self.inception_block_height.as_deref() != Some(current.value.as_str()) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

/// The engine's response cache, keyed by [`RequestFingerprint`]. Unbounded;
/// invalid entries are evicted lazily on the read path (§5 Memory bounds).
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<RequestFingerprint, CacheEntry>,
}

impl ResponseCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `fingerprint`. If an entry exists but is no longer valid,
    /// it is evicted and `None` is returned (§4.6.2 step 1).
    pub fn get(&mut self, fingerprint: &RequestFingerprint, now: Instant, current: Option<&BlockHeight>) -> Option<CacheEntry> {
        let valid = self.entries.get(fingerprint).map(|e| e.is_valid(now, current)).unwrap_or(false);
        if valid {
            self.entries.get(fingerprint).cloned()
        } else {
            self.entries.remove(fingerprint);
            None
        }
    }

    /// Install or overwrite an entry.
    pub fn insert(&mut self, fingerprint: RequestFingerprint, entry: CacheEntry) {
        self.entries.insert(fingerprint, entry);
    }

    /// The number of entries currently held, valid or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn height(value: &str, now: Instant, ttl_ms: u64) -> BlockHeight {
        BlockHeight { value: value.to_owned(), expires_at: now + std::time::Duration::from_millis(ttl_ms) }
    }

    fn success_entry(when_block_height_changes: bool, expires_at: Option<Instant>, inception: Option<&str>) -> CacheEntry {
        CacheEntry {
            value: RpcResponse::Success {
                id: crate::wire::structures::RequestId::Number(1),
                result: serde_json::json!("0x10"),
                expires_when_block_height_changes: when_block_height_changes,
                expires_at: None,
            },
            expiration: Expiration { when_block_height_changes, expires_at },
            inception_block_height: inception.map(|s| s.to_owned()),
            prefetched: false,
        }
    }

    #[test]
    fn ttl_entry_invalid_after_expiry() {
        let now = Instant::now();
        let entry = success_entry(false, Some(now + std::time::Duration::from_millis(10)), None);
        assert!(entry.is_valid(now, None));
        assert!(!entry.is_valid(now + std::time::Duration::from_millis(20), None));
    }

    #[test]
    fn block_height_entry_invalid_without_current_height() {
        let now = Instant::now();
        let entry = success_entry(true, None, Some("0x10"));
        assert!(!entry.is_valid(now, None));
    }

    #[test]
    fn block_height_entry_invalid_when_height_changed() {
        let now = Instant::now();
        let entry = success_entry(true, None, Some("0x10"));
        let current = height("0x11", now, 30_000);
        assert!(!entry.is_valid(now, Some(&current)));
    }

    #[test]
    fn block_height_entry_valid_when_height_matches() {
        let now = Instant::now();
        let entry = success_entry(true, None, Some("0x10"));
        let current = height("0x10", now, 30_000);
        assert!(entry.is_valid(now, Some(&current)));
    }

    #[test]
    fn cache_evicts_on_invalid_read() {
        let mut cache = ResponseCache::new();
        let now = Instant::now();
        let fp = RequestFingerprint::from("f1".to_owned());
        cache.insert(fp.clone(), success_entry(false, Some(now), None));
        assert!(cache.get(&fp, now + std::time::Duration::from_millis(1), None).is_none());
        assert!(cache.is_empty());
    }
}
