// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The inflight cache (§3 `InflightEntry`; §4.6.2 steps 2-4): deduplicates
//! concurrent requests for the same fingerprint and absorbs predictions
//! announced in a `head` segment before they've actually arrived.

use std::collections::HashMap;

use tokio::sync::broadcast;

use crate::fingerprint::RequestFingerprint;
use crate::wire::structures::RpcResponse;

/// Channel capacity for each fingerprint's resolution broadcast. One slot
/// is enough since every entry is resolved exactly once before removal.
const RESOLUTION_CHANNEL_CAPACITY: usize = 1;

/// A pending fingerprint awaiting a response (§3 `InflightEntry`): a
/// promise-like handle plus whether it was installed by a prediction.
pub struct InflightEntry {
    sender: broadcast::Sender<RpcResponse>,
    /// `true` if this entry was installed because the aggregator announced
    /// it as a prediction, rather than because a caller asked for it.
    pub prefetched: bool,
}

impl InflightEntry {
    fn new(prefetched: bool) -> Self {
        let (sender, _receiver) = broadcast::channel(RESOLUTION_CHANNEL_CAPACITY);
        InflightEntry { sender, prefetched }
    }

    /// Subscribe to this entry's eventual resolution.
    pub fn subscribe(&self) -> broadcast::Receiver<RpcResponse> {
        self.sender.subscribe()
    }
}

/// The engine's map of fingerprints currently awaiting a response.
#[derive(Default)]
pub struct InflightMap {
    entries: HashMap<RequestFingerprint, InflightEntry>,
}

impl InflightMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an existing entry for `fingerprint`.
    pub fn get(&self, fingerprint: &RequestFingerprint) -> Option<&InflightEntry> {
        self.entries.get(fingerprint)
    }

    /// `true` if `fingerprint` is currently inflight.
    pub fn contains(&self, fingerprint: &RequestFingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Install a fresh inflight entry for `fingerprint`, overwriting any
    /// existing one, and return a receiver for its resolution.
    pub fn insert(&mut self, fingerprint: RequestFingerprint, prefetched: bool) -> broadcast::Receiver<RpcResponse> {
        let entry = InflightEntry::new(prefetched);
        let receiver = entry.subscribe();
        self.entries.insert(fingerprint, entry);
        receiver
    }

    /// Resolve `fingerprint` with `response`, removing it from the map.
    /// Dropping receivers (no caller was actually waiting, e.g. a
    /// prediction nobody asked for) is not an error.
    pub fn resolve(&mut self, fingerprint: &RequestFingerprint, response: RpcResponse) {
        if let Some(entry) = self.entries.remove(fingerprint) {
            let _ = entry.sender.send(response);
        }
    }

    /// Drain every remaining entry, resolving each with a synthetic
    /// "no response received" error (§4.6.5, §7 policy 5, I9).
    pub fn resolve_all_with_no_response(&mut self) {
        for (_, entry) in self.entries.drain() {
            let _ = entry.sender.send(RpcResponse::no_response_received(
                crate::wire::structures::RequestId::Number(0),
            ));
        }
    }

    /// The number of fingerprints currently inflight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no fingerprints are currently inflight.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> RequestFingerprint {
        RequestFingerprint::from(s.to_owned())
    }

    #[tokio::test]
    async fn second_fetch_joins_existing_inflight_entry() {
        let mut map = InflightMap::new();
        let mut rx1 = map.insert(fp("a"), false);
        assert!(map.contains(&fp("a")));
        let mut rx2 = map.get(&fp("a")).unwrap().subscribe();

        map.resolve(
            &fp("a"),
            RpcResponse::Success {
                id: crate::wire::structures::RequestId::Number(1),
                result: serde_json::json!("0x10"),
                expires_when_block_height_changes: true,
                expires_at: None,
            },
        );

        assert!(rx1.recv().await.unwrap().is_success());
        assert!(rx2.recv().await.unwrap().is_success());
        assert!(!map.contains(&fp("a")));
    }

    #[tokio::test]
    async fn resolve_all_with_no_response_drains_map() {
        let mut map = InflightMap::new();
        let mut rx = map.insert(fp("a"), true);
        map.resolve_all_with_no_response();
        assert!(map.is_empty());
        let response = rx.recv().await.unwrap();
        assert!(!response.is_success());
    }
}
