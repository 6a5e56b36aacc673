// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Provider nodes, the aggregator method whitelist, and weighted provider
//! selection (C7, §4.7, §6).

use std::time::Instant;

use rand::Rng;

use crate::backoff::BackoffState;
use crate::transport::Header;

/// An upstream RPC provider node (§3 `ProviderNode`). Immutable once built.
#[derive(Debug, Clone)]
pub struct ProviderNode {
    url: String,
    provider_id: Option<String>,
    weighting: f64,
    http_headers: Vec<Header>,
}

impl ProviderNode {
    /// Build a node with the default weighting (`1.0`) and no affinity id.
    pub fn new(url: impl Into<String>) -> Self {
        ProviderNode { url: url.into(), provider_id: None, weighting: 1.0, http_headers: Vec::new() }
    }

    /// Tag this node with a provider family id, used to prefer or exclude
    /// it by affinity during failover (§4.6.6).
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Override this node's selection weighting (must be positive).
    pub fn with_weighting(mut self, weighting: f64) -> Self {
        self.weighting = weighting;
        self
    }

    /// Attach a header sent with every request to this node.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.http_headers.push(Header { name: name.into(), value: value.into() });
        self
    }

    /// This node's endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// This node's provider-family affinity id, if any.
    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    /// This node's selection weighting.
    pub fn weighting(&self) -> f64 {
        self.weighting
    }

    /// The headers sent with every request to this node.
    pub fn headers(&self) -> &[Header] {
        &self.http_headers
    }
}

/// RPC method suffixes (the segment after the last `_`) eligible for the
/// aggregator (§6, §4.7).
const WHITELIST_SUFFIXES: &[&str] = &[
    "blockNumber",
    "call",
    "chainId",
    "gasPrice",
    "getBalance",
    "getBlockByHash",
    "getBlockByNumber",
    "getBlockTransactionCountByHash",
    "getBlockTransactionCountByNumber",
    "getCode",
    "getStorageAt",
    "getTransactionByBlockHashAndIndex",
    "getTransactionByBlockNumberAndIndex",
    "getTransactionByHash",
    "getTransactionCount",
    "getTransactionReceipt",
    "getUncleByBlockHashAndIndex",
    "getUncleByBlockNumberAndIndex",
    "getUncleCountByBlockHash",
    "getUncleCountByBlockNumber",
    "protocolVersion",
];

/// Exact method names eligible for the aggregator regardless of suffix.
const WHITELIST_EXACT: &[&str] = &["direct_primer", "net_version"];

/// `true` if `method` is eligible to be routed through the aggregator
/// (§4.2, §4.7, §6): either an exact whitelisted name, or its trailing
/// segment after the last `_` is a whitelisted suffix.
pub fn is_aggregator_eligible(method: &str) -> bool {
    if WHITELIST_EXACT.contains(&method) {
        return true;
    }
    match method.rsplit_once('_') {
        Some((_, suffix)) => WHITELIST_SUFFIXES.contains(&suffix),
        None => false,
    }
}

/// Selects provider nodes by weighted random draw, skipping those
/// currently backed off, with the forward-progress fallback of §4.6.6.
pub struct ProviderSelector<'a> {
    nodes: &'a [ProviderNode],
}

impl<'a> ProviderSelector<'a> {
    /// Build a selector over `nodes`.
    pub fn new(nodes: &'a [ProviderNode]) -> Self {
        ProviderSelector { nodes }
    }

    /// Pick a node, optionally restricted to a `provider_id` affinity,
    /// skipping nodes whose back-off (looked up via `backoff_of`) hasn't
    /// elapsed. If every affinity-matching node is backing off, falls
    /// back to: a node with a *different* `provider_id` than `excluded`;
    /// then any other node; then, as a last resort, reuse an excluded
    /// node entirely, so selection always makes forward progress.
    pub fn pick(
        &self,
        provider_id: Option<&str>,
        excluded: &[String],
        now: Instant,
        mut backoff_of: impl FnMut(&str) -> BackoffState,
    ) -> Option<&'a ProviderNode> {
        let affinity_filtered: Vec<&ProviderNode> = match provider_id {
            Some(pid) => self.nodes.iter().filter(|n| n.provider_id() == Some(pid)).collect(),
            None => self.nodes.iter().collect(),
        };
        let eligible: Vec<&ProviderNode> =
            affinity_filtered.iter().copied().filter(|n| backoff_of(n.url()).is_eligible(now)).collect();
        if let Some(node) = weighted_pick(&eligible) {
            return Some(node);
        }

        // Everything eligible is backing off. Prefer a node with a
        // different provider_id than anything already excluded this
        // dispatch, then any node at all, then finally reuse an excluded one.
        let different_affinity: Vec<&ProviderNode> = self
            .nodes
            .iter()
            .filter(|n| n.provider_id().map(|pid| !excluded.contains(&pid.to_owned())).unwrap_or(true))
            .collect();
        if let Some(node) = weighted_pick(&different_affinity) {
            return Some(node);
        }
        weighted_pick(&self.nodes.iter().collect::<Vec<_>>())
    }
}

fn weighted_pick<'a>(nodes: &[&'a ProviderNode]) -> Option<&'a ProviderNode> {
    if nodes.is_empty() {
        return None;
    }
    let total: f64 = nodes.iter().map(|n| n.weighting()).sum();
    if total <= 0.0 {
        return nodes.first().copied();
    }
    let mut draw = rand::thread_rng().gen_range(0.0..total);
    for node in nodes {
        if draw < node.weighting() {
            return Some(node);
        }
        draw -= node.weighting();
    }
    // Floating-point drift: fall back to the last node rather than `None`.
    nodes.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_accepts_eth_suffixes() {
        assert!(is_aggregator_eligible("eth_blockNumber"));
        assert!(is_aggregator_eligible("eth_getTransactionReceipt"));
    }

    #[test]
    fn whitelist_accepts_exact_methods() {
        assert!(is_aggregator_eligible("direct_primer"));
        assert!(is_aggregator_eligible("net_version"));
    }

    #[test]
    fn whitelist_rejects_unknown_methods() {
        assert!(!is_aggregator_eligible("eth_subscribe"));
        assert!(!is_aggregator_eligible("custom_method"));
    }

    #[test]
    fn selector_skips_backed_off_nodes() {
        let nodes = vec![ProviderNode::new("https://a"), ProviderNode::new("https://b")];
        let selector = ProviderSelector::new(&nodes);
        let now = Instant::now();
        let picked = selector
            .pick(None, &[], now, |url| {
                let mut state = BackoffState::new();
                if url == "https://a" {
                    state.record_failure(now);
                }
                state
            })
            .unwrap();
        assert_eq!(picked.url(), "https://b");
    }

    #[test]
    fn selector_makes_forward_progress_when_all_backed_off() {
        let nodes = vec![ProviderNode::new("https://a"), ProviderNode::new("https://b")];
        let selector = ProviderSelector::new(&nodes);
        let now = Instant::now();
        let picked = selector.pick(None, &[], now, |_| {
            let mut state = BackoffState::new();
            state.record_failure(now);
            state
        });
        assert!(picked.is_some());
    }

    #[test]
    fn single_node_pool_always_picked() {
        let nodes = vec![ProviderNode::new("https://only")];
        let selector = ProviderSelector::new(&nodes);
        let picked = selector.pick(None, &[], Instant::now(), |_| BackoffState::new()).unwrap();
        assert_eq!(picked.url(), "https://only");
    }
}
