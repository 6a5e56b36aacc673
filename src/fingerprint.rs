// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Request fingerprinting (§4.4): a stable, id-independent content hash of
//! an RPC request used as the cache and inflight-map key.

use sha2::{Digest, Sha256};

use crate::wire::structures::RpcRequest;

/// A deterministic hash of `(method, canonicalized params)`, independent of
/// request id and of object-key order (§3 `RequestFingerprint`).
///
/// Two requests with the same method and structurally equal params always
/// produce the same fingerprint, regardless of what id either one carries
/// (I2 in the invariants), and differing params produce different
/// fingerprints with overwhelming probability (I3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Compute the fingerprint of `req`.
    ///
    /// The request's own id plays no part: canonicalization always hashes
    /// the request with its id cleared first (§9's open-question
    /// resolution), so the result can never drift from implementation
    /// coincidence.
    pub fn of(req: &RpcRequest) -> Self {
        let canonical = crate::wire::codec::encode_request_canonical(req);
        Self::from_canonical_bytes(&canonical)
    }

    /// Compute the fingerprint of `req`, first rewriting a trailing
    /// block-height parameter (if present, and if it looks like an
    /// explicit hex height) to the symbolic `"latest"`, so that a request
    /// for `"latest"` and the equivalent request against the
    /// then-current explicit height collapse to one fingerprint (§4.4).
    pub fn of_with_latest_height_override(req: &RpcRequest) -> Self {
        let mut rewritten = req.clone();
        if let serde_json::Value::Array(params) = &mut rewritten.params {
            if let Some(last) = params.last_mut() {
                if is_explicit_block_height(last) {
                    *last = serde_json::Value::String("latest".to_owned());
                }
            }
        }
        Self::of(&rewritten)
    }

    /// Compute the fingerprint directly from bytes already on hand (e.g. a
    /// request just decoded off the wire), avoiding a full re-encode: the
    /// id field within those bytes still needs to be erased first by the
    /// caller via [`crate::wire::codec::encode_request_canonical`]-equivalent
    /// handling; this entry point is for bytes already known canonical.
    pub fn from_canonical_bytes(canonical: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical);
        RequestFingerprint(hex::encode(hasher.finalize()))
    }

    /// The lowercase hex-encoded digest, as carried in wire `head` segments.
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestFingerprint {
    fn from(hex: String) -> Self {
        RequestFingerprint(hex)
    }
}

fn is_explicit_block_height(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => s.starts_with("0x") && !matches!(s.as_str(), "0x"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_method_and_params_same_fingerprint_regardless_of_id() {
        let a = RpcRequest::new(1u64, "eth_blockNumber", serde_json::json!([]));
        let b = RpcRequest::new(2u64, "eth_blockNumber", serde_json::json!([]));
        assert_eq!(RequestFingerprint::of(&a), RequestFingerprint::of(&b));
    }

    #[test]
    fn same_method_and_params_same_fingerprint_regardless_of_key_order() {
        let a = RpcRequest::new(1u64, "eth_call", serde_json::json!([{"to": "0xA", "data": "0x1"}, "latest"]));
        let b = RpcRequest::new(1u64, "eth_call", serde_json::json!([{"data": "0x1", "to": "0xA"}, "latest"]));
        assert_eq!(RequestFingerprint::of(&a), RequestFingerprint::of(&b));
    }

    #[test]
    fn differing_params_differ() {
        let a = RpcRequest::new(1u64, "eth_getBalance", serde_json::json!(["0xA", "latest"]));
        let b = RpcRequest::new(1u64, "eth_getBalance", serde_json::json!(["0xB", "latest"]));
        assert_ne!(RequestFingerprint::of(&a), RequestFingerprint::of(&b));
    }

    #[test]
    fn latest_height_override_collapses_explicit_and_symbolic_height() {
        let symbolic = RpcRequest::new(1u64, "eth_getBalance", serde_json::json!(["0xA", "latest"]));
        let explicit = RpcRequest::new(2u64, "eth_getBalance", serde_json::json!(["0xA", "0x10"]));
        assert_eq!(
            RequestFingerprint::of_with_latest_height_override(&symbolic),
            RequestFingerprint::of_with_latest_height_override(&explicit),
        );
        assert_ne!(RequestFingerprint::of(&symbolic), RequestFingerprint::of(&explicit));
    }

    #[test]
    fn fingerprint_is_lowercase_hex_sha256() {
        let req = RpcRequest::new(1u64, "eth_blockNumber", serde_json::json!([]));
        let fp = RequestFingerprint::of(&req);
        assert_eq!(fp.as_hex().len(), 64);
        assert!(fp.as_hex().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
