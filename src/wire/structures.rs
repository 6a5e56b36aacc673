// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The data model shared by the engine and the wire codec (§3): requests,
//! responses and the framing metadata carried in `head`/`tail` segments.

/// A JSON-RPC request id: either a caller-chosen number or string, or the
/// engine's own batch-local index once a request has been pushed onto a
/// [`crate::batch::Batch`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    /// A numeric id.
    Number(u64),
    /// A string id.
    Str(String),
}

impl RequestId {
    pub(crate) fn batch_local(index: u32) -> Self {
        RequestId::Number(index as u64)
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Str(s.to_owned())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC 2.0 request (§3 `RPCRequest`).
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    /// The caller-chosen id, echoed back on the matching response.
    pub id: RequestId,
    /// The RPC method name, e.g. `"eth_blockNumber"`.
    pub method: String,
    /// Method parameters, kept opaque until a registered codec inspects them.
    pub params: serde_json::Value,
}

impl RpcRequest {
    /// Build a new request with a numeric id.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: serde_json::Value) -> Self {
        RpcRequest { id: id.into(), method: method.into(), params }
    }

    /// Returns `true` if this request is shaped like JSON-RPC 2.0 expects:
    /// a non-empty method name (the `jsonrpc` field itself is implicit in
    /// this type and always considered present).
    pub(crate) fn is_valid(&self) -> bool {
        !self.method.is_empty()
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    /// The JSON-RPC error code.
    pub code: i64,
    /// A human-readable message.
    pub message: String,
    /// Optional additional error data.
    pub data: Option<serde_json::Value>,
}

/// The synthetic error code used when a predicted or enqueued fingerprint
/// never receives a response because the aggregator stream ended early
/// (§6, §4.6.5).
pub const NO_RESPONSE_ERROR_CODE: i64 = 85_000;

impl RpcError {
    pub(crate) fn no_response_received() -> Self {
        RpcError {
            code: NO_RESPONSE_ERROR_CODE,
            message: "no response received from aggregator".to_owned(),
            data: None,
        }
    }
}

/// A JSON-RPC 2.0 response (§3 `RPCResponse`), either a success or an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    /// A successful result.
    Success {
        /// The id this response answers.
        id: RequestId,
        /// The method's result value.
        result: serde_json::Value,
        /// If set, the cache entry this response may seed is invalidated
        /// whenever the current block height changes.
        expires_when_block_height_changes: bool,
        /// If set, an absolute monotonic-ms expiry for any cache entry this
        /// response may seed.
        expires_at: Option<u64>,
    },
    /// An error result.
    Error {
        /// The id this response answers.
        id: RequestId,
        /// The error payload.
        error: RpcError,
    },
}

impl RpcResponse {
    /// The id this response answers, regardless of variant.
    pub fn id(&self) -> &RequestId {
        match self {
            RpcResponse::Success { id, .. } => id,
            RpcResponse::Error { id, .. } => id,
        }
    }

    /// Replace this response's id, used when re-mapping a batch-local id
    /// back to the caller's original id.
    pub(crate) fn with_id(self, id: RequestId) -> Self {
        match self {
            RpcResponse::Success { result, expires_when_block_height_changes, expires_at, .. } => {
                RpcResponse::Success { id, result, expires_when_block_height_changes, expires_at }
            }
            RpcResponse::Error { error, .. } => RpcResponse::Error { id, error },
        }
    }

    /// `true` if this is a success response.
    pub fn is_success(&self) -> bool {
        matches!(self, RpcResponse::Success { .. })
    }

    pub(crate) fn no_response_received(id: RequestId) -> Self {
        RpcResponse::Error { id, error: RpcError::no_response_received() }
    }
}

/// The head segment of an aggregator response (§3 `DirectHead`): announces
/// predicted fingerprints and the current block height, exactly once at
/// the start of the stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirectHead {
    /// Fingerprints (lowercase hex SHA-256) of requests the aggregator is
    /// about to stream unsolicited responses for.
    pub predictions: Vec<String>,
    /// The current block height, if the aggregator is reporting one.
    pub block_height: Option<String>,
    /// Absolute monotonic-ms expiry for `block_height`.
    pub block_height_expires_at: Option<u64>,
}

/// The head segment of an outgoing (client-to-aggregator) batch request.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchHead {
    /// The session identifier for this batch.
    pub session_id: String,
}

/// One telemetry observation: a hit of a given kind against a request
/// fingerprint at a known block height (§4.8).
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryHit {
    /// The fingerprint that was served locally.
    pub fingerprint: String,
    /// Monotonic-ms timestamp of the observation.
    pub observed_at: u64,
    /// The block height in force at the moment of the hit, if known.
    pub block_height: Option<String>,
}

/// The tail segment of an outgoing batch request: drained telemetry
/// buffers for cache/prefetch/inflight hits (§4.8).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientTail {
    /// Hits served from the response cache.
    pub cache_hits: Vec<TelemetryHit>,
    /// Hits served from a predicted (prefetched) entry.
    pub prefetch_hits: Vec<TelemetryHit>,
    /// Hits served by joining an in-flight request.
    pub inflight_hits: Vec<TelemetryHit>,
}

impl ClientTail {
    /// `true` if none of the three telemetry buffers have entries.
    pub fn is_empty(&self) -> bool {
        self.cache_hits.is_empty() && self.prefetch_hits.is_empty() && self.inflight_hits.is_empty()
    }
}
