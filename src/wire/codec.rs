// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Structure codecs (§4.2): a tag-dispatch encoder/decoder registry built
//! on [`super::primitive`]. The "mapper" that picks an encoder by
//! inspecting a value is expressed as the closed, explicit dispatch below
//! rather than open-ended reflection, per the design notes.
//!
//! The decoders, and the request encoder used for outgoing dispatch, stay
//! crate-private: callers only ever see requests and responses through
//! [`crate::wire::structures`]. The response-side encoders
//! ([`encode_head`], [`encode_response`], [`encode_batch_head`],
//! [`encode_tail`]) are public so a test harness can script a well-formed
//! aggregator reply over [`crate::transport::MockTransport`] without
//! reaching into crate internals, mirroring how a real aggregator
//! implementation would produce the same bytes.

use super::primitive::{self, Primitive, StringOrNumber};
use super::structures::{
    BatchHead, ClientTail, DirectHead, RequestId, RpcError, RpcRequest, RpcResponse, TelemetryHit,
};

/// Registered request methods, in tag order. A method not in this list is
/// encoded with the reserved opaque tag instead (§4.2).
const REGISTERED_REQUEST_METHODS: &[&str] = &[
    "direct_primer",
    "eth_blockNumber",
    "eth_call",
    "eth_chainId",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getBlockByNumber",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "net_version",
];

/// Reserved tag for a request whose method isn't in [`REGISTERED_REQUEST_METHODS`].
const OPAQUE_REQUEST_TAG: u8 = 0xFF;

fn request_tag_for(method: &str) -> u8 {
    REGISTERED_REQUEST_METHODS
        .iter()
        .position(|&m| m == method)
        .map(|i| i as u8)
        .unwrap_or(OPAQUE_REQUEST_TAG)
}

fn pack_request_id(id: &RequestId, out: &mut Vec<u8>) {
    let son = match id {
        RequestId::Number(n) => StringOrNumber::Number(n.to_string()),
        RequestId::Str(s) => StringOrNumber::Str(s.clone()),
    };
    primitive::pack_string_or_number(&son, out);
}

fn unpack_request_id(buf: &[u8], cursor: usize) -> (RequestId, usize) {
    let (son, pos) = primitive::unpack_string_or_number(buf, cursor);
    let id = match son {
        StringOrNumber::Number(n) => RequestId::Number(n.parse().unwrap_or(0)),
        StringOrNumber::Str(s) => RequestId::Str(s),
    };
    (id, pos)
}

/// Encode a request per §4.2: a one-byte method tag, the id, and the
/// method name (only for the opaque fallback, since a registered tag
/// already identifies it), followed by the opaque JSON params.
pub(crate) fn encode_request(req: &RpcRequest) -> Vec<u8> {
    let mut out = Vec::new();
    let tag = request_tag_for(&req.method);
    out.push(tag);
    pack_request_id(&req.id, &mut out);
    if tag == OPAQUE_REQUEST_TAG {
        primitive::pack_string(&req.method, &mut out);
    }
    primitive::pack_json(&req.params, &mut out);
    out
}

/// Decode a request packed by [`encode_request`].
pub(crate) fn decode_request(buf: &[u8], cursor: usize) -> (RpcRequest, usize) {
    let Some(&tag) = buf.get(cursor) else {
        return (
            RpcRequest { id: RequestId::Number(0), method: String::new(), params: serde_json::Value::Null },
            cursor,
        );
    };
    let mut pos = cursor + 1;
    let (id, p) = unpack_request_id(buf, pos);
    pos = p;
    let method = if tag == OPAQUE_REQUEST_TAG {
        let (m, p) = primitive::unpack_string(buf, pos);
        pos = p;
        m
    } else {
        REGISTERED_REQUEST_METHODS.get(tag as usize).copied().unwrap_or("").to_owned()
    };
    let (params, pos) = primitive::unpack_json(buf, pos);
    (RpcRequest { id, method, params }, pos)
}

/// Rewrite `req`'s id to an empty string, the canonical form hashed by
/// request fingerprinting (§4.4): `SHA-256(canonical_bytes(r with id=""))`.
pub(crate) fn encode_request_canonical(req: &RpcRequest) -> Vec<u8> {
    let mut cleared = req.clone();
    cleared.id = RequestId::Str(String::new());
    encode_request(&cleared)
}

fn primitive_from_json(value: &serde_json::Value) -> Option<Primitive> {
    match value {
        serde_json::Value::Null => Some(Primitive::Null),
        serde_json::Value::Bool(b) => Some(Primitive::Bool(*b)),
        serde_json::Value::Number(n) => Some(Primitive::Number(n.to_string())),
        serde_json::Value::String(s) => Some(Primitive::Str(s.clone())),
        _ => None,
    }
}

fn json_from_primitive(value: &Primitive) -> serde_json::Value {
    match value {
        Primitive::Null => serde_json::Value::Null,
        Primitive::Bool(b) => serde_json::Value::Bool(*b),
        Primitive::Integer(n) => serde_json::Value::from(*n),
        Primitive::Number(s) => serde_json::from_str(s)
            .unwrap_or_else(|_| serde_json::Value::String(s.clone())),
        Primitive::Str(s) => serde_json::Value::String(s.clone()),
        Primitive::Date { seconds, millis } => {
            serde_json::Value::String(format!("{seconds}.{millis:03}"))
        }
    }
}

const RESPONSE_TAG_SUCCESS_PRIMITIVE: u8 = 0;
const RESPONSE_TAG_SUCCESS_STRUCTURED: u8 = 1;
const RESPONSE_TAG_ERROR: u8 = 2;

/// Encode a response, the mapper choosing success-primitive vs.
/// success-structured vs. error by inspecting the value's shape (§4.2).
pub fn encode_response(resp: &RpcResponse) -> Vec<u8> {
    let mut out = Vec::new();
    match resp {
        RpcResponse::Error { id, error } => {
            out.push(RESPONSE_TAG_ERROR);
            pack_request_id(id, &mut out);
            primitive::pack_number(&error.code.to_string(), &mut out);
            primitive::pack_string(&error.message, &mut out);
            match &error.data {
                Some(data) => {
                    primitive::pack_bool(true, &mut out);
                    primitive::pack_json(data, &mut out);
                }
                None => primitive::pack_bool(false, &mut out),
            }
        }
        RpcResponse::Success { id, result, expires_when_block_height_changes, expires_at } => {
            if let Some(prim) = primitive_from_json(result) {
                out.push(RESPONSE_TAG_SUCCESS_PRIMITIVE);
                pack_request_id(id, &mut out);
                primitive::pack_primitive(&prim, &mut out);
            } else {
                out.push(RESPONSE_TAG_SUCCESS_STRUCTURED);
                pack_request_id(id, &mut out);
                primitive::pack_json(result, &mut out);
            }
            primitive::pack_bool(*expires_when_block_height_changes, &mut out);
            match expires_at {
                Some(t) => {
                    primitive::pack_bool(true, &mut out);
                    primitive::pack_varint(*t, &mut out);
                }
                None => primitive::pack_bool(false, &mut out),
            }
        }
    }
    out
}

/// Decode a response packed by [`encode_response`]. An unrecognised tag
/// decodes to a synthetic "no response received" error so the caller is
/// never left without a response shape to work with.
pub(crate) fn decode_response(buf: &[u8], cursor: usize) -> (RpcResponse, usize) {
    let Some(&tag) = buf.get(cursor) else {
        return (RpcResponse::no_response_received(RequestId::Number(0)), cursor);
    };
    let mut pos = cursor + 1;
    let (id, p) = unpack_request_id(buf, pos);
    pos = p;
    match tag {
        RESPONSE_TAG_ERROR => {
            let (code_str, p) = primitive::unpack_number(buf, pos);
            pos = p;
            let code = code_str.parse().unwrap_or(NO_RESPONSE_PARSE_FALLBACK);
            let (message, p) = primitive::unpack_string(buf, pos);
            pos = p;
            let (has_data, p) = primitive::unpack_bool(buf, pos);
            pos = p;
            let data = if has_data {
                let (d, p) = primitive::unpack_json(buf, pos);
                pos = p;
                Some(d)
            } else {
                None
            };
            (RpcResponse::Error { id, error: RpcError { code, message, data } }, pos)
        }
        RESPONSE_TAG_SUCCESS_PRIMITIVE | RESPONSE_TAG_SUCCESS_STRUCTURED => {
            let result = if tag == RESPONSE_TAG_SUCCESS_PRIMITIVE {
                let (prim, p) = primitive::unpack_primitive(buf, pos);
                pos = p;
                json_from_primitive(&prim)
            } else {
                let (value, p) = primitive::unpack_json(buf, pos);
                pos = p;
                value
            };
            let (expires_when_block_height_changes, p) = primitive::unpack_bool(buf, pos);
            pos = p;
            let (has_expiry, p) = primitive::unpack_bool(buf, pos);
            pos = p;
            let expires_at = if has_expiry {
                let (t, p) = primitive::unpack_varint(buf, pos);
                pos = p;
                Some(t)
            } else {
                None
            };
            (
                RpcResponse::Success { id, result, expires_when_block_height_changes, expires_at },
                pos,
            )
        }
        _ => (RpcResponse::no_response_received(id), pos),
    }
}

const NO_RESPONSE_PARSE_FALLBACK: i64 = crate::wire::structures::NO_RESPONSE_ERROR_CODE;

/// Encode the head segment of an aggregator response (§3 `DirectHead`).
pub fn encode_head(head: &DirectHead) -> Vec<u8> {
    let mut out = Vec::new();
    primitive::pack_array(&head.predictions, &mut out, |p, out| primitive::pack_string(p, out));
    match &head.block_height {
        Some(h) => {
            primitive::pack_bool(true, &mut out);
            primitive::pack_string(h, &mut out);
        }
        None => primitive::pack_bool(false, &mut out),
    }
    match head.block_height_expires_at {
        Some(t) => {
            primitive::pack_bool(true, &mut out);
            primitive::pack_varint(t, &mut out);
        }
        None => primitive::pack_bool(false, &mut out),
    }
    out
}

/// Decode a head segment packed by [`encode_head`].
pub(crate) fn decode_head(buf: &[u8], cursor: usize) -> (DirectHead, usize) {
    let (predictions, mut pos) = primitive::unpack_array(buf, cursor, primitive::unpack_string);
    let (has_height, p) = primitive::unpack_bool(buf, pos);
    pos = p;
    let block_height = if has_height {
        let (s, p) = primitive::unpack_string(buf, pos);
        pos = p;
        Some(s)
    } else {
        None
    };
    let (has_expiry, p) = primitive::unpack_bool(buf, pos);
    pos = p;
    let block_height_expires_at = if has_expiry {
        let (t, p) = primitive::unpack_varint(buf, pos);
        pos = p;
        Some(t)
    } else {
        None
    };
    (DirectHead { predictions, block_height, block_height_expires_at }, pos)
}

/// Encode the head segment of an outgoing (client-to-aggregator) batch.
pub fn encode_batch_head(head: &BatchHead) -> Vec<u8> {
    let mut out = Vec::new();
    primitive::pack_string(&head.session_id, &mut out);
    out
}

/// Decode a batch head packed by [`encode_batch_head`].
pub(crate) fn decode_batch_head(buf: &[u8], cursor: usize) -> (BatchHead, usize) {
    let (session_id, pos) = primitive::unpack_string(buf, cursor);
    (BatchHead { session_id }, pos)
}

fn encode_hit(hit: &TelemetryHit, out: &mut Vec<u8>) {
    primitive::pack_string(&hit.fingerprint, out);
    primitive::pack_varint(hit.observed_at, out);
    match &hit.block_height {
        Some(h) => {
            primitive::pack_bool(true, out);
            primitive::pack_string(h, out);
        }
        None => primitive::pack_bool(false, out),
    }
}

fn decode_hit(buf: &[u8], cursor: usize) -> (TelemetryHit, usize) {
    let (fingerprint, mut pos) = primitive::unpack_string(buf, cursor);
    let (observed_at, p) = primitive::unpack_varint(buf, pos);
    pos = p;
    let (has_height, p) = primitive::unpack_bool(buf, pos);
    pos = p;
    let block_height = if has_height {
        let (s, p) = primitive::unpack_string(buf, pos);
        pos = p;
        Some(s)
    } else {
        None
    };
    (TelemetryHit { fingerprint, observed_at, block_height }, pos)
}

/// Encode the tail segment of an outgoing batch: drained telemetry (§4.8).
pub fn encode_tail(tail: &ClientTail) -> Vec<u8> {
    let mut out = Vec::new();
    primitive::pack_array(&tail.cache_hits, &mut out, |h, out| encode_hit(h, out));
    primitive::pack_array(&tail.prefetch_hits, &mut out, |h, out| encode_hit(h, out));
    primitive::pack_array(&tail.inflight_hits, &mut out, |h, out| encode_hit(h, out));
    out
}

/// Decode a client tail packed by [`encode_tail`]. The aggregator itself
/// ignores the outgoing tail's counterpart on the response stream.
pub(crate) fn decode_tail(buf: &[u8], cursor: usize) -> (ClientTail, usize) {
    let (cache_hits, mut pos) = primitive::unpack_array(buf, cursor, decode_hit);
    let (prefetch_hits, p) = primitive::unpack_array(buf, pos, decode_hit);
    pos = p;
    let (inflight_hits, p) = primitive::unpack_array(buf, pos, decode_hit);
    pos = p;
    (ClientTail { cache_hits, prefetch_hits, inflight_hits }, pos)
}
