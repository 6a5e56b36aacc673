// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The error type returned by this crate.

/// Errors which can occur when using the wire protocol's segment framing (§4.3).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The stream's leading version byte wasn't recognised.
    #[error("unknown wire version {0}")]
    UnknownVersion(u8),
    /// A segment's type code wasn't one of `head`/`item`/`tail` (compressed or not).
    #[error("unknown segment type code {0:#04x}")]
    UnknownSegmentType(u8),
    /// An `item` or `tail` segment arrived before any `head`, after a `head` had
    /// already been seen a second time, or otherwise out of the required order.
    #[error("head segment arrived out of order")]
    HeadAfterItem,
    /// More than one `tail` segment was seen.
    #[error("more than one tail segment in stream")]
    MultipleTails,
    /// A segment arrived after a `tail` segment.
    #[error("segment arrived after tail")]
    DataAfterTail,
    /// A single segment's payload exceeded the configured maximum.
    #[error("segment payload of {len} bytes exceeds the configured maximum of {max} bytes")]
    SegmentTooLarge {
        /// The offending segment's declared length.
        len: u64,
        /// The configured maximum.
        max: u64,
    },
    /// The stream's total byte count exceeded the configured maximum.
    #[error("stream size exceeds the configured maximum of {max} bytes")]
    StreamTooLarge {
        /// The configured maximum.
        max: u64,
    },
    /// A segment marked as gzip-compressed did not contain a valid gzip stream.
    #[error("segment marked as compressed did not contain a valid gzip stream")]
    InvalidCompressedPayload,
}

/// A non-2xx or otherwise malformed response from an HTTP endpoint (either the
/// aggregator or a provider node).
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The endpoint responded with a non-2xx HTTP status.
    #[error("http status {0}")]
    Status(u16),
    /// The response had no body where one was expected.
    #[error("response body was empty")]
    MissingBody,
    /// The underlying HTTP client failed (DNS, TLS, connection reset, timeout, ...).
    #[error("http client error: {0}")]
    Client(String),
}

/// The error type returned by this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A request did not conform to the JSON-RPC 2.0 shape, or `fetch` was
    /// called on an engine that has already been destroyed.
    #[error("invalid request: {0}")]
    Validation(String),
    /// The engine or a batch was constructed with an empty provider node list.
    #[error("at least one provider node is required")]
    NoProviders,
    /// Failed to reach the named endpoint.
    #[error("transport error contacting {endpoint}: {source}")]
    Transport {
        /// The endpoint URL that was being contacted.
        endpoint: String,
        /// The underlying transport failure.
        source: TransportError,
    },
    /// The Wire segment-framing protocol was violated.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// A structure codec failed to decode a tag or payload.
    #[error("decode error: {0}")]
    Decode(String),
    /// After exhausting aggregator and provider failover, the final response
    /// received was itself a JSON-RPC error.
    #[error("provider rejected request: {code}: {message}")]
    ProviderRejected {
        /// The JSON-RPC error code.
        code: i64,
        /// The JSON-RPC error message.
        message: String,
    },
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}
