// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The batch object (C5, §4.5): accumulates pending requests into an
//! outgoing stream, then dispatches it to the aggregator and exposes the
//! decoded response segments as they stream back in.

use futures::StreamExt;
use url::Url;

use crate::error::{Error, TransportError};
use crate::transport::{Header, Transport};
use crate::wire::codec;
use crate::wire::stream::{CompressionConfig, Segment, StreamDecoder, StreamEncoder, StreamLimits};
use crate::wire::structures::{BatchHead, ClientTail, RequestId, RpcRequest};

const WIRE_CONTENT_TYPE: &str = "application/octet-stream";
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// A decoded segment of the aggregator's response, after it has been fed
/// through the segment-framed stream decoder and the structure codec.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResponseSegment {
    /// The response's head: predictions and the current block height.
    Head(crate::wire::structures::DirectHead),
    /// One decoded response, keyed by its batch-local id.
    Item(crate::wire::structures::RpcResponse),
}

/// Accumulates pending requests for a single outgoing dispatch (§4.5,
/// §3 `Batch`). Requests pushed before [`Batch::dispatch`] is called
/// participate in this batch; `push` after dispatch has begun is rejected.
pub struct Batch {
    session_id: String,
    endpoint_url: Url,
    prefer_ndjson: bool,
    requests: Vec<RpcRequest>,
    dispatched: bool,
}

impl Batch {
    /// Create an empty batch targeting `endpoint_url`.
    pub fn new(session_id: impl Into<String>, endpoint_url: Url, prefer_ndjson: bool) -> Self {
        Batch { session_id: session_id.into(), endpoint_url, prefer_ndjson, requests: Vec::new(), dispatched: false }
    }

    /// Push a request onto the batch, rewriting its id to its 1-based
    /// position. O(1). Returns [`Error::Validation`] if dispatch has
    /// already begun.
    pub fn push(&mut self, mut req: RpcRequest) -> Result<(), Error> {
        if self.dispatched {
            return Err(Error::validation("cannot push onto a batch that has already dispatched"));
        }
        let batch_local_id = (self.requests.len() + 1) as u32;
        req.id = RequestId::batch_local(batch_local_id);
        self.requests.push(req);
        Ok(())
    }

    /// The current number of pending requests.
    pub fn size(&self) -> usize {
        self.requests.len()
    }

    /// A snapshot of the requests currently pushed onto this batch.
    pub fn requests(&self) -> &[RpcRequest] {
        &self.requests
    }

    fn build_wire_body(&self, tail: &ClientTail) -> Result<Vec<u8>, Error> {
        let mut encoder = StreamEncoder::new(CompressionConfig::default());
        encoder.write_head(&codec::encode_batch_head(&BatchHead { session_id: self.session_id.clone() }))?;
        for req in &self.requests {
            encoder.write_item(&codec::encode_request(req))?;
        }
        encoder.write_tail(&codec::encode_tail(tail))?;
        Ok(encoder.finish())
    }

    fn build_ndjson_body(&self, tail: &ClientTail) -> Vec<u8> {
        let mut out = Vec::new();
        let head = serde_json::json!({"type": "head", "value": {"sessionId": self.session_id}});
        out.extend_from_slice(head.to_string().as_bytes());
        out.push(b'\n');
        for req in &self.requests {
            let value = serde_json::json!({
                "type": "item",
                "value": {"id": req.id.to_string(), "method": req.method, "params": req.params},
            });
            out.extend_from_slice(value.to_string().as_bytes());
            out.push(b'\n');
        }
        let tail_value = serde_json::json!({
            "type": "tail",
            "value": {
                "cacheHits": tail.cache_hits.len(),
                "prefetchHits": tail.prefetch_hits.len(),
                "inflightHits": tail.inflight_hits.len(),
            },
        });
        out.extend_from_slice(tail_value.to_string().as_bytes());
        out.push(b'\n');
        out
    }

    /// Seal the batch and dispatch it over `transport`, returning an async
    /// stream of decoded response segments. No further `push` calls are
    /// accepted after this is called, whether it succeeds or fails.
    pub async fn dispatch(
        mut self,
        transport: &dyn Transport,
        headers: &[Header],
        tail: ClientTail,
    ) -> Result<impl futures::Stream<Item = Result<BatchResponseSegment, Error>>, Error> {
        self.dispatched = true;
        let (content_type, body) = if self.prefer_ndjson {
            (NDJSON_CONTENT_TYPE, self.build_ndjson_body(&tail))
        } else {
            (WIRE_CONTENT_TYPE, self.build_wire_body(&tail)?)
        };

        let response = transport.post(&self.endpoint_url, content_type, body, headers).await.map_err(|source| {
            Error::Transport { endpoint: self.endpoint_url.to_string(), source }
        })?;

        if !(200..300).contains(&response.status) {
            return Err(Error::Transport {
                endpoint: self.endpoint_url.to_string(),
                source: TransportError::Status(response.status),
            });
        }

        let endpoint = self.endpoint_url.to_string();
        let mut decoder = StreamDecoder::new(StreamLimits::default());
        let mut body = response.body;
        let stream = async_stream::try_stream! {
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|source| Error::Transport { endpoint: endpoint.clone(), source })?;
                let segments = decoder.push(&chunk)?;
                for segment in segments {
                    match segment {
                        Segment::Head(payload) => {
                            let (head, _) = codec::decode_head(&payload, 0);
                            yield BatchResponseSegment::Head(head);
                        }
                        Segment::Item(payload) => {
                            let (resp, _) = codec::decode_response(&payload, 0);
                            yield BatchResponseSegment::Item(resp);
                        }
                        Segment::Tail(_) => {
                            // The response's tail is a no-op for the client (§4.5).
                        }
                    }
                }
            }
        };
        Ok(stream)
    }
}
