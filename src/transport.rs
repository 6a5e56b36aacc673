// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The HTTP transport abstraction (§4.5, §6): a single half-duplex POST
//! that streams its response body back chunk by chunk, so [`crate::wire::stream::StreamDecoder`]
//! can start yielding segments before the whole body has arrived.

use futures::stream::BoxStream;
use url::Url;

use crate::error::TransportError;
use crate::macros::{cfg_mock_transport, cfg_reqwest_transport};

/// One chunk of an HTTP response body.
pub type ResponseChunk = Result<Vec<u8>, TransportError>;

/// A streamed HTTP response: status code plus a stream of body chunks.
pub struct TransportResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response body, delivered incrementally.
    pub body: BoxStream<'static, ResponseChunk>,
}

/// A single outgoing HTTP header.
#[derive(Debug, Clone)]
pub struct Header {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// Abstraction over the HTTP client used to reach the aggregator and
/// provider nodes. Implementations must use a streaming request body when
/// the runtime supports it, falling back to buffering the whole body
/// otherwise (§4.5) — that choice is a runtime capability check, not
/// something this trait's callers need to know about.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` to `url` with the given content type and headers,
    /// returning the response status and a stream of body chunks.
    async fn post(
        &self,
        url: &Url,
        content_type: &'static str,
        body: Vec<u8>,
        headers: &[Header],
    ) -> Result<TransportResponse, TransportError>;
}

cfg_reqwest_transport! {
    /// A [`Transport`] backed by [`reqwest`].
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        /// Build a transport around a fresh [`reqwest::Client`].
        pub fn new() -> Self {
            ReqwestTransport { client: reqwest::Client::new() }
        }
    }

    impl Default for ReqwestTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ReqwestTransport {
        async fn post(
            &self,
            url: &Url,
            content_type: &'static str,
            body: Vec<u8>,
            headers: &[Header],
        ) -> Result<TransportResponse, TransportError> {
            use futures::StreamExt;

            let mut request = self
                .client
                .post(url.clone())
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body);
            for header in headers {
                request = request.header(header.name.as_str(), header.value.as_str());
            }

            let response = request.send().await.map_err(|e| TransportError::Client(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| TransportError::Client(e.to_string())))
                .boxed();
            Ok(TransportResponse { status, body })
        }
    }
}

cfg_mock_transport! {
    use std::sync::Arc;

    /// A scripted [`Transport`] for tests: a handler closure receives the
    /// request and returns the chunks to yield back as the response body.
    pub struct MockTransport {
        handler: Arc<dyn Fn(&Url, &[u8]) -> Result<(u16, Vec<Vec<u8>>), TransportError> + Send + Sync>,
    }

    impl MockTransport {
        /// Build a mock transport from a handler closure.
        pub fn from_handler(
            handler: impl Fn(&Url, &[u8]) -> Result<(u16, Vec<Vec<u8>>), TransportError> + Send + Sync + 'static,
        ) -> Self {
            MockTransport { handler: Arc::new(handler) }
        }

        /// Build a mock transport that always returns the same status and
        /// body chunks, regardless of the request.
        pub fn fixed(status: u16, chunks: Vec<Vec<u8>>) -> Self {
            Self::from_handler(move |_, _| Ok((status, chunks.clone())))
        }

        /// Build a mock transport that always fails with `error`.
        pub fn failing(error: TransportError) -> Self {
            Self::from_handler(move |_, _| Err(error.clone()))
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn post(
            &self,
            url: &Url,
            _content_type: &'static str,
            body: Vec<u8>,
            _headers: &[Header],
        ) -> Result<TransportResponse, TransportError> {
            use futures::{stream, StreamExt};

            let (status, chunks) = (self.handler)(url, &body)?;
            let body = stream::iter(chunks.into_iter().map(Ok)).boxed();
            Ok(TransportResponse { status, body })
        }
    }
}
