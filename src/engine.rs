// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The Batch/Cache Engine (C6, §4.6): the orchestrator. Accepts requests,
//! serves them from cache where possible, otherwise enqueues them into the
//! current batch, schedules dispatch, and processes the resulting stream
//! of responses — including predictive-prefetch absorption and
//! aggregator/provider failover.
//!
//! All mutable state lives behind a single [`tokio::sync::Mutex`]
//! (`EngineState`), giving the single-owner, serialized-mutation
//! discipline the design calls for (§5) without a literal mailbox: every
//! method that touches state does so through one short-lived lock, and
//! the only work that happens concurrently is awaiting network I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};

use crate::backoff::BackoffState;
use crate::batch::{Batch, BatchResponseSegment};
use crate::cache::{BlockHeight, CacheEntry, Expiration, ResponseCache};
use crate::config::EngineConfig;
use crate::error::{Error, TransportError};
use crate::fingerprint::RequestFingerprint;
use crate::inflight::InflightMap;
use crate::macros::cfg_reqwest_transport;
use crate::provider::{is_aggregator_eligible, ProviderNode, ProviderSelector};
use crate::telemetry::TelemetryBuffer;
use crate::transport::Transport;
use crate::wire::structures::{ClientTail, RequestId, RpcRequest, RpcResponse, TelemetryHit};

const LOG_TARGET: &str = "direct_rpc::engine";

/// A batch's requests plus the fingerprints assigned to each position
/// (extended with prediction fingerprints once a head segment arrives),
/// and the original (pre-prediction) request count.
struct BatchContext {
    batch: Batch,
    fingerprints: Vec<RequestFingerprint>,
    original_count: usize,
}

struct EngineState {
    session_id: String,
    started_at: Instant,
    response_cache: ResponseCache,
    inflight: InflightMap,
    current_block_height: Option<BlockHeight>,
    aggregator_backoff: BackoffState,
    provider_backoff: HashMap<String, BackoffState>,
    telemetry: TelemetryBuffer,
    current_batch: Option<BatchContext>,
    batch_timer_armed: bool,
    head_gate: Option<watch::Receiver<bool>>,
    destroyed: bool,
}

impl EngineState {
    fn new(session_id: String) -> Self {
        EngineState {
            session_id,
            started_at: Instant::now(),
            response_cache: ResponseCache::new(),
            inflight: InflightMap::new(),
            current_block_height: None,
            aggregator_backoff: BackoffState::new(),
            provider_backoff: HashMap::new(),
            telemetry: TelemetryBuffer::new(),
            current_batch: None,
            batch_timer_armed: false,
            head_gate: None,
            destroyed: false,
        }
    }

    fn monotonic_ms(&self, now: Instant) -> u64 {
        now.duration_since(self.started_at).as_millis() as u64
    }
}

/// The result of [`Engine::serve`]ing one request: either already resolved
/// from cache, or a receiver that will resolve once the batch dispatch
/// this request joined completes.
enum Served {
    Ready(RpcResponse),
    Pending(tokio::sync::broadcast::Receiver<RpcResponse>),
}

/// The engine (C6): accepts RPC requests and serves them from cache,
/// in-flight joins, or a fresh aggregator/provider dispatch.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<EngineState>>,
}

cfg_reqwest_transport! {
    impl Engine {
        /// Build an engine using the built-in [`crate::transport::ReqwestTransport`].
        pub fn new(config: EngineConfig) -> Result<Self, Error> {
            Self::with_transport(config, Arc::new(crate::transport::ReqwestTransport::new()))
        }
    }
}

impl Engine {
    /// Build an engine using a custom [`Transport`] implementation.
    pub fn with_transport(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self, Error> {
        config.validate()?;
        let session_id = generate_session_id();
        Ok(Engine { config: Arc::new(config), transport, state: Arc::new(Mutex::new(EngineState::new(session_id))) })
    }

    /// Fetch a single request (§4.6.1).
    pub async fn fetch(&self, req: RpcRequest) -> Result<RpcResponse, Error> {
        let mut responses = self.fetch_many(vec![req]).await?;
        Ok(responses.remove(0))
    }

    /// Fetch many requests at once. Returned responses are paired
    /// positionally with `reqs` (§5 ordering guarantees).
    pub async fn fetch_many(&self, reqs: Vec<RpcRequest>) -> Result<Vec<RpcResponse>, Error> {
        if reqs.is_empty() {
            return Ok(Vec::new());
        }
        for req in &reqs {
            if !req.is_valid() {
                return Err(Error::validation("request is missing a method name"));
            }
        }
        {
            let state = self.state.lock().await;
            if state.destroyed {
                return Err(Error::validation("fetch called after the engine was destroyed"));
            }
        }

        if self.config.dev_mode {
            return self.fetch_via_providers(reqs, Vec::new(), false).await;
        }

        let mut results: Vec<Option<RpcResponse>> = (0..reqs.len()).map(|_| None).collect();
        let mut direct_indices = Vec::new();
        let mut direct_reqs = Vec::new();
        let mut served: Vec<(usize, RequestId, Served)> = Vec::new();

        for (i, req) in reqs.into_iter().enumerate() {
            if !is_aggregator_eligible(&req.method) {
                direct_indices.push(i);
                direct_reqs.push(req);
                continue;
            }
            let caller_id = req.id.clone();
            let outcome = self.serve(req).await?;
            served.push((i, caller_id, outcome));
        }

        // §4.6.1 step 5: trigger batch-dispatch timing after every request
        // in this call has been scheduled, before we await any of them.
        self.trigger_batch_dispatch().await;

        if !direct_reqs.is_empty() {
            let direct_results = self.fetch_via_providers(direct_reqs, Vec::new(), false).await?;
            for (idx, resp) in direct_indices.into_iter().zip(direct_results) {
                results[idx] = Some(resp);
            }
        }

        for (i, caller_id, outcome) in served {
            let resp = match outcome {
                Served::Ready(resp) => resp,
                Served::Pending(mut rx) => {
                    rx.recv().await.unwrap_or_else(|_| RpcResponse::no_response_received(caller_id.clone()))
                }
            };
            results[i] = Some(resp.with_id(caller_id));
        }

        Ok(results.into_iter().map(|r| r.expect("every position populated above")).collect())
    }

    /// Mark the engine as destroyed: further `fetch` calls fail, and any
    /// remaining telemetry is flushed via a best-effort beacon (§4.6.1, §4.8).
    pub async fn destroy(&self) {
        let tail = {
            let mut state = self.state.lock().await;
            state.destroyed = true;
            state.inflight.resolve_all_with_no_response();
            state.telemetry.drain()
        };
        if !tail.is_empty() {
            if let Err(err) = self.send_beacon(tail).await {
                tracing::warn!(target: LOG_TARGET, %err, "best-effort shutdown beacon failed");
            }
        }
    }

    /// §4.6.2 serve procedure: synthetic `eth_blockNumber`, then response
    /// cache, then the head gate, then inflight join, then enqueue.
    async fn serve(&self, req: RpcRequest) -> Result<Served, Error> {
        let now = Instant::now();

        if req.method == "eth_blockNumber" {
            let mut state = self.state.lock().await;
            if let Some(height) = state.current_block_height.clone() {
                if now < height.expires_at {
                    let hit = TelemetryHit {
                        fingerprint: String::new(),
                        observed_at: state.monotonic_ms(now),
                        block_height: Some(height.value.clone()),
                    };
                    state.telemetry.record_cache_hit(hit);
                    return Ok(Served::Ready(RpcResponse::Success {
                        id: req.id,
                        result: serde_json::Value::String(height.value),
                        expires_when_block_height_changes: true,
                        expires_at: None,
                    }));
                }
            }
        }

        let fingerprint = if self.config.predict_on_click {
            RequestFingerprint::of_with_latest_height_override(&req)
        } else {
            RequestFingerprint::of(&req)
        };

        {
            let mut state = self.state.lock().await;
            let current_height = state.current_block_height.clone();
            if let Some(entry) = state.response_cache.get(&fingerprint, now, current_height.as_ref()) {
                let hit = TelemetryHit {
                    fingerprint: fingerprint.as_hex().to_owned(),
                    observed_at: state.monotonic_ms(now),
                    block_height: current_height.map(|h| h.value),
                };
                if entry.prefetched {
                    state.telemetry.record_prefetch_hit(hit);
                } else {
                    state.telemetry.record_cache_hit(hit);
                }
                return Ok(Served::Ready(entry.value.with_id(req.id)));
            }
        }

        self.await_head_gate().await;

        let mut state = self.state.lock().await;
        if let Some(entry) = state.inflight.get(&fingerprint) {
            let hit = TelemetryHit {
                fingerprint: fingerprint.as_hex().to_owned(),
                observed_at: state.monotonic_ms(now),
                block_height: state.current_block_height.as_ref().map(|h| h.value.clone()),
            };
            let prefetched = entry.prefetched;
            let rx = entry.subscribe();
            if prefetched {
                state.telemetry.record_prefetch_hit(hit);
            } else {
                state.telemetry.record_inflight_hit(hit);
            }
            return Ok(Served::Pending(rx));
        }

        let rx = state.inflight.insert(fingerprint.clone(), false);
        let session_id = state.session_id.clone();
        let endpoint = self.config.endpoint_url()?;
        let ctx = state.current_batch.get_or_insert_with(|| BatchContext {
            batch: Batch::new(session_id, endpoint, self.config.prefer_json),
            fingerprints: Vec::new(),
            original_count: 0,
        });
        ctx.batch.push(req)?;
        ctx.fingerprints.push(fingerprint);
        ctx.original_count = ctx.batch.size();

        Ok(Served::Pending(rx))
    }

    async fn await_head_gate(&self) {
        let gate = {
            let state = self.state.lock().await;
            state.head_gate.clone()
        };
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|arrived| *arrived).await;
        }
    }

    /// §4.6.3 batch window scheduler.
    async fn trigger_batch_dispatch(&self) {
        let immediate = self.config.batch_window_ms < 0;
        let ctx_to_dispatch_now = {
            let mut state = self.state.lock().await;
            if state.current_batch.is_none() {
                return;
            }
            if immediate {
                state.current_batch.take()
            } else if state.batch_timer_armed {
                None
            } else {
                state.batch_timer_armed = true;
                state.current_batch.take()
            }
        };

        if let Some(ctx) = ctx_to_dispatch_now {
            self.spawn_dispatch(ctx);
        }

        if !immediate {
            let engine = self.clone();
            let window_ms = self.config.batch_window_ms.max(0) as u64;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(window_ms)).await;
                let ctx = {
                    let mut state = engine.state.lock().await;
                    state.batch_timer_armed = false;
                    state.current_batch.take()
                };
                if let Some(ctx) = ctx {
                    engine.spawn_dispatch(ctx);
                }
            });
        }
    }

    fn spawn_dispatch(&self, ctx: BatchContext) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.dispatch_batch(ctx).await;
        });
    }

    /// §4.6.4 aggregator vs. provider fork.
    async fn dispatch_batch(&self, ctx: BatchContext) {
        let BatchContext { batch, fingerprints, original_count } = ctx;
        let original_requests = batch.requests().to_vec();

        let tail = {
            let mut state = self.state.lock().await;
            state.telemetry.drain()
        };

        let aggregator_eligible = {
            let state = self.state.lock().await;
            state.aggregator_backoff.is_eligible(Instant::now())
        };

        if aggregator_eligible {
            match self.dispatch_via_aggregator(batch, &fingerprints, original_count, tail.clone()).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    state.aggregator_backoff.record_success();
                    return;
                }
                Err(err) => {
                    tracing::warn!(target: LOG_TARGET, %err, "aggregator dispatch failed, falling back to providers");
                    let mut state = self.state.lock().await;
                    state.aggregator_backoff.record_failure(Instant::now());
                    state.telemetry.restore(tail);
                }
            }
        }

        if let Err(err) = self.resolve_via_providers(original_requests, &fingerprints).await {
            tracing::error!(target: LOG_TARGET, %err, "provider fallback for batch also failed");
        }
    }

    /// §4.6.5 response stream processing for an aggregator dispatch.
    async fn dispatch_via_aggregator(
        &self,
        batch: Batch,
        fingerprints: &[RequestFingerprint],
        original_count: usize,
        tail: ClientTail,
    ) -> Result<(), Error> {
        let (head_tx, head_rx) = watch::channel(false);
        {
            let mut state = self.state.lock().await;
            state.head_gate = Some(head_rx);
        }

        let (result, known_fingerprints) =
            self.run_aggregator_stream(batch, fingerprints, original_count, tail, &head_tx).await;
        let _ = head_tx.send(true);

        // Resolve every fingerprint this dispatch ever owned -- including
        // predictions discovered mid-stream -- so no `fetch` call is left
        // hanging (I9, §7 policy 5), regardless of whether the stream ended
        // in error or simply never produced an item for one of them.
        // Already-resolved entries are a no-op.
        {
            let mut state = self.state.lock().await;
            for fp in &known_fingerprints {
                state.inflight.resolve(fp, RpcResponse::no_response_received(RequestId::Number(0)));
            }
        }
        result
    }

    /// Returns the dispatch outcome alongside every fingerprint this batch
    /// came to own (original plus any predictions seen before the stream
    /// ended), so the caller can clean up any still-unresolved stragglers
    /// once the stream ends, regardless of outcome.
    async fn run_aggregator_stream(
        &self,
        batch: Batch,
        fingerprints: &[RequestFingerprint],
        original_count: usize,
        tail: ClientTail,
        head_tx: &watch::Sender<bool>,
    ) -> (Result<(), Error>, Vec<RequestFingerprint>) {
        let mut local_fingerprints = fingerprints.to_vec();
        let stream = match batch.dispatch(self.transport.as_ref(), &[], tail).await {
            Ok(stream) => stream,
            Err(err) => return (Err(err), local_fingerprints),
        };
        futures::pin_mut!(stream);

        let result = self.drain_aggregator_stream(stream, &mut local_fingerprints, original_count, head_tx).await;
        (result, local_fingerprints)
    }

    async fn drain_aggregator_stream(
        &self,
        mut stream: std::pin::Pin<&mut (impl futures::Stream<Item = Result<BatchResponseSegment, Error>> + ?Sized)>,
        local_fingerprints: &mut Vec<RequestFingerprint>,
        original_count: usize,
        head_tx: &watch::Sender<bool>,
    ) -> Result<(), Error> {
        use futures::StreamExt;

        while let Some(segment) = stream.next().await {
            match segment? {
                BatchResponseSegment::Head(head) => {
                    let mut state = self.state.lock().await;
                    for fp_hex in head.predictions {
                        let fp = RequestFingerprint::from(fp_hex);
                        if !state.inflight.contains(&fp) {
                            state.inflight.insert(fp.clone(), true);
                            local_fingerprints.push(fp);
                        }
                    }
                    state.current_block_height = match (head.block_height, head.block_height_expires_at) {
                        (Some(value), Some(expires_in_ms)) => {
                            Some(BlockHeight { value, expires_at: Instant::now() + Duration::from_millis(expires_in_ms) })
                        }
                        _ => None,
                    };
                    drop(state);
                    let _ = head_tx.send(true);
                }
                BatchResponseSegment::Item(resp) => {
                    let RequestId::Number(id) = resp.id() else {
                        tracing::debug!(target: LOG_TARGET, "response with non-numeric id, skipping");
                        continue;
                    };
                    let Some(index) = (*id as usize).checked_sub(1) else { continue };
                    let Some(fp) = local_fingerprints.get(index).cloned() else {
                        tracing::debug!(target: LOG_TARGET, index, "response id did not match a pending fingerprint");
                        continue;
                    };
                    let prefetched = index >= original_count;
                    self.install_and_resolve(&fp, resp, prefetched).await;
                }
            }
        }
        Ok(())
    }

    async fn install_and_resolve(&self, fp: &RequestFingerprint, resp: RpcResponse, prefetched: bool) {
        let mut state = self.state.lock().await;
        if let RpcResponse::Success { expires_when_block_height_changes, expires_at, .. } = &resp {
            if let Some(height) = state.current_block_height.clone() {
                let entry = CacheEntry {
                    value: resp.clone(),
                    expiration: Expiration {
                        when_block_height_changes: *expires_when_block_height_changes,
                        expires_at: expires_at.map(|ms| Instant::now() + Duration::from_millis(ms)),
                    },
                    inception_block_height: Some(height.value),
                    prefetched,
                };
                state.response_cache.insert(fp.clone(), entry);
            }
        }
        state.inflight.resolve(fp, resp);
    }

    /// §4.6.6/§4.6.7 provider chunk fetch with failover, used both for the
    /// non-whitelisted-method bypass and for aggregator-failure fallback.
    async fn fetch_via_providers(
        &self,
        reqs: Vec<RpcRequest>,
        excluded_provider_ids: Vec<String>,
        failover_mode: bool,
    ) -> Result<Vec<RpcResponse>, Error> {
        let now = Instant::now();
        let nodes = self.config.providers.clone();
        if nodes.is_empty() {
            return Err(Error::NoProviders);
        }
        let selector = ProviderSelector::new(&nodes);
        let node = {
            let state = self.state.lock().await;
            selector
                .pick(None, &excluded_provider_ids, now, |url| {
                    state.provider_backoff.get(url).copied().unwrap_or_default()
                })
                .cloned()
        };
        let Some(node) = node else { return Err(Error::NoProviders) };

        let url = url::Url::parse(node.url()).map_err(|e| Error::validation(format!("invalid provider url: {e}")))?;
        let body = encode_plain_json_rpc_batch(&reqs);
        let send_result = self.transport.post(&url, "application/json", body, node.headers()).await;

        match send_result {
            Ok(response) if (200..300).contains(&response.status) => {
                match collect_json_rpc_responses(response).await {
                    Ok(responses) => {
                        let mut state = self.state.lock().await;
                        state.provider_backoff.entry(node.url().to_owned()).or_default().record_success();
                        Ok(pair_by_id(&reqs, responses))
                    }
                    Err(err) => {
                        self.handle_provider_failure(node, reqs, excluded_provider_ids, failover_mode, err).await
                    }
                }
            }
            Ok(response) => {
                let err = Error::Transport {
                    endpoint: node.url().to_owned(),
                    source: TransportError::Status(response.status),
                };
                self.handle_provider_failure(node, reqs, excluded_provider_ids, failover_mode, err).await
            }
            Err(source) => {
                let err = Error::Transport { endpoint: node.url().to_owned(), source };
                self.handle_provider_failure(node, reqs, excluded_provider_ids, failover_mode, err).await
            }
        }
    }

    async fn handle_provider_failure(
        &self,
        node: ProviderNode,
        reqs: Vec<RpcRequest>,
        mut excluded: Vec<String>,
        failover_mode: bool,
        err: Error,
    ) -> Result<Vec<RpcResponse>, Error> {
        {
            let mut state = self.state.lock().await;
            state.provider_backoff.entry(node.url().to_owned()).or_default().record_failure(Instant::now());
        }
        if failover_mode {
            return Err(err);
        }
        if let Some(provider_id) = node.provider_id() {
            excluded.push(provider_id.to_owned());
        }
        Box::pin(self.fetch_via_providers(reqs, excluded, true)).await
    }

    /// Resolve a batch's inflight fingerprints by transparently replaying
    /// its requests against providers (§4.6.4's "transparently retries").
    async fn resolve_via_providers(&self, reqs: Vec<RpcRequest>, fingerprints: &[RequestFingerprint]) -> Result<(), Error> {
        if reqs.is_empty() {
            return Ok(());
        }
        let responses = self.fetch_via_providers(reqs, Vec::new(), false).await;
        match responses {
            Ok(responses) => {
                for (fp, resp) in fingerprints.iter().zip(responses) {
                    self.install_and_resolve(fp, resp, false).await;
                }
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                for fp in fingerprints {
                    state.inflight.resolve(fp, RpcResponse::no_response_received(RequestId::Number(0)));
                }
                Err(err)
            }
        }
    }

    async fn send_beacon(&self, tail: ClientTail) -> Result<(), Error> {
        let url = self.config.endpoint_url()?;
        let value = serde_json::json!({
            "type": "tail",
            "value": {
                "cacheHits": tail.cache_hits.len(),
                "prefetchHits": tail.prefetch_hits.len(),
                "inflightHits": tail.inflight_hits.len(),
            },
        });
        let body = value.to_string().into_bytes();
        self.transport
            .post(&url, "application/x-ndjson", body, &[])
            .await
            .map_err(|source| Error::Transport { endpoint: url.to_string(), source })?;
        Ok(())
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}

fn request_id_to_json(id: &RequestId) -> serde_json::Value {
    match id {
        RequestId::Number(n) => serde_json::Value::from(*n),
        RequestId::Str(s) => serde_json::Value::String(s.clone()),
    }
}

fn encode_plain_json_rpc_batch(reqs: &[RpcRequest]) -> Vec<u8> {
    let values: Vec<serde_json::Value> = reqs
        .iter()
        .map(|req| {
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": request_id_to_json(&req.id),
                "method": req.method,
                "params": req.params,
            })
        })
        .collect();
    serde_json::Value::Array(values).to_string().into_bytes()
}

async fn collect_json_rpc_responses(response: crate::transport::TransportResponse) -> Result<Vec<RpcResponse>, Error> {
    use futures::StreamExt;
    let mut body = response.body;
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend(chunk.map_err(|source| Error::Transport { endpoint: String::new(), source })?);
    }
    if bytes.is_empty() {
        return Err(Error::Transport { endpoint: String::new(), source: TransportError::MissingBody });
    }
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode(format!("invalid JSON-RPC body: {e}")))?;
    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        single => vec![single],
    };
    entries.iter().map(rpc_response_from_json).collect()
}

fn rpc_response_from_json(value: &serde_json::Value) -> Result<RpcResponse, Error> {
    let obj = value.as_object().ok_or_else(|| Error::Decode("expected a JSON-RPC response object".to_owned()))?;
    let id = match obj.get("id") {
        Some(serde_json::Value::Number(n)) => RequestId::Number(n.as_u64().unwrap_or(0)),
        Some(serde_json::Value::String(s)) => RequestId::Str(s.clone()),
        _ => RequestId::Number(0),
    };
    if let Some(error) = obj.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(crate::wire::structures::NO_RESPONSE_ERROR_CODE);
        let message = error.get("message").and_then(|m| m.as_str()).unwrap_or("provider error").to_owned();
        let data = error.get("data").cloned();
        return Ok(RpcResponse::Error { id, error: crate::wire::structures::RpcError { code, message, data } });
    }
    let result = obj.get("result").cloned().ok_or_else(|| Error::Decode("JSON-RPC response missing result/error".to_owned()))?;
    Ok(RpcResponse::Success { id, result, expires_when_block_height_changes: false, expires_at: None })
}

fn pair_by_id(reqs: &[RpcRequest], responses: Vec<RpcResponse>) -> Vec<RpcResponse> {
    let mut by_id: HashMap<RequestId, RpcResponse> = responses.into_iter().map(|r| (r.id().clone(), r)).collect();
    reqs.iter()
        .map(|req| {
            by_id
                .remove(&req.id)
                .unwrap_or_else(|| RpcResponse::no_response_received(req.id.clone()))
        })
        .collect()
}

