// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! A client-side accelerator for JSON-RPC calls to blockchain nodes.
//!
//! Requests made through [`Engine`] are batched and deduplicated, served from a
//! local response cache when possible, and otherwise streamed to a remote
//! aggregator over a compact binary protocol ([`wire`]) that lets the
//! aggregator piggy-back predictively prefetched responses onto its reply.
//! When the aggregator is unreachable, the engine transparently falls back to
//! a pool of upstream [`ProviderNode`]s with per-endpoint exponential back-off.
//!
//! This crate does not write blockchain state, sign transactions, subscribe to
//! chain events, or persist its cache across process restarts; it is a
//! read-path accelerator only.
//!
//! ```no_run
//! # async fn example() -> Result<(), direct_rpc_client::Error> {
//! use direct_rpc_client::{Engine, EngineConfig, ProviderNode, RpcRequest};
//!
//! let config = EngineConfig::new(
//!     "my-project",
//!     "mainnet",
//!     vec![ProviderNode::new("https://mainnet.example-provider.io")],
//! );
//! let engine = Engine::new(config)?;
//!
//! let response = engine
//!     .fetch(RpcRequest::new(1, "eth_blockNumber", serde_json::json!([])))
//!     .await?;
//! println!("{:?}", response);
//! # Ok(())
//! # }
//! ```

mod macros;

pub mod backoff;
pub mod batch;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod inflight;
pub mod provider;
pub mod telemetry;
pub mod transport;
pub mod utils;
pub mod wire;

// Expose the most common things at the top level:
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::Error;
pub use fingerprint::RequestFingerprint;
pub use provider::ProviderNode;
pub use wire::structures::{RpcRequest, RpcResponse};
