// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! This example demonstrates setting up an [`Engine`] against a pool of
//! upstream providers and making a handful of batched RPC calls.

use direct_rpc_client::{Engine, EngineConfig, ProviderNode, RpcRequest};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::new(
        "my-project",
        "mainnet",
        vec![
            ProviderNode::new("https://mainnet.infura.io/v3/your-api-key").with_weighting(2.0),
            ProviderNode::new("https://eth-mainnet.alchemyapi.io/v2/your-api-key"),
        ],
    );
    let engine = Engine::new(config)?;

    // A handful of concurrent calls for the same block height: these join a
    // single in-flight request and a single upstream batch rather than
    // firing off separate round trips.
    let (block_number, balance, chain_id) = tokio::join!(
        engine.fetch(RpcRequest::new(1, "eth_blockNumber", serde_json::json!([]))),
        engine.fetch(RpcRequest::new(
            2,
            "eth_getBalance",
            serde_json::json!(["0x0000000000000000000000000000000000000000", "latest"]),
        )),
        engine.fetch(RpcRequest::new(3, "eth_chainId", serde_json::json!([]))),
    );

    println!("block number: {:?}", block_number?);
    println!("balance: {:?}", balance?);
    println!("chain id: {:?}", chain_id?);

    // A second call to `eth_blockNumber` right after the first is typically
    // served straight from the local cache, with no round trip at all.
    let cached = engine.fetch(RpcRequest::new(4, "eth_blockNumber", serde_json::json!([]))).await?;
    println!("block number (cached): {:?}", cached);

    engine.destroy().await;
    Ok(())
}
