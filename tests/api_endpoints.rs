//! Integration tests for the noded API endpoints
//!
//! These tests verify that the tip endpoint reflects the chain manager's
//! state before and after the chain changes.

use axum_test::TestServer;
use noded::api::build_api_router;
use noded::chain::{BlockHeader, ChainIndex, ChainManager, ChainStore};
use noded::network;
use serde_json::Value;
use std::sync::Arc;

fn zen_chain() -> (Arc<ChainManager>, BlockHeader) {
    let genesis = network::select("zen").expect("zen profile").genesis;
    let store = ChainStore::open_in_memory(&genesis).expect("Failed to open chain store");
    let chain = ChainManager::new(store).expect("Failed to create chain manager");
    (Arc::new(chain), genesis)
}

#[tokio::test]
async fn test_consensus_tip_endpoint() {
    let (chain, genesis) = zen_chain();
    let app = build_api_router(chain.clone());
    let server = TestServer::new(app).expect("Failed to create test server");

    // Fresh chain: tip is genesis
    let response = server.get("/consensus/tip").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["height"], 0);
    assert_eq!(json["id"], genesis.id().to_string());

    // Extend the chain and query again
    let b1 = BlockHeader::child_of(genesis.id(), 1, genesis.timestamp + 600);
    let b2 = BlockHeader::child_of(b1.id(), 2, genesis.timestamp + 1200);
    chain.add_blocks(&[b1, b2.clone()]).expect("Failed to add blocks");

    let response = server.get("/consensus/tip").await;
    assert_eq!(response.status_code(), 200);
    let tip: ChainIndex = response.json();
    assert_eq!(tip, chain.tip());
    assert_eq!(tip.height, 2);
    assert_eq!(tip.id, b2.id());
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (chain, _) = zen_chain();
    let server = TestServer::new(build_api_router(chain)).expect("Failed to create test server");

    let response = server.get("/consensus/blocks").await;
    assert_eq!(response.status_code(), 404);
    let json: Value = response.json();
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_tip_endpoint_is_read_only() {
    let (chain, _) = zen_chain();
    let server = TestServer::new(build_api_router(chain)).expect("Failed to create test server");

    let response = server.post("/consensus/tip").await;
    assert_eq!(response.status_code(), 405);
}
