#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

pub const PRIVATE_KEY: [u8; 32] = [7u8; 32];

#[derive(Debug, Clone, Copy)]
pub struct MockConfig {
    pub base_height: u64,
    pub block_interval: Duration,
    pub txs_per_block: usize,
    pub reject_all: bool,
    pub balance: u128,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            base_height: 100,
            block_interval: Duration::from_secs(1),
            txs_per_block: 10,
            reject_all: false,
            balance: 1_000_000,
        }
    }
}

pub struct MockState {
    config: MockConfig,
    started: Instant,
    pub submitted: AtomicU64,
}

impl MockState {
    fn height(&self) -> u64 {
        let elapsed = self.started.elapsed().as_millis() / self.config.block_interval.as_millis();
        self.config.base_height + elapsed as u64
    }
}

/// A GraphQL service that accepts transfers and produces one block per
/// `block_interval` with a constant transaction count.
pub struct MockService {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockService {
    pub async fn spawn(config: MockConfig) -> Self {
        let state = Arc::new(MockState {
            config,
            started: Instant::now(),
            submitted: AtomicU64::new(0),
        });
        let app = Router::new()
            .route("/graphql", post(handle_graphql))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/graphql", self.addr)
    }

    pub fn submitted(&self) -> u64 {
        self.state.submitted.load(Ordering::SeqCst)
    }
}

async fn handle_graphql(
    State(state): State<Arc<MockState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let query = body["query"].as_str().unwrap_or_default();

    if query.contains("sendTransaction") {
        let n = state.submitted.fetch_add(1, Ordering::SeqCst);
        if state.config.reject_all {
            return Json(json!({
                "data": null,
                "errors": [{ "message": "[ProtocolError] Kind: Mempool Error: duplicate nonce" }]
            }));
        }
        return Json(json!({ "data": { "sendTransaction": format!("0x{n:064x}") } }));
    }

    if query.contains("queryService") {
        let succeed = json!({ "balance": state.config.balance }).to_string();
        return Json(json!({
            "data": {
                "queryService": { "code": "0x0", "succeedData": succeed, "errorMessage": "" }
            }
        }));
    }

    let height = match body["variables"]["height"].as_str() {
        Some(raw) => u64::from_str_radix(raw.trim_start_matches("0x"), 16).unwrap(),
        None => state.height(),
    };
    let hashes: Vec<String> = (0..state.config.txs_per_block)
        .map(|i| format!("0x{height:032x}{i:032x}"))
        .collect();
    Json(json!({
        "data": {
            "getBlock": {
                "header": { "height": format!("0x{height:x}"), "proof": { "round": "0x1" } },
                "orderedTxHashes": hashes
            }
        }
    }))
}

pub fn worker_data() -> txbench::WorkerData {
    txbench::WorkerData {
        asset_id: "0xaa".to_string(),
        to: "0xbb".to_string(),
        value: 1,
        chain_id: "0x01".to_string(),
        private_key: hex::encode(PRIVATE_KEY),
        timeout: "0x200".to_string(),
        flush_time: 1,
        index: 0,
    }
}
