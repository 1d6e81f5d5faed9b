//! Ledger reconciliation.
//!
//! Snapshots height and balance before the run, then after it collects every
//! block produced in the window and totals the transactions they committed.
//! Transactions in flight at the cutoff may land in a block just outside the
//! window; that bounded noise is accepted.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{BenchError, Result};
use crate::graphql::{self, GraphQlRequest};

const LATEST_HEIGHT_QUERY: &str = "query { getBlock { header { height } } }";
const BLOCK_QUERY: &str = "query ($height: Uint64) { getBlock(height: $height) { header { height proof { round } } orderedTxHashes } }";
const BALANCE_QUERY: &str = "query ($payload: String!) { queryService(serviceName: \"asset\", method: \"get_balance\", payload: $payload) { code succeedData errorMessage } }";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub block_height: u64,
    pub account_balance: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub transactions_count: u64,
    pub round: u64,
}

/// Everything `end()` learned about the run window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub start: LedgerSnapshot,
    pub end: LedgerSnapshot,
    /// Height observed when traffic stopped. Blocks above it were only
    /// waited for while settling.
    pub cutoff_height: u64,
    /// Blocks produced in `(start, cutoff]`.
    pub block_usage: u64,
    /// Transactions committed in those blocks.
    pub transfer_processed: u64,
    /// Blocks in `(cutoff, end]`, kept out of the throughput figures.
    pub settled_blocks: u64,
    pub settled_transactions: u64,
    /// Every collected block keyed by height, so iteration is ascending.
    pub blocks: BTreeMap<u64, BlockInfo>,
}

/// Read access to ledger state.
#[async_trait]
pub trait LedgerProbe: Send + Sync {
    async fn latest_height(&self) -> Result<u64>;
    async fn balance(&self) -> Result<u128>;
    async fn block(&self, height: u64) -> Result<BlockInfo>;
}

/// How long `end()` waits for in-flight transactions to be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    /// Extra blocks to wait for past the height observed at cutoff.
    pub blocks: u64,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            blocks: 0,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Started(LedgerSnapshot),
    Finished,
}

impl Phase {
    fn describe(&self) -> &'static str {
        match self {
            Phase::Idle => "not started",
            Phase::Started(_) => "already started",
            Phase::Finished => "already finished",
        }
    }
}

/// Captures start/end snapshots. `start` and `end` may each be called once,
/// in that order.
pub struct LedgerReconciler<P> {
    probe: P,
    settle: SettlePolicy,
    phase: Phase,
}

impl<P: LedgerProbe> LedgerReconciler<P> {
    pub fn new(probe: P, settle: SettlePolicy) -> Self {
        Self {
            probe,
            settle,
            phase: Phase::Idle,
        }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub async fn start(&mut self) -> Result<LedgerSnapshot> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(BenchError::ReconcilerState {
                operation: "start",
                state: self.phase.describe(),
            });
        }
        let snapshot = self.snapshot().await?;
        info!(
            height = snapshot.block_height,
            balance = %snapshot.account_balance,
            "captured start snapshot"
        );
        self.phase = Phase::Started(snapshot);
        Ok(snapshot)
    }

    pub async fn end(&mut self) -> Result<Reconciliation> {
        let start = match self.phase {
            Phase::Started(snapshot) => snapshot,
            other => {
                return Err(BenchError::ReconcilerState {
                    operation: "end",
                    state: other.describe(),
                })
            }
        };
        self.phase = Phase::Finished;

        let cutoff_height = self.probe.latest_height().await?;
        let end_height = self.settled_height(cutoff_height).await?;
        let end = LedgerSnapshot {
            block_height: end_height,
            account_balance: self.probe.balance().await?,
        };

        let mut blocks = BTreeMap::new();
        for height in start.block_height.saturating_add(1)..=end.block_height {
            let info = self.probe.block(height).await?;
            debug!(height, txs = info.transactions_count, round = info.round, "collected block");
            blocks.insert(height, info);
        }

        let (mut block_usage, mut transfer_processed) = (0, 0);
        let (mut settled_blocks, mut settled_transactions) = (0, 0);
        for (height, info) in &blocks {
            if *height <= cutoff_height {
                block_usage += 1;
                transfer_processed += info.transactions_count;
            } else {
                settled_blocks += 1;
                settled_transactions += info.transactions_count;
            }
        }
        info!(
            cutoff = cutoff_height,
            height = end.block_height,
            blocks = block_usage,
            transactions = transfer_processed,
            settled_blocks,
            "captured end snapshot"
        );

        Ok(Reconciliation {
            start,
            end,
            cutoff_height,
            block_usage,
            transfer_processed,
            settled_blocks,
            settled_transactions,
            blocks,
        })
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        Ok(LedgerSnapshot {
            block_height: self.probe.latest_height().await?,
            account_balance: self.probe.balance().await?,
        })
    }

    /// `cutoff`, or up to `settle.blocks` later if the chain gets there
    /// before the timeout.
    async fn settled_height(&self, cutoff: u64) -> Result<u64> {
        if self.settle.blocks == 0 {
            return Ok(cutoff);
        }
        let target = cutoff.saturating_add(self.settle.blocks);
        let deadline = tokio::time::Instant::now() + self.settle.timeout;
        let mut height = cutoff;
        while height < target && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(self.settle.poll_interval).await;
            height = self.probe.latest_height().await?;
        }
        if height < target {
            info!(cutoff, height, target, "settle timeout reached");
        }
        Ok(height.min(target))
    }
}

/// [`LedgerProbe`] over the service's GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphQlLedger {
    client: reqwest::Client,
    url: reqwest::Url,
    asset_id: String,
    account: String,
}

impl GraphQlLedger {
    pub fn new(url: &str, asset_id: impl Into<String>, account: impl Into<String>) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|err| BenchError::InvalidConfig(format!("invalid url {url}: {err}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url,
            asset_id: asset_id.into(),
            account: account.into(),
        })
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&GraphQlRequest { query, variables })
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(BenchError::Ledger(format!(
                "status {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }
        graphql::decode(&body)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetBlockData {
    get_block: BlockView,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockView {
    header: HeaderView,
    #[serde(default)]
    ordered_tx_hashes: Vec<String>,
}

#[derive(Deserialize)]
struct HeaderView {
    height: String,
    proof: Option<ProofView>,
}

#[derive(Deserialize)]
struct ProofView {
    round: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryServiceData {
    query_service: ServiceResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceResponse {
    code: String,
    succeed_data: String,
    error_message: String,
}

#[derive(Deserialize)]
struct BalanceView {
    balance: u128,
}

#[async_trait]
impl LedgerProbe for GraphQlLedger {
    async fn latest_height(&self) -> Result<u64> {
        let data: GetBlockData = self.query(LATEST_HEIGHT_QUERY, json!({})).await?;
        graphql::parse_quantity(&data.get_block.header.height)
    }

    async fn balance(&self) -> Result<u128> {
        let payload = json!({ "asset_id": self.asset_id, "user": self.account }).to_string();
        let data: QueryServiceData = self
            .query(BALANCE_QUERY, json!({ "payload": payload }))
            .await?;
        let response = data.query_service;
        if graphql::parse_quantity(&response.code)? != 0 {
            return Err(BenchError::Ledger(format!(
                "get_balance failed (code {}): {}",
                response.code, response.error_message
            )));
        }
        let view: BalanceView = serde_json::from_str(&response.succeed_data)?;
        Ok(view.balance)
    }

    async fn block(&self, height: u64) -> Result<BlockInfo> {
        let data: GetBlockData = self
            .query(BLOCK_QUERY, json!({ "height": format!("0x{height:x}") }))
            .await?;
        let round = match &data.get_block.header.proof {
            Some(proof) => graphql::parse_quantity(&proof.round)?,
            None => 0,
        };
        Ok(BlockInfo {
            transactions_count: data.get_block.ordered_tx_hashes.len() as u64,
            round,
        })
    }
}
