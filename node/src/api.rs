//! # HTTP API
//!
//! Read-mostly view of one node, served with axum. Every handler shares the
//! node through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                    | Description                              |
//! |--------|-------------------------|------------------------------------------|
//! | GET    | `/health`               | Liveness probe                           |
//! | GET    | `/status`               | Tip, pool, gossip counters               |
//! | GET    | `/blocks?since=<id>`    | Canonical blocks after `id` (or genesis) |
//! | GET    | `/blocks/:id`           | One block from the block tree            |
//! | GET    | `/pool`                 | Pending transactions, oldest first       |
//! | GET    | `/accounts/:address`    | Balance, nonce and transfer history      |
//! | POST   | `/transactions`         | Sign and submit a transfer from the node |
//! | GET    | `/metrics`              | Prometheus exposition                    |

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use murmur_protocol::crypto::Hash256;
use murmur_protocol::network::{Node, NodeError};
use murmur_protocol::storage::{Block, TransactionRecord};
use murmur_protocol::transaction::Transaction;

use crate::metrics::metrics_handler;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub node: Arc<Node>,
}

impl AppState {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            version: format!(
                "{} (protocol {})",
                env!("CARGO_PKG_VERSION"),
                murmur_protocol::config::PROTOCOL_VERSION,
            ),
            node,
        }
    }
}

/// Builds the router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/blocks", get(blocks_handler))
        .route("/blocks/:id", get(block_handler))
        .route("/pool", get(pool_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/transactions", post(submit_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Hex-encoded view of a transaction.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub nonce: u64,
    pub timestamp: u64,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.to_hex(),
            sender: tx.sender.clone(),
            recipient: tx.recipient.clone(),
            amount: tx.amount,
            nonce: tx.nonce,
            timestamp: tx.timestamp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    pub id: String,
    pub parent: String,
    pub height: u64,
    pub timestamp: u64,
    pub difficulty: u64,
    pub miner: String,
    pub nonce: u64,
    pub transactions: Vec<TransactionResponse>,
}

impl From<&Block> for BlockResponse {
    fn from(block: &Block) -> Self {
        Self {
            id: block.id().to_hex(),
            parent: block.header.parent_hash.to_hex(),
            height: block.header.height,
            timestamp: block.header.timestamp,
            difficulty: block.header.difficulty,
            miner: block.header.miner.clone(),
            nonce: block.header.nonce,
            transactions: block.transactions.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub block: String,
    pub height: u64,
    pub transaction: TransactionResponse,
}

impl From<&TransactionRecord> for HistoryEntry {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            block: record.block.to_hex(),
            height: record.height,
            transaction: (&record.transaction).into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: String,
    pub balance: u64,
    pub nonce: u64,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BlocksQuery {
    pub since: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub recipient: String,
    pub amount: u64,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".into(),
        version: state.version,
    })
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.status())
}

/// `GET /blocks?since=<id>`
///
/// Canonical blocks after `since`, oldest first. Without `since` the walk
/// starts at genesis. 404 when `since` is unknown or off the canonical chain.
async fn blocks_handler(
    State(state): State<AppState>,
    Query(query): Query<BlocksQuery>,
) -> Response {
    let since = match query.since.as_deref() {
        Some(hex) => match Hash256::from_hex(hex) {
            Ok(id) => id,
            Err(e) => return error(StatusCode::BAD_REQUEST, format!("bad block id: {e}")),
        },
        None => state.node.inspect(|s| s.chain.genesis_id()),
    };

    match state.node.blocks_since(&since) {
        Some(blocks) => {
            let body: Vec<BlockResponse> = blocks.iter().map(Into::into).collect();
            Json(body).into_response()
        }
        None => error(
            StatusCode::NOT_FOUND,
            format!("block {} is not on the canonical chain", since.to_hex()),
        ),
    }
}

/// `GET /blocks/:id`
async fn block_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match Hash256::from_hex(&id) {
        Ok(id) => id,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("bad block id: {e}")),
    };
    match state.node.block(&id) {
        Some(block) => Json(BlockResponse::from(&block)).into_response(),
        None => error(StatusCode::NOT_FOUND, format!("block not found: {}", id.to_hex())),
    }
}

/// `GET /pool`
async fn pool_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool: Vec<TransactionResponse> = state.node.pool_snapshot().iter().map(Into::into).collect();
    Json(pool)
}

/// `GET /accounts/:address`
///
/// Unknown addresses read as a zero balance with no history.
async fn account_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    let account = state.node.account(&address);
    let history = state
        .node
        .transaction_history(&address)
        .iter()
        .map(Into::into)
        .collect();
    Json(AccountResponse {
        address,
        balance: account.balance,
        nonce: account.nonce,
        history,
    })
}

/// `POST /transactions`
///
/// Signs a transfer from the node's own account and gossips it.
async fn submit_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Response {
    match state.node.create_transaction(&req.recipient, req.amount) {
        Ok(tx) => (StatusCode::ACCEPTED, Json(TransactionResponse::from(&tx))).into_response(),
        Err(e @ NodeError::BadRecipient(_)) => error(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e @ NodeError::Rejected(_)) => error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        Err(e) => {
            tracing::error!(error = %e, "transaction submission failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
