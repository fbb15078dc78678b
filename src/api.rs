use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json as AxumJson, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::custody::Custodian;
use crate::error::LedgerError;
use crate::persist::Store;
use crate::sim::{SimChain, SimGateway};
use crate::types::*;

pub const CALLER_HEADER: &str = "x-streamer-caller";
pub const KEY_HEADER: &str = "x-streamer-key";

pub struct AppState {
    pub custodian: Custodian<SimGateway>,
    pub chain: Arc<SimChain>,
    /// `None` keeps everything in memory.
    pub store: Option<Store>,
    pub api_key: Option<String>,
}

pub fn router(state: Arc<AppState>, sim_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/deposit", post(deposit))
        .route("/withdraw", post(withdraw))
        .route("/balance/:owner/:token", get(balance))
        .route("/allowance/:owner/:spender/:token", get(allowance))
        .route("/custody/:token", get(custody))
        .route("/audit", get(audit))
        .route("/journal", get(journal));
    if sim_enabled {
        app = app
            .route("/sim/mint", post(sim_mint))
            .route("/sim/approve", post(sim_approve))
            .route("/sim/balance/:holder/:token", get(sim_balance));
    }
    app.layer(CorsLayer::permissive()).with_state(state)
}

fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), LedgerError> {
    if let Some(expected) = &state.api_key {
        let got = headers.get(KEY_HEADER).and_then(|h| h.to_str().ok()).unwrap_or("");
        if got != expected { return Err(LedgerError::Unauthorized); }
    }
    Ok(())
}

fn caller(headers: &HeaderMap) -> Result<Address, LedgerError> {
    let raw = headers
        .get(CALLER_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(LedgerError::Unauthorized)?;
    Address::parse(raw)
}

/// Commits ledger and chain together. A failed write is logged, never
/// reported in place of the operation's own outcome: the operation has
/// already happened and the next commit carries it.
async fn persist(state: &AppState) {
    let Some(store) = &state.store else { return };
    if let Err(e) = store.commit(state.custodian.ledger(), &state.chain).await {
        error!(
            "state commit failed path={} version={} err={}",
            store.path().display(),
            state.custodian.ledger().current_version(),
            e
        );
    }
}

pub async fn deposit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumJson(req): AxumJson<DepositReq>,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    let who = caller(&headers)?;

    let result = state.custodian.deposit(&who, &req.token, req.amount);
    // A refused deposit may still have moved tokens into custody.
    persist(&state).await;

    Ok(AxumJson(json!({ "receipt": result? })))
}

pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumJson(req): AxumJson<WithdrawReq>,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    let who = caller(&headers)?;
    let owner = req.owner.clone().unwrap_or_else(|| who.clone());

    let result = state.custodian.withdraw(&who, &owner, &req.token, req.amount);
    // Written on failure too: a compensated withdraw still bumped the version.
    persist(&state).await;

    Ok(AxumJson(json!({ "receipt": result? })))
}

pub async fn balance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((owner, token)): Path<(String, String)>,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    let owner = Address::parse(&owner)?;
    let token = Address::parse(&token)?;
    let balance = state.custodian.balance_of(&owner, &token);
    Ok(AxumJson(json!({ "owner": owner, "token": token, "balance": balance })))
}

pub async fn allowance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((owner, spender, token)): Path<(String, String, String)>,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    let owner = Address::parse(&owner)?;
    let spender = Address::parse(&spender)?;
    let token = Address::parse(&token)?;
    let allowance = state.custodian.allowance(&owner, &spender, &token)?;
    Ok(AxumJson(json!({ "owner": owner, "spender": spender, "token": token, "allowance": allowance })))
}

pub async fn custody(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    let token = Address::parse(&token)?;
    let custodied = state.custodian.custodied_balance(&token)?;
    let obligations = state.custodian.ledger().obligations(&token)?;
    Ok(AxumJson(json!({
        "custody": state.custodian.custody_address(),
        "token": token,
        "custodied": custodied,
        "obligations": obligations
    })))
}

pub async fn audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    let report = state.custodian.audit()?;
    Ok(AxumJson(json!({ "healthy": report.is_healthy(), "report": report })))
}

pub async fn journal(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    let receipts = state.custodian.ledger().journal();
    Ok(AxumJson(json!({ "version": state.custodian.ledger().current_version(), "receipts": receipts })))
}

// --------------------------
// Simulated token chain
// --------------------------
pub async fn sim_mint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumJson(req): AxumJson<MintReq>,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    if req.amount.is_zero() {
        return Err(LedgerError::InvalidAmount);
    }
    let held = state.chain.mint(&req.token, &req.to, req.amount)?;
    persist(&state).await;
    info!("sim mint token={} to={} amount={}", req.token, req.to, req.amount);
    Ok(AxumJson(json!({ "token": req.token, "holder": req.to, "balance": held })))
}

pub async fn sim_approve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumJson(req): AxumJson<ApproveReq>,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    let owner = caller(&headers)?;
    state.chain.approve(&req.token, &owner, &req.spender, req.amount);
    persist(&state).await;
    let allowance = state.chain.allowance(&req.token, &owner, &req.spender);
    Ok(AxumJson(json!({ "token": req.token, "owner": owner, "spender": req.spender, "allowance": allowance })))
}

pub async fn sim_balance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((holder, token)): Path<(String, String)>,
) -> Result<AxumJson<Value>, LedgerError> {
    require_auth(&state, &headers)?;
    let holder = Address::parse(&holder)?;
    let token = Address::parse(&token)?;
    let balance = state.chain.balance_of(&token, &holder);
    Ok(AxumJson(json!({ "token": token, "holder": holder, "balance": balance })))
}

pub async fn health() -> AxumJson<Value> {
    AxumJson(json!({ "ok": true }))
}
