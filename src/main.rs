use std::sync::Arc;
use tracing::{error, info};

use streamer_custody::api::{self, AppState};
use streamer_custody::config::Config;
use streamer_custody::custody::Custodian;
use streamer_custody::ledger::Ledger;
use streamer_custody::persist::Store;
use streamer_custody::sim::{SimChain, SimGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("🚀 Streamer custody {} starting...", env!("CARGO_PKG_VERSION"));
    let config = Config::from_env()?;

    let store = Store::new(&config.state_file);
    let (ledger, chain) = match store.load()? {
        Some(snapshot) => (Ledger::from_state(snapshot.ledger), SimChain::from_state(snapshot.chain)),
        None => (Ledger::in_memory(), SimChain::new()),
    };
    let chain = Arc::new(chain);
    let gateway = SimGateway::new(chain.clone(), config.custody.clone());

    let custodian = Custodian::new(ledger, gateway, config.custody.clone())
        .with_access(config.access_policy())
        .with_keys(config.key_material());

    let report = custodian.audit()?;
    for t in report.tokens.iter().filter(|t| !t.solvent) {
        error!("boot audit: insolvent token={} obligations={} custodied={}", t.token, t.obligations, t.custodied);
    }
    if !report.journal.is_ok() {
        error!("boot audit: journal problems={:?}", report.journal.problems);
    }
    info!("custody={} tokens={} receipts={}", config.custody, report.tokens.len(), report.journal.records);

    let state = Arc::new(AppState { custodian, chain, store: Some(store), api_key: config.api_key.clone() });
    let app = api::router(state, config.sim_enabled);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("✅ Listening on {}", config.bind);
    axum::serve(listener, app).await?;

    Ok(())
}
