use aegis_console::client::{ServerClient, StaticToken};
use aegis_console::config::ConsoleConfig;
use aegis_console::ipc;
use aegis_console::logging::{init_logging, Redact};
use aegis_console::state::{ConsoleRuntimeState, SharedState};
use aegis_console::status::{self, StatusSettings};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging();
    info!("Aegis console starting");

    let config = ConsoleConfig::load().context("load config")?;
    let tokens = Arc::new(StaticToken::new(config.access_token.clone()));
    let client = ServerClient::new(&config, tokens).context("init server client")?;

    let status = status::spawn(Arc::new(client.clone()), StatusSettings::from(&config));
    let shared_state: SharedState = Arc::new(RwLock::new(ConsoleRuntimeState::new(
        config,
        client,
        status.model(),
    )));

    let ipc_state = shared_state.clone();
    tokio::spawn(async move {
        if let Err(err) = ipc::serve(ipc_state).await {
            error!("IPC server failed: {}", Redact::new(err));
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Aegis console shutting down");
    status.join().await;
    Ok(())
}
