use anyhow::Context;
use clap::Parser;

use cashline::{
    api::{self, AppState},
    config::{CliArgs, Config},
    storage, telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    telemetry::init_tracing(&config.logging);

    // the SQL clients are blocking and must not run on an async worker
    let store_config = config.store.clone();
    let seeds = config.accounts.clone();
    let store = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let store = storage::open_store(&store_config).context("opening store")?;
        let seeded = storage::seed_accounts(store.as_ref(), &seeds).context("seeding accounts")?;
        tracing::info!(seeded, "Seed accounts ensured");
        Ok(store)
    })
    .await??;

    let mut state = AppState::new(store);
    if config.server.metrics {
        if let Some(handle) = telemetry::install_metrics() {
            state = state.with_metrics(handle);
        }
    }

    let addr = config.listen_addr().context("invalid listen address")?;
    tracing::info!(%addr, backend = ?config.store.backend, "API listening");

    axum::Server::bind(&addr)
        .serve(api::router(state).into_make_service())
        .await?;

    Ok(())
}
