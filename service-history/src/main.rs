use anyhow::{Context, Result};
use service_history::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    init_tracing(&config).context("failed to initialize tracing")?;

    let state = AppState::from_config(config.clone()).context("failed to build service state")?;

    Server::new(config)
        .serve(router(state))
        .await
        .context("server exited with an error")?;

    Ok(())
}
