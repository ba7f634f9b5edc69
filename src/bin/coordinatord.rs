//! `chunkvault-coordinatord`: process entrypoint.

use std::sync::Arc;

use clap::Parser;

use chunkvault::config::{Cli, CoordinatorConfig};
use chunkvault::coordinator::Coordinator;
use chunkvault::http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = CoordinatorConfig::from(cli);
    let addr = config.bind_addr.parse()?;

    let coordinator = Arc::new(Coordinator::bootstrap(config).await?);
    coordinator.spawn_healing_worker();

    http::serve(coordinator, addr).await
}
