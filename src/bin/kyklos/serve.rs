use miette::{Context, IntoDiagnostic};
use tracing::warn;

use kyklos_core::Driver as _;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Fill the stores with deterministic fixture data before serving.
    #[arg(long, default_value_t = false)]
    pub seed: bool,
}

#[tokio::main]
pub async fn run(config: super::Config, args: &Args) -> miette::Result<()> {
    crate::common::setup_tracing(&config.logging)?;

    let domain = crate::common::build_domain(&config, args.seed);
    let exit = crate::common::shutdown_token();

    kyklos_tables::Driver::run(config.serve, domain, exit)
        .await
        .into_diagnostic()
        .context("serving table queries")?;

    warn!("shutdown complete");

    Ok(())
}
