use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::{filter::Targets, prelude::*};

use kyklos::KyklosDomain;
use kyklos_testing::{account_entries, block_entries, seed_tables};

use crate::LoggingConfig;

pub fn setup_tracing(config: &LoggingConfig) -> miette::Result<()> {
    let level = config.max_level.unwrap_or(tracing::Level::INFO);

    let filter = Targets::new()
        .with_target("kyklos", level)
        .with_target("kyklos_tables", level)
        .with_target("kyklos_memtable", level)
        .with_target("tower_http", level);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Build the domain, optionally pre-filled with the deterministic dev
/// fixtures so the server is queryable without an ingestion pipeline.
pub fn build_domain(config: &super::Config, seed: bool) -> KyklosDomain {
    let domain = KyklosDomain::new(config.chain.clone());

    if seed {
        tracing::info!("seeding synthetic fixture data");
        seed_tables(domain.table_store(), &config.chain);
        domain.replace_blocks(block_entries());
        domain.replace_accounts(account_entries());
    }

    domain
}

/// Token that trips once the process receives ctrl-c.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();

    let trip = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => trip.cancel(),
            Err(err) => debug!(%err, "shutdown signal unavailable"),
        }
    });

    token
}
