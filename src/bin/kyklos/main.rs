use clap::{Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};

mod common;
mod serve;

#[derive(Debug, Subcommand)]
enum Command {
    Serve(serve::Args),
}

#[derive(Debug, Parser)]
#[clap(name = "Kyklos")]
#[clap(bin_name = "kyklos")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    config: Option<std::path::PathBuf>,
}

#[serde_as]
#[derive(Deserialize, Default, Debug)]
pub struct LoggingConfig {
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub max_level: Option<tracing::Level>,
}

#[derive(Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: kyklos_core::ChainParams,
    pub serve: kyklos_tables::Config,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Layered sources, later ones winning: the system file and a
    /// working-directory file are optional, a path given on the command
    /// line must exist, and `KYKLOS_*` env vars override everything.
    pub fn new(explicit_file: &Option<std::path::PathBuf>) -> Result<Self, config::ConfigError> {
        let explicit = explicit_file.as_deref().and_then(|p| p.to_str());

        let files = [
            Some(("/etc/kyklos/daemon.toml", false)),
            Some(("kyklos.toml", false)),
            explicit.map(|path| (path, true)),
        ];

        let mut builder = config::Config::builder();
        for (path, required) in files.into_iter().flatten() {
            builder = builder.add_source(config::File::with_name(path).required(required));
        }

        builder
            .add_source(config::Environment::with_prefix("KYKLOS").separator("_"))
            .build()?
            .try_deserialize()
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = Config::new(&args.config)
        .into_diagnostic()
        .context("parsing configuration")?;

    match args.command {
        Command::Serve(x) => serve::run(config, &x)?,
    };

    Ok(())
}
