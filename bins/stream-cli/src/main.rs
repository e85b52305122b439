mod config;
mod error;
mod registry;

use clap::Parser;
use config::{Cli, Commands, Effective};
use registry::TransportRegistry;

mod cmd;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let eff = match Effective::new(&cli.common) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let registry = TransportRegistry::with_defaults(eff.memory.clone());

    let result = match cli.command {
        Commands::Publish(args) => cmd::publish::run(&eff, &registry, args).await,
        Commands::Subscribe(args) => cmd::subscribe::run(&eff, &registry, args).await,
        Commands::Smoke(args) => cmd::smoke::run(&eff, &registry, args).await,
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
