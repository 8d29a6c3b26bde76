use clap::Parser;
use gds_cli::{Cli, Commands};
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {err}");
    }

    let result = match &cli.command {
        Commands::Generate {
            config,
            grid_threads,
        } => commands::generate::handle(config, cli.seed, *grid_threads),
        Commands::Assemble { config } => commands::assemble::handle(config, cli.seed),
        Commands::Validate { config } => commands::validate::handle(config, cli.seed),
    };
    if let Err(err) = result {
        error!("{err:#}");
        std::process::exit(1);
    }
}
