use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley — one-to-one chat and call-signaling gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Config file path; standard discovery when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

fn load(config: Option<PathBuf>) -> anyhow::Result<parley_config::ParleyConfig> {
    match config {
        Some(path) => {
            let mut cfg = parley_config::load_config(&path)?;
            parley_config::apply_overrides(&mut cfg, |key| std::env::var(key).ok());
            Ok(cfg)
        }
        None => Ok(parley_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Commands::Gateway { bind, port, config } => {
            let mut cfg = load(config)?;
            if let Some(bind) = bind {
                cfg.gateway.bind = bind;
            }
            if let Some(port) = port {
                cfg.gateway.port = port;
            }
            parley_gateway::start_gateway(cfg).await
        }
        Commands::Config { config } => {
            let mut cfg = load(config)?;
            if !cfg.auth.secret.is_empty() {
                cfg.auth.secret = "<redacted>".into();
            }
            println!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }
    }
}
