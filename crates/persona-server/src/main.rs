use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use persona_server::logging::{self, LogFormat};
use persona_server::{build_state, run_server, EngineKind, GatewayConfig, StartupError};

/// Streaming persona gateway.
#[derive(Parser)]
#[command(name = "persona-server", version)]
struct Cli {
    /// Gateway configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG", default_value = "gateway.toml")]
    config: PathBuf,

    /// Override `server.host`.
    #[arg(long, env = "GATEWAY_HOST")]
    host: Option<String>,

    /// Override `server.port`.
    #[arg(short, long, env = "GATEWAY_PORT")]
    port: Option<u16>,

    /// Override `engine.kind`.
    #[arg(long, value_enum)]
    engine: Option<EngineKind>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(Some(&cli.log_level), LogFormat::from_env());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let mut config = GatewayConfig::load(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(kind) = cli.engine {
        config.engine.kind = kind;
    }
    config.validate()?;

    let addr = config.addr()?;
    let state = build_state(config)?;
    run_server(state, addr).await?;
    tracing::info!("gateway stopped");
    Ok(())
}
