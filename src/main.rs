use std::process::ExitCode;
use tracing::{error, info};

use intercept_tunnel::config::ProxyConfig;
use intercept_tunnel::utils::logging;
use intercept_tunnel::{ProxyServer, Result};

const CONFIG_ENV: &str = "INTERCEPT_TUNNEL_CONFIG";

fn load_config() -> Result<ProxyConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());
    let mut config = match path {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::default(),
    };
    config.apply_env();
    config.validate_strict()?;
    Ok(config)
}

async fn run() -> Result<()> {
    let config = load_config()?;
    logging::init(&config.logging)?;
    info!(
        listen = %config.server.listen_address,
        upstream = %config.server.upstream_address,
        auxiliary = %config.auxiliary.listen_address,
        "Starting intercept tunnel"
    );
    ProxyServer::new(config)?.start().await
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Proxy stopped");
            eprintln!("intercept-tunnel: {e}");
            ExitCode::FAILURE
        }
    }
}
