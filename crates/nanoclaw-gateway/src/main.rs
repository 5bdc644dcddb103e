//! NanoClaw gateway CLI

use clap::Parser;
use nanoclaw_core::prelude::*;
use nanoclaw_gateway::Gateway;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "nanoclaw")]
#[command(about = "NanoClaw L2 regional gateway")]
#[command(version)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "NANOCLAW_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "NANOCLAW_HOST")]
    host: Option<String>,

    #[arg(long, env = "NANOCLAW_PORT")]
    port: Option<u16>,

    #[arg(long, env = "NANOCLAW_COORDINATOR_URL")]
    coordinator_url: Option<String>,

    #[arg(long, env = "NANOCLAW_GATEWAY_ID")]
    gateway_id: Option<String>,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: json or pretty
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut GatewayConfig) {
        if self.host.is_some() || self.port.is_some() {
            let (default_host, default_port) = config
                .server
                .listen
                .rsplit_once(':')
                .map(|(h, p)| (h.trim_start_matches('[').trim_end_matches(']').to_string(), p.to_string()))
                .unwrap_or_else(|| ("0.0.0.0".to_string(), "8000".to_string()));
            let host = self.host.clone().unwrap_or(default_host);
            let port = self.port.map(|p| p.to_string()).unwrap_or(default_port);
            config.server.listen = listen_address(&host, &port);
        }
        if let Some(ref url) = self.coordinator_url {
            config.coordinator.url = url.clone();
        }
        if let Some(ref id) = self.gateway_id {
            config.gateway_id = id.clone();
        }
        if let Some(ref level) = self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(ref format) = self.log_format {
            config.observability.log_format = format.clone();
        }
    }
}

/// Join host and port, bracketing IPv6 literals
fn listen_address(host: &str, port: &str) -> String {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn init_tracing(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    if config.observability.log_format == "pretty" {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    init_tracing(&config);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting nanoclaw");

    if let Err(e) = Gateway::new(config).run().await {
        error!(error = %e, "Gateway failed");
        return Err(e.into());
    }

    info!("Gateway stopped gracefully");
    Ok(())
}
