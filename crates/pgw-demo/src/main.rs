use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pgw_core::testing::{wait_until, MockBackend};
use pgw_core::{Gateway, GatewayConfig, Identity, PairingTokenView, SendRequest, SessionState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgw-demo")]
#[command(about = "PGW Demo - pair a simulated account and send a few messages")]
struct Args {
    /// Configuration file path (falls back to environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Destination for the demo messages
    #[arg(long, default_value = "+57 300 123 4567")]
    to: String,

    /// Message body; repeat to send several
    #[arg(short, long = "message", default_value = "Hello from PGW")]
    messages: Vec<String>,

    /// Log level (overrides the config file)
    #[arg(short, long, env = "PGW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Simulated time between token display and scan
    #[arg(long, default_value_t = 1500)]
    scan_delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => GatewayConfig::from_toml(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::from_env().context("reading configuration from environment")?,
    };

    // Initialize tracing
    let level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pgw_demo={level},pgw_core={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting pgw-demo");

    let backend = Arc::new(MockBackend::new().with_auto_pair(
        "2@demo-pairing-token",
        Identity::named("Demo Store").with_platform("android"),
        Duration::from_millis(args.scan_delay_ms),
    ));
    let gateway = Gateway::new(config, backend.clone())?;

    tokio::select! {
        result = run(&gateway, &args) => {
            if let Err(e) = &result {
                warn!(error = %e, "Demo run failed");
            }
            let stats = gateway.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            gateway.logout().await?;
            gateway.shutdown();
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, logging out");
            gateway.logout().await?;
            gateway.shutdown();
            Ok(())
        }
    }
}

async fn run(gateway: &Gateway, args: &Args) -> anyhow::Result<()> {
    let outcome = gateway.start_session();
    info!(?outcome, "Session start requested");

    let token_shown = wait_until(
        || matches!(gateway.get_pairing_token(), PairingTokenView::Available { .. }),
        Duration::from_secs(10),
    )
    .await;
    if !token_shown {
        anyhow::bail!("no pairing token within 10s");
    }
    println!("{}", serde_json::to_string_pretty(&gateway.get_pairing_token())?);

    let ready = wait_until(
        || gateway.get_status().state == SessionState::Ready,
        Duration::from_secs(60),
    )
    .await;
    if !ready {
        anyhow::bail!("session not ready: {}", gateway.get_status().state);
    }
    println!("{}", serde_json::to_string_pretty(&gateway.get_status())?);

    for body in &args.messages {
        match gateway
            .send_message(SendRequest::new(args.to.clone(), body.clone()))
            .await
        {
            Ok(receipt) => println!("{}", serde_json::to_string_pretty(&receipt)?),
            Err(e) => println!("{}", serde_json::to_string_pretty(&e.to_report())?),
        }
    }

    println!("{}", serde_json::to_string_pretty(&gateway.health())?);
    Ok(())
}
