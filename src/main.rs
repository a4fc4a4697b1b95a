use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use judge_bridge::auth::HmacAuthenticator;
use judge_bridge::config::BridgeConfig;
use judge_bridge::scheduler::Dispatcher;
use judge_bridge::server::BridgeServer;
use judge_bridge::service::{BridgeService, NullService};
use judge_bridge::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "judge-bridge")]
#[command(version)]
#[command(about = "Dispatch bridge between a grading frontend and remote judges")]
struct Args {
    /// Address judges connect to
    #[arg(long, default_value = "127.0.0.1:9999")]
    judge_addr: SocketAddr,

    /// Address the frontend control channel connects to
    #[arg(long, default_value = "127.0.0.1:9998")]
    control_addr: SocketAddr,

    /// Shared secret judges authenticate against
    #[arg(long, env = "BRIDGE_SECRET")]
    secret: String,

    /// Seconds between heartbeat pings to each judge
    #[arg(long, default_value = "10")]
    ping_interval: u64,

    /// Seconds to wait for connections to drain on shutdown
    #[arg(long, default_value = "30")]
    shutdown_grace: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = BridgeConfig::new(args.judge_addr, args.control_addr)
        .with_ping_interval(Duration::from_secs(args.ping_interval))
        .with_shutdown_grace(Duration::from_secs(args.shutdown_grace));

    let service: Arc<dyn BridgeService> = Arc::new(NullService);
    // Clear anything left mid-flight by a previous run before judges can
    // reconnect and report against stale state.
    service.reset_in_flight();

    let dispatcher = Arc::new(Dispatcher::new(&config));
    let auth = Arc::new(HmacAuthenticator::new(args.secret.into_bytes()));

    let server = BridgeServer::new(config, dispatcher, service, auth)
        .bind()
        .await?;

    let shutdown = install_shutdown_handler();
    server.run(shutdown).await?;

    tracing::info!("Bridge stopped");
    Ok(())
}
