use std::net::SocketAddr;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock-upstream", about = "Mock upstream chat backend for clipwire")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:5556")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    info!("Mock upstream listening on {}", args.addr);
    info!("Accepted token: {}", clipwire_mock_upstream::MOCK_TOKEN);

    axum::Server::bind(&args.addr)
        .serve(clipwire_mock_upstream::router().into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start mock upstream: {}", e))
}
