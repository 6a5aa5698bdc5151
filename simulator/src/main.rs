use anyhow::Context;
use clap::Parser;
use roundplay_simulator::{Api, Simulator};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Seed for drawn numbers.
    #[arg(short, long, default_value_t = 0)]
    seed: u64,

    /// Balance granted to these users on startup.
    #[arg(long, value_delimiter = ',')]
    fund: Vec<String>,

    #[arg(long, default_value_t = 10_000)]
    fund_amount: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Create logger
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let simulator = Arc::new(Simulator::new(args.seed));
    for user in &args.fund {
        simulator.credit(user, args.fund_amount);
        info!(user, amount = args.fund_amount, "funded user");
    }
    let api = Api::new(simulator);
    let app = api.router();

    // Start server
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
