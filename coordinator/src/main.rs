use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use prometheus_client::{encoding::text::encode, registry::Registry};
use roundplay_client::{Client, RetryPolicy};
use roundplay_coordinator::{
    command::Command, notify::Notifier, scheduler::NOTIFICATION_BACKLOG, Config, Scheduler,
};
use roundplay_types::RoundDuration;
use std::{net::SocketAddr, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Coordinates timed betting rounds.", long_about = None)]
struct Args {
    /// Path to the YAML configuration.
    #[arg(short, long)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Load config
    let config_file = std::fs::read_to_string(&args.config)
        .with_context(|| format!("could not read config file {}", args.config))?;
    let config: Config =
        serde_yaml::from_str(&config_file).context("could not parse config file")?;
    let config = config.validate().context("invalid config")?;

    // Create logger
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(config.log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(config.log_level)
            .init();
    }

    // Connect to the round authority
    let client = Client::new(config.authority.as_str())
        .context("could not create client")?
        .with_retry_policy(RetryPolicy {
            max_attempts: config.retry_attempts,
            ..RetryPolicy::default()
        });

    // Surface notifications, including those of the initial synchronization
    let notifier = Notifier::new(NOTIFICATION_BACKLOG);
    let mut notifications = notifier.subscribe();
    let banners = tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => println!("{notification}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notifications dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Start scheduler
    let mut registry = Registry::default();
    let mut scheduler = Scheduler::start_with_notifier(&config, client, &mut registry, notifier);
    let registry = Arc::new(registry);
    if let Some(port) = config.metrics_port {
        serve_metrics(port, registry.clone()).await?;
    }

    // Process commands until quit, EOF or ctrl-c
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("could not read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        execute(&scheduler, &config.currency, command).await;
    }

    scheduler.shutdown().await;
    banners.abort();
    Ok(())
}

async fn execute(scheduler: &Scheduler<Client>, currency: &str, command: Command) {
    match command {
        Command::Select(duration) => {
            scheduler.select(duration);
            println!("selected {duration} ({}s left)", scheduler.remaining(duration));
        }
        Command::Bet { selection, stake } => match scheduler.place_bet(selection, stake).await {
            Ok(bet) => println!(
                "bet {} on round {} ({}) for {}",
                bet.selection, bet.period, bet.duration, bet.stake
            ),
            Err(rejection) => println!("rejected: {rejection}"),
        },
        Command::Status => {
            let selected = scheduler.selected();
            for duration in RoundDuration::ALL {
                let marker = if duration == selected { "*" } else { " " };
                let round = scheduler
                    .round(duration)
                    .map(|round| format!("round {} {:?}", round.period, round.status()))
                    .unwrap_or_else(|| "no round".to_string());
                let pending = scheduler
                    .pending(duration)
                    .map(|bet| format!(", pending {} x{}", bet.selection, bet.stake))
                    .unwrap_or_default();
                println!(
                    "{marker} {duration:>5} {:>4}s {round}{pending}{}",
                    scheduler.remaining(duration),
                    if scheduler.can_bet_on(duration) {
                        ""
                    } else {
                        " (closed)"
                    }
                );
            }
        }
        Command::History { duration, page } => {
            let duration = duration.unwrap_or_else(|| scheduler.selected());
            let page = scheduler.history(duration, page);
            for outcome in &page.items {
                let colors: Vec<_> = outcome.result_color.iter().map(|c| c.as_str()).collect();
                println!(
                    "{} {} {} {}",
                    outcome.period_number,
                    outcome.result_number,
                    colors.join("+"),
                    outcome.result_size.as_str()
                );
            }
            println!("page {}/{}", page.page, page.total_pages);
        }
        Command::Resync(duration) => {
            let duration = duration.unwrap_or_else(|| scheduler.selected());
            match scheduler.resync(duration).await {
                Ok(seeded) => println!(
                    "{duration}: {}s ({})",
                    seeded.seconds,
                    seeded.source.as_str()
                ),
                Err(err) => println!("{duration}: {err}"),
            }
        }
        Command::Reload(duration) => {
            let duration = duration.unwrap_or_else(|| scheduler.selected());
            if scheduler.reload_history(duration).await {
                println!("{duration}: history reloaded");
            }
        }
        Command::Wallet => {
            println!("{} {}", scheduler.wallet().balance(currency), currency);
        }
        Command::Quit => {}
    }
}

async fn serve_metrics(port: u16, registry: Arc<Registry>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics))
        .with_state(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "serving metrics");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(?err, "metrics server failed");
        }
    });
    Ok(())
}

async fn metrics(State(registry): State<Arc<Registry>>) -> Result<String, StatusCode> {
    let mut buffer = String::new();
    encode(&mut buffer, &registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}
