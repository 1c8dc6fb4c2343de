//! transitedge-client: live route and chat feed client
//!
//! Keeps a route feed and a chat feed connected to the optimization server,
//! prints route updates and chat messages, and sends stdin lines as chat.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transitedge_connector_lib::{
    ChatFeed, ChatMessage, LifecycleEvent, RouteFeed, RouteSnapshot, SendStatus, ServerState,
};
use transitedge_metadata::ClientConfig;
use transitedge_middleware::SocketIoTransport;

#[derive(Parser, Debug)]
#[command(name = "transitedge-client")]
#[command(about = "Live route and chat feed client for TransitEdge")]
struct Args {
    /// Path to client configuration file (defaults apply when omitted)
    #[arg(short, long, env = "TRANSITEDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Server URL, overrides the config file and TRANSITEDGE_SERVER_URL
    #[arg(short, long)]
    server: Option<String>,

    /// Sender name for outgoing chat messages
    #[arg(long)]
    sender: Option<String>,

    /// Status server bind address (disabled when omitted)
    #[arg(long)]
    status_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    }
    .with_env_overrides();
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(sender) = args.sender {
        config.chat.default_sender = sender;
    }
    config.validate()?;
    info!(
        server = %config.server_url,
        poll_interval_secs = config.route.poll_interval_secs,
        reconnection = config.connection.reconnection,
        "Loaded client configuration"
    );

    // Parse status server address up front so a typo fails fast
    let status_addr: Option<SocketAddr> = args.status_addr.as_deref().map(str::parse).transpose()?;

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send(true).ok();
    });

    let transport = Arc::new(SocketIoTransport::new());
    let mut route = RouteFeed::activate(
        &config.server_url,
        config.connection.clone(),
        &config.route,
        transport.clone(),
    );
    let mut chat = ChatFeed::activate(
        &config.server_url,
        config.connection.clone(),
        &config.chat,
        transport,
    );

    if let Some(addr) = status_addr {
        let state = ServerState::new()
            .with_feed("route", route.connection().watch_liveness())
            .with_feed("chat", chat.connection().watch_liveness());
        info!(addr = %addr, "Starting status server");
        tokio::spawn(async move {
            if let Err(e) = transitedge_connector_lib::run_server(addr, state).await {
                error!(error = %e, "Status server failed");
            }
        });
    }

    run(&route, &chat, shutdown_rx).await;

    route.deactivate().await;
    chat.deactivate().await;
    info!("Client stopped");
    Ok(())
}

/// Print feed updates and forward stdin until shutdown
async fn run(route: &RouteFeed, chat: &ChatFeed, mut shutdown: watch::Receiver<bool>) {
    let mut route_updates = route.watch();
    let mut chat_log = chat.watch();
    let mut route_events = route.connection().lifecycle_events();
    let mut chat_events = chat.connection().lifecycle_events();
    let mut printed = 0usize;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Ok(()) = route_updates.changed() => {
                if let Some(snapshot) = route_updates.borrow_and_update().as_ref() {
                    print_route(snapshot);
                }
            }
            Ok(()) = chat_log.changed() => {
                let log = chat_log.borrow_and_update();
                for message in log.iter().skip(printed) {
                    print_chat(message);
                }
                printed = log.len();
            }
            event = route_events.recv() => report("route", event),
            event = chat_events.recv() => report("chat", event),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(text)) => match chat.send_message(&text) {
                    Ok(SendStatus::Sent) | Ok(SendStatus::Skipped) => {}
                    Err(e) => warn!(error = %e, "Message not sent"),
                },
                Ok(None) => {
                    info!("Input closed, chat is receive-only");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    stdin_open = false;
                }
            },
        }
    }
}

fn print_route(snapshot: &RouteSnapshot) {
    let trip = snapshot.trip_id().unwrap_or("-");
    match (
        snapshot.baseline_eta(),
        snapshot.optimized_eta(),
        snapshot.percent_saved(),
    ) {
        (Some(baseline), Some(optimized), Some(saved)) => println!(
            "[route] trip {}: baseline {:.1} min, optimized {:.1} min, {:.1}% saved",
            trip, baseline, optimized, saved
        ),
        (Some(baseline), Some(optimized), None) => println!(
            "[route] trip {}: baseline {:.1} min, optimized {:.1} min",
            trip, baseline, optimized
        ),
        _ => println!("[route] trip {}: {}", trip, snapshot.payload()),
    }
}

fn print_chat(message: &ChatMessage) {
    let time = message
        .sent_at()
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "--:--:--".to_string());
    println!("[{}] {}: {}", time, message.sender, message.message);
}

fn report(feed: &str, event: Result<LifecycleEvent, broadcast::error::RecvError>) {
    match event {
        Ok(LifecycleEvent::RetriesExhausted { attempts }) => {
            error!(feed = %feed, attempts, "Feed gave up reconnecting");
        }
        Ok(event) if event.is_failure() => {
            warn!(feed = %feed, event = ?event, "Feed problem");
        }
        Ok(_) => {}
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(feed = %feed, skipped, "Missed lifecycle events");
        }
        // Handle outlives this loop
        Err(broadcast::error::RecvError::Closed) => {}
    }
}
