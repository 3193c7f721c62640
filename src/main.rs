//! wharf: an HTTP/1.1 server with WebSocket upgrades.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client                 ┌──────────────────────────────────────────────────────┐
//!   ───────────────────────┼─▶ net::Listener ──▶ net::tls (optional)              │
//!                          │        │                                             │
//!                          │        ▼                                             │
//!                          │   http::driver ──▶ Handler (demo::Demo) ──▶ Response │
//!                          │        │                                      │      │
//!   ◀──────────────────────┼── http::writer ◀──────────────────────────────┘      │
//!                          │        │ 101 Switching Protocols                     │
//!                          │        ▼                                             │
//!   ◀─────────────────────▶┼── websocket::WebSocket (receive / send / ping / close)│
//!                          │                                                      │
//!                          │  config · lifecycle (signals, shutdown) · logging    │
//!                          └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use wharf::config::{load_config, ServerConfig};
use wharf::demo::{Demo, DemoKind};
use wharf::http::HttpServer;
use wharf::lifecycle::{signals, Shutdown};
use wharf::net::{tls, Listener};
use wharf::observability::logging;

#[derive(Parser)]
#[command(name = "wharf")]
#[command(about = "HTTP/1.1 and WebSocket demonstration server", long_about = None)]
struct Cli {
    /// Demonstration handler to serve
    #[arg(long, value_enum, default_value = "hello")]
    handler: DemoKind,

    /// Bind address, overriding the configuration file
    #[arg(short, long)]
    bind: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), handler = ?cli.handler, "wharf starting");

    let listener = Listener::bind(&config.listener).await?;
    let mut server = HttpServer::new(config.clone(), Demo::new(cli.handler));
    if let Some(tls_config) = &config.listener.tls {
        server = server.with_tls(tls::load_tls_acceptor(tls_config)?);
    }

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());
    server.run(listener, shutdown.signal()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
