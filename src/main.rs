use anyhow::{Context, Result};
use attache::config::{Config, PreferenceMode};
use attache::dsl::Options;
use attache::router::Router;
use attache::server::{AppState, create_router};
use attache::{capability, logging};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "attache",
    version,
    about = "Convert files, URLs, and repositories into normalized text artifacts"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert one or more inputs and print the artifacts as JSON.
    Process {
        /// Inputs: paths, URLs, or repository specs, each with an optional
        /// inline option block such as `report.pdf[pages: 1-3]`.
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Preference mode override (local, service, local-only, service-only).
        #[arg(long)]
        prefer: Option<PreferenceMode>,
        /// Pretty-print the JSON output.
        #[arg(long)]
        pretty: bool,
    },
    /// Run the self-hosted conversion server.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "0.0.0.0")]
        host: std::net::IpAddr,
        /// Port to bind; falls back to scanning 4200-4299 when unset.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Report which optional capabilities are available.
    Check,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();
    let config = Config::from_env().context("invalid configuration")?;

    match Cli::parse().command {
        Command::Process {
            inputs,
            prefer,
            pretty,
        } => process_inputs(&config, &inputs, prefer, pretty).await,
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::Check => check(),
    }
}

async fn process_inputs(
    config: &Config,
    inputs: &[String],
    prefer: Option<PreferenceMode>,
    pretty: bool,
) -> Result<()> {
    let router = Router::from_config(config);
    let mut artifacts = Vec::new();
    for input in inputs {
        let mut batch = router
            .process(input, &Options::new(), prefer)
            .await
            .with_context(|| format!("failed to process '{input}'"))?;
        artifacts.append(&mut batch);
    }

    let rendered = if pretty {
        serde_json::to_string_pretty(&artifacts)?
    } else {
        serde_json::to_string(&artifacts)?
    };
    println!("{rendered}");
    Ok(())
}

async fn serve(
    config: Config,
    host: std::net::IpAddr,
    port_override: Option<u16>,
) -> Result<()> {
    let state = Arc::new(AppState::from_config(&config));
    let app = create_router(state);

    let port_hint = port_override.or(config.server_port);
    let (listener, port) = bind_listener(host, port_hint)
        .await
        .context("failed to bind listener")?;
    tracing::info!("Listening on http://{}:{}", host, port);
    axum::serve(listener, app).await.context("server exited")
}

async fn bind_listener(
    host: std::net::IpAddr,
    port: Option<u16>,
) -> Result<(TcpListener, u16), std::io::Error> {
    if let Some(port) = port {
        return TcpListener::bind((host, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4200..=4299;
    for port in PORT_RANGE {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4200-4299",
    ))
}

fn check() -> Result<()> {
    let registry = capability::CapabilityRegistry::with_defaults();
    for (group, entry) in registry.check_all() {
        if entry.available {
            println!("{group}: available");
        } else if entry.missing.is_empty() {
            println!("{group}: unavailable");
        } else {
            println!(
                "{group}: unavailable (missing {}) - {}",
                entry.missing.join(", "),
                entry.install_hint
            );
        }
    }
    Ok(())
}
