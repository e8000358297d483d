use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tapline_net::cert_fingerprint;
use tapline_proxy::{ProxyConfig, ProxyEvents, ProxyServer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tapline-proxy-cli", about = "Local TLS-intercepting HTTP proxy")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Port to listen on; the next free port is used when it is taken.
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding the root certificate and key.
    #[arg(long = "ca-dir")]
    ca_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the proxy and print captured traffic as JSON lines.
    Run,
    /// Print the root certificate location and fingerprint.
    CaInfo,
    /// Replace the root certificate.
    RegenerateCa,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    init_logging();

    let config = load_config(&cli)?;
    let authority = Arc::new(config.authority().map_err(|err| err.to_string())?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, authority, cli.port).await,
        Command::CaInfo => {
            let info = authority.initialize().map_err(|err| err.to_string())?;
            let fingerprint =
                cert_fingerprint(info.cert_pem.as_bytes()).map_err(|err| err.to_string())?;
            println!("certificate: {}", info.cert_path.display());
            println!("key: {}", info.key_path.display());
            println!("sha256: {fingerprint}");
            Ok(())
        }
        Command::RegenerateCa => {
            let info = authority.regenerate().map_err(|err| err.to_string())?;
            let fingerprint =
                cert_fingerprint(info.cert_pem.as_bytes()).map_err(|err| err.to_string())?;
            println!("regenerated: {}", info.cert_path.display());
            println!("sha256: {fingerprint}");
            Ok(())
        }
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<ProxyConfig, String> {
    let mut config = match &cli.config {
        Some(path) => ProxyConfig::load(path).map_err(|err| err.to_string())?,
        None => ProxyConfig::default(),
    };
    if let Some(dir) = &cli.ca_dir {
        config.tls.ca_cert_dir = Some(dir.clone());
    }
    Ok(config)
}

async fn run(
    config: ProxyConfig,
    authority: Arc<tapline_net::CertificateAuthority>,
    port: Option<u16>,
) -> Result<(), String> {
    let proxy = ProxyServer::new(config, authority).map_err(|err| err.to_string())?;
    let events = proxy.subscribe();
    let port = proxy.start(port).await.map_err(|err| err.to_string())?;

    println!("listening: {}:{port}", proxy.config().listen.host);
    println!("root certificate: {}", proxy.authority().cert_path().display());

    let printer = tokio::spawn(print_events(events));

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| err.to_string())?;
    info!("shutting down");
    proxy.stop().await;
    printer.abort();

    let status = proxy.status();
    info!(requests = status.request_count, "proxy stopped");
    Ok(())
}

async fn print_events(mut events: ProxyEvents) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "cannot serialize event"),
        }
    }
}
