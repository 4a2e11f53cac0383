//! Record-mode CLI entry point (spec §6): intercepts HTTP(S) traffic inside
//! this process's network namespace, forwards it upstream, and persists each
//! completed request/response pair to the recording directory.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use retrace_core::config::{PrefetchSet, RequestOrderTable};
use retrace_proxy::config::ProxyConfig;
use retrace_proxy::tls::CertAuthority;
use retrace_serializer::{Serializer, SerializerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retrace-record", about = "Record-and-replay HTTP(S) proxy: record mode", version)]
struct Cli {
    /// Directory request/response pairs are persisted to.
    recording_dir: PathBuf,
    /// Prefetch list: `<url> <resource-type>` per line.
    prefetch_file: PathBuf,
    /// Reference request-order file: one URL per line, line index is rank.
    request_order_file: PathBuf,
    /// The main page's URL for this load.
    page_url: String,

    /// Port the proxy listens on for DNAT'd traffic.
    #[arg(long, default_value_t = 9000)]
    listen_port: u16,

    /// Open Question 1: disable prefetch-based low-priority classification
    /// (all admitted requests are then treated as high priority).
    #[arg(long)]
    disable_prefetch_low_priority: bool,

    /// Pre-provisioned MITM CA certificate (PEM). Without this, an ephemeral
    /// self-signed CA is generated for the life of the process.
    #[arg(long)]
    ca_cert: Option<PathBuf>,
    /// Pre-provisioned MITM CA private key (PEM), required with `--ca-cert`.
    #[arg(long)]
    ca_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.recording_dir)?;

    let request_order = RequestOrderTable::load(&cli.request_order_file)
        .map_err(|e| anyhow::anyhow!("loading request-order file: {e}"))?;
    let prefetch = PrefetchSet::load(&cli.prefetch_file)
        .map_err(|e| anyhow::anyhow!("loading prefetch file: {e}"))?;

    let serializer_config = SerializerConfig::new(
        request_order,
        prefetch,
        &cli.page_url,
        !cli.disable_prefetch_low_priority,
    );
    let serializer = Arc::new(Serializer::new(serializer_config));

    let mut config = ProxyConfig::new(cli.recording_dir.clone(), serializer);

    let ca = match (cli.ca_cert, cli.ca_key) {
        (Some(cert), Some(key)) => {
            CertAuthority::load(cert, key).map_err(|e| anyhow::anyhow!("loading MITM CA: {e}"))?
        }
        (None, None) => {
            tracing::warn!("no --ca-cert/--ca-key given; generating an ephemeral MITM CA for this run");
            CertAuthority::generate_ephemeral().map_err(|e| anyhow::anyhow!("{e}"))?
        }
        _ => anyhow::bail!("--ca-cert and --ca-key must be given together"),
    };
    config = config.with_tls(Arc::new(ca));

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.listen_port));
    eprintln!("retrace-record: listening on {addr}, recording to {}", cli.recording_dir.display());

    retrace_proxy::run(addr, Arc::new(config))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
}
