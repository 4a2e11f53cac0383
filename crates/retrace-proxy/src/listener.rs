//! Listener task: one `TcpListener::accept` loop per proxy, spawning each
//! accepted connection onto its own task (spec §5: "one listener task per
//! proxy ... each accepted TCP connection is handled on its own ... thread").

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::connection;
use retrace_core::Result;

/// Binds `addr` and runs the accept loop until the process is killed.
/// Each connection is handled on its own task; a connection's failure
/// (parse, io, tls) is logged and never propagated back to the listener.
pub async fn run(addr: SocketAddr, config: Arc<ProxyConfig>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "retrace-record: proxy listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let config = config.clone();
        tokio::spawn(async move {
            info!(%peer, "accepted connection");
            if let Err(e) = connection::handle_connection(socket, config).await {
                warn!(%peer, error = %e, "connection terminated");
            }
        });
    }
}
