//! Per-connection ferry: resolves the original destination, opens the
//! upstream leg (with TLS MITM for port 443), and pumps framed HTTP in both
//! directions, gating response writes through the shared serializer.
//!
//! Runs as a single task per connection, multiplexing the client-read and
//! origin-read actions with `tokio::select!` — the idiomatic tokio
//! equivalent of spec §5's "single-threaded readiness poller" per
//! connection. Because both directions are driven by the same task, a
//! request is always admitted and registered with the response framer
//! (`new_request_arrived`) before that same task can possibly observe the
//! bytes of its response, so the contract holds without extra bookkeeping.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use retrace_core::framer::{RequestFramer, ResponseFramer};
use retrace_core::message::HttpRequest;
use retrace_core::record::{RequestResponse, Scheme};
use retrace_core::{CoreError, Result};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ProxyConfig;
use crate::original_dst;
use crate::recorder::Recorder;
use crate::tls;

const READ_CHUNK: usize = 16 * 1024;

pub async fn handle_connection(client: TcpStream, config: Arc<ProxyConfig>) -> Result<()> {
    let dst = original_dst::original_dst(&client)?;
    if dst.port() == 443 {
        handle_tls(client, dst, config).await
    } else {
        let upstream = TcpStream::connect(dst).await?;
        ferry(client, upstream, false, config).await
    }
}

async fn handle_tls(client: TcpStream, dst: SocketAddr, config: Arc<ProxyConfig>) -> Result<()> {
    let ca = config
        .ca
        .clone()
        .ok_or_else(|| CoreError::Tls("connection to port 443 but no CA is configured".into()))?;

    let acceptor = tls::server_acceptor(ca);
    let tls_client = acceptor
        .accept(client)
        .await
        .map_err(|e| CoreError::Tls(format!("downstream handshake: {e}")))?;

    let sni = tls_client
        .get_ref()
        .1
        .server_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| dst.ip().to_string());

    let upstream_tcp = TcpStream::connect(dst).await?;
    let connector = tls::client_connector()?;
    let server_name = ServerName::try_from(sni)
        .map_err(|e| CoreError::Tls(format!("invalid upstream server name: {e}")))?
        .to_owned();
    let tls_upstream = connector
        .connect(server_name, upstream_tcp)
        .await
        .map_err(|e| CoreError::Tls(format!("upstream handshake: {e}")))?;

    ferry(tls_client, tls_upstream, true, config).await
}

async fn ferry<C, U>(client: C, upstream: U, https: bool, config: Arc<ProxyConfig>) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut upstream_r, mut upstream_w) = tokio::io::split(upstream);

    let mut req_framer = RequestFramer::new();
    let mut resp_framer = ResponseFramer::new();
    let mut pending_requests: VecDeque<HttpRequest> = VecDeque::new();
    let recorder = Recorder::new(config.recording_dir.clone());
    let scheme = if https { Scheme::Https } else { Scheme::Http };

    let mut client_buf = vec![0u8; READ_CHUNK];
    let mut upstream_buf = vec![0u8; READ_CHUNK];
    let mut client_eof = false;
    let mut upstream_eof = false;

    let result = pump(
        &mut client_r,
        &mut client_w,
        &mut upstream_r,
        &mut upstream_w,
        &mut req_framer,
        &mut resp_framer,
        &mut pending_requests,
        &mut client_buf,
        &mut upstream_buf,
        &mut client_eof,
        &mut upstream_eof,
        https,
        scheme,
        &config,
        &recorder,
    )
    .await;

    // Spec §5: connection teardown (clean or via error) must never leave a
    // request stuck in the serializer's priority state forever — any request
    // this connection admitted but whose response was never emitted is
    // released so other connections' waiters re-check and proceed.
    for request in pending_requests.drain(..) {
        config.serializer.release(&request.url(https)).await;
    }

    let _ = client_w.shutdown().await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn pump<C, U>(
    client_r: &mut tokio::io::ReadHalf<C>,
    client_w: &mut tokio::io::WriteHalf<C>,
    upstream_r: &mut tokio::io::ReadHalf<U>,
    upstream_w: &mut tokio::io::WriteHalf<U>,
    req_framer: &mut RequestFramer,
    resp_framer: &mut ResponseFramer,
    pending_requests: &mut VecDeque<HttpRequest>,
    client_buf: &mut [u8],
    upstream_buf: &mut [u8],
    client_eof: &mut bool,
    upstream_eof: &mut bool,
    https: bool,
    scheme: Scheme,
    config: &Arc<ProxyConfig>,
    recorder: &Recorder,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    while !(*client_eof && *upstream_eof) {
        tokio::select! {
            result = client_r.read(client_buf), if !*client_eof => {
                let n = result?;
                if n == 0 {
                    *client_eof = true;
                    let _ = upstream_w.shutdown().await;
                    continue;
                }
                upstream_w.write_all(&client_buf[..n]).await?;
                req_framer.feed(&client_buf[..n])?;
                while let Some(request) = req_framer.pop() {
                    let url = request.url(https);
                    config.serializer.admit(&url).await;
                    resp_framer.new_request_arrived(&request);
                    pending_requests.push_back(request);
                }
            }
            result = upstream_r.read(upstream_buf), if !*upstream_eof => {
                let n = result?;
                if n == 0 {
                    *upstream_eof = true;
                    resp_framer.eof()?;
                } else {
                    resp_framer.feed(&upstream_buf[..n])?;
                }

                while let Some(mut response) = resp_framer.pop() {
                    let Some(request) = pending_requests.pop_front() else {
                        return Err(CoreError::Internal(
                            "response completed with no paired request".into(),
                        ));
                    };
                    let url = request.url(https);

                    if config.serializer.is_main_page(&url) {
                        if let Some(link) = config.serializer.preload_link_header() {
                            response.headers.push("Link", link);
                        }
                    }

                    let bytes = response.to_bytes();
                    config
                        .serializer
                        .emit(&url, || async { client_w.write_all(&bytes).await })
                        .await
                        .map_err(CoreError::Io)?;

                    recorder
                        .record(RequestResponse { scheme, request, response })
                        .await?;
                }
            }
        }
    }

    Ok(())
}
