use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use log::*;
use tokio::net::{TcpListener, UnixListener};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_vsock::{VsockAddr, VsockListener};
use xstream::io::{AsyncTransport, spawn_duplex, wait_closed};
use xstream::{ErrorKind, PipeConfig, Source, TransportConfig};

const WATCHDOG_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum ServerTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

pub struct TransServer {
    target: ServerTarget,
    transport: TransportConfig,
    pipe: PipeConfig,
}

impl TransServer {
    pub fn new(target: ServerTarget, transport: TransportConfig, pipe: PipeConfig) -> Self {
        Self {
            target,
            transport,
            pipe,
        }
    }

    /// Accepts connections forever, echoing each one on its own local task.
    pub async fn run(&self) -> anyhow::Result<()> {
        match &self.target {
            ServerTarget::Unix(path) => {
                if path.exists() {
                    let _ = std::fs::remove_file(path);
                }
                let listener = UnixListener::bind(path)
                    .with_context(|| format!("failed to bind Unix socket {:?}", path))?;
                info!("Server listening on Unix socket {:?}", path);
                loop {
                    let (stream, _) = listener.accept().await.context("failed to accept")?;
                    info!("Accepted Unix connection");
                    self.spawn_echo(stream.compat(), "unix".to_string());
                }
            }
            ServerTarget::Tcp(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("failed to bind TCP socket {}", addr))?;
                info!("Server listening on TCP {}", addr);
                loop {
                    let (stream, peer) = listener.accept().await.context("failed to accept")?;
                    info!("Accepted TCP connection from {}", peer);
                    self.spawn_echo(stream.compat(), peer.to_string());
                }
            }
            ServerTarget::Vsock { cid, port } => {
                let listener = VsockListener::bind(VsockAddr::new(*cid, *port))
                    .with_context(|| format!("failed to bind vsock CID:{} Port:{}", cid, port))?;
                info!("Server listening on vsock CID:{} Port:{}", cid, port);
                loop {
                    let (stream, addr) = listener.accept().await.context("failed to accept")?;
                    info!("Accepted vsock connection from {:?}", addr);
                    self.spawn_echo(stream.compat(), format!("{:?}", addr));
                }
            }
        }
    }

    fn spawn_echo<S>(&self, stream: S, peer: String)
    where
        S: AsyncTransport,
    {
        let transport = self.transport;
        let pipe = self.pipe;
        tokio::task::spawn_local(async move {
            Self::handle_connection(stream, peer, transport, pipe).await;
        });
    }

    /// Pipes the connection into itself and waits until both directions
    /// are closed.
    async fn handle_connection<S>(
        stream: S,
        peer: String,
        transport: TransportConfig,
        config: PipeConfig,
    ) where
        S: AsyncTransport,
    {
        let start = Instant::now();
        let conn = spawn_duplex(stream, transport);
        let pipe = conn.pipe_with(&conn, config);

        let teardown = conn.clone();
        let who = peer.clone();
        pipe.on_error(move |err| {
            if err.kind() == ErrorKind::DrainStall && !config.fail_on_stall {
                warn!("[{}] client is not reading: {}", who, err);
                return;
            }
            error!("[{}] echo failed: {}", who, err);
            teardown.destroy();
        });

        let watchdog = config
            .drain_timeout
            .map(|_| xstream::watchdog::spawn(&pipe, WATCHDOG_PERIOD));

        wait_closed(&conn).await;
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        let echoed = conn.writable().stats().bytes_written;
        let elapsed = start.elapsed();
        let speed = (echoed as f64 / 1024.0) / elapsed.as_secs_f64();
        let stats = pipe.stats();

        info!("[{}] === Echo Complete ===", peer);
        info!("Total echoed: {} KB", echoed / 1024);
        info!("Time: {:.2} seconds", elapsed.as_secs_f64());
        info!("Speed: {:.2} KB/s", speed);
        info!("Pauses: {}, resumes: {}", stats.pauses, stats.resumes);
    }
}
