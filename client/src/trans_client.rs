use std::cell::Cell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{Context, bail};
use log::*;
use tokio::net::{TcpStream, UnixStream};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_vsock::{VsockAddr, VsockStream};
use xstream::io::{AsyncTransport, spawn_duplex, wait_finished};
use xstream::{Error, PipeConfig, ReadableConfig, Source, TransportConfig, WritableConfig, sinks, sources};

const FILL_BYTE: u8 = 0xAB;

#[derive(Debug)]
pub enum ClientTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
    Vsock { cid: u32, port: u32 },
}

pub struct TransClient {
    target: ClientTarget,
    transport: TransportConfig,
}

impl TransClient {
    pub fn new(target: ClientTarget, transport: TransportConfig) -> Self {
        Self { target, transport }
    }

    /// Connects, sends `size` bytes in chunks of `chunk_size` and checks that
    /// the same bytes come back.
    pub async fn round_trip(&self, size: usize, chunk_size: usize) -> anyhow::Result<()> {
        info!("Connecting to target: {:?}", self.target);
        match &self.target {
            ClientTarget::Unix(path) => {
                let stream = UnixStream::connect(path)
                    .await
                    .with_context(|| format!("failed to connect Unix socket {:?}", path))?;
                info!("Unix socket connected.");
                self.process_stream(stream.compat(), size, chunk_size).await
            }
            ClientTarget::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .with_context(|| format!("failed to connect TCP socket {}", addr))?;
                info!("TCP socket connected.");
                self.process_stream(stream.compat(), size, chunk_size).await
            }
            ClientTarget::Vsock { cid, port } => {
                let stream = VsockStream::connect(VsockAddr::new(*cid, *port))
                    .await
                    .with_context(|| format!("failed to connect vsock CID:{} Port:{}", cid, port))?;
                info!("Vsock socket connected.");
                self.process_stream(stream.compat(), size, chunk_size).await
            }
        }
    }

    async fn process_stream<S>(&self, stream: S, size: usize, chunk_size: usize) -> anyhow::Result<()>
    where
        S: AsyncTransport,
    {
        let conn = spawn_duplex(stream, self.transport);

        // Outbound: generated chunks into the connection.
        let chunks = (0..size)
            .step_by(chunk_size)
            .map(move |offset| vec![FILL_BYTE; chunk_size.min(size - offset)]);
        let source = sources::from_iter(
            chunks,
            ReadableConfig::new().with_high_water_mark(self.transport.writable.high_water_mark),
        );
        let upload = source.pipe_with(&conn, PipeConfig::default());

        // Inbound: count and verify what the server echoes.
        let received = Rc::new(Cell::new(0usize));
        let counter = Rc::clone(&received);
        let sink = sinks::from_fn(WritableConfig::default(), move |chunk: Vec<u8>| {
            if chunk.iter().any(|b| *b != FILL_BYTE) {
                return Err(Error::other("echoed data does not match"));
            }
            counter.set(counter.get() + chunk.len());
            Ok(())
        });
        let download = conn.pipe_with(&sink, PipeConfig::default());
        let teardown = conn.clone();
        download.on_error(move |err| {
            error!("Receive failed: {}", err);
            teardown.destroy();
        });

        let start = Instant::now();
        wait_finished(conn.writable())
            .await
            .context("failed to send payload")?;
        let elapsed = start.elapsed();
        let sent = conn.writable().stats().bytes_written as usize;
        let speed = (sent as f64 / 1024.0) / elapsed.as_secs_f64();
        let stats = upload.stats();
        info!("=== Send Complete ===");
        info!("Total sent: {} KB", sent / 1024);
        info!("Time: {:.2} seconds", elapsed.as_secs_f64());
        info!("Speed: {:.2} KB/s", speed);
        info!("Pauses: {}, resumes: {}", stats.pauses, stats.resumes);
        info!("");

        wait_finished(&sink)
            .await
            .context("failed to receive echo")?;
        let elapsed = start.elapsed();
        let speed = (received.get() as f64 / 1024.0) / elapsed.as_secs_f64();
        info!("=== Receive Complete ===");
        info!("Total received: {} KB", received.get() / 1024);
        info!("Time: {:.2} seconds", elapsed.as_secs_f64());
        info!("Speed: {:.2} KB/s", speed);
        info!("Chunks received: {}", download.stats().chunks_forwarded);

        if received.get() != size {
            bail!("sent {} bytes but {} came back", size, received.get());
        }
        Ok(())
    }
}
