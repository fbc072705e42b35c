use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::LocalSet;
use xstream::{PipeConfig, ReadableConfig, TransportConfig, WritableConfig};

mod trans_server;

use trans_server::{ServerTarget, TransServer};

const VMADDR_CID_ANY: u32 = u32::MAX;

/// Echo server: every accepted connection is piped into itself.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    target: Target,

    /// Largest chunk read from a connection at once, in bytes
    #[arg(long, default_value_t = xstream::DEFAULT_READ_BUFFER_SIZE)]
    read_buffer: usize,

    /// High-water mark of both directions, in bytes
    #[arg(long, default_value_t = xstream::DEFAULT_HIGH_WATER_MARK)]
    high_water_mark: usize,

    /// Report clients that stop reading for this many milliseconds
    #[arg(long)]
    drain_timeout_ms: Option<u64>,

    /// Drop clients that stall instead of only reporting them
    #[arg(long)]
    drop_stalled: bool,
}

#[derive(Subcommand, Debug)]
enum Target {
    /// Listen on a TCP address
    Tcp { addr: SocketAddr },

    /// Listen on a Unix socket path
    Unix { path: PathBuf },

    /// Listen on a vsock port
    Vsock {
        port: u32,

        #[arg(long, default_value_t = VMADDR_CID_ANY)]
        cid: u32,
    },
}

impl From<Target> for ServerTarget {
    fn from(target: Target) -> Self {
        match target {
            Target::Tcp { addr } => ServerTarget::Tcp(addr),
            Target::Unix { path } => ServerTarget::Unix(path),
            Target::Vsock { port, cid } => ServerTarget::Vsock { cid, port },
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let transport = TransportConfig::new()
        .with_read_buffer_size(cli.read_buffer)
        .with_readable(ReadableConfig::new().with_high_water_mark(cli.high_water_mark))
        .with_writable(WritableConfig::new().with_high_water_mark(cli.high_water_mark));

    let mut pipe = PipeConfig::new().with_fail_on_stall(cli.drop_stalled);
    if let Some(ms) = cli.drain_timeout_ms {
        pipe = pipe.with_drain_timeout(Duration::from_millis(ms));
    }

    let server = TransServer::new(cli.target.into(), transport, pipe);
    LocalSet::new().run_until(server.run()).await
}
