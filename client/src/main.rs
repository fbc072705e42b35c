use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::task::LocalSet;
use xstream::TransportConfig;

mod trans_client;

use trans_client::{ClientTarget, TransClient};

const DEFAULT_SERVER_CID: u32 = 3;
const DEFAULT_SERVER_PORT: u32 = 1234;

/// Streams a generated payload through an echo server and verifies what
/// comes back.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    target: Target,

    /// Payload size in KB
    #[arg(long, default_value_t = 10 * 1024)]
    size_kb: usize,

    /// Size of each generated chunk in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    chunk_size: usize,

    /// Use small buffers in both directions
    #[arg(long)]
    low_latency: bool,
}

#[derive(Subcommand, Debug)]
enum Target {
    /// Connect to a TCP address
    Tcp { addr: SocketAddr },

    /// Connect to a Unix socket path
    Unix { path: PathBuf },

    /// Connect to a vsock address
    Vsock {
        #[arg(long, default_value_t = DEFAULT_SERVER_CID)]
        cid: u32,

        #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
        port: u32,
    },
}

impl From<Target> for ClientTarget {
    fn from(target: Target) -> Self {
        match target {
            Target::Tcp { addr } => ClientTarget::Tcp(addr),
            Target::Unix { path } => ClientTarget::Unix(path),
            Target::Vsock { cid, port } => ClientTarget::Vsock { cid, port },
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let transport = if cli.low_latency {
        TransportConfig::low_latency()
    } else {
        TransportConfig::default()
    };

    let client = TransClient::new(cli.target.into(), transport);
    LocalSet::new()
        .run_until(client.round_trip(cli.size_kb * 1024, cli.chunk_size.max(1)))
        .await
}
