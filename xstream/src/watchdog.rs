//! Periodic drain-stall detection.

use std::time::{Duration, Instant};

use log::debug;
use tokio::task::JoinHandle;

use crate::chunk::Chunk;
use crate::pipe::Pipe;

/// Polls [`Pipe::check_stall`] every `period` until the pipe is terminal.
///
/// Stalls reach the pipe's error listeners; the pipe's config decides
/// whether a stall also tears it down. Must run inside a `LocalSet`.
pub fn spawn<T: Chunk>(pipe: &Pipe<T>, period: Duration) -> JoinHandle<()> {
    let pipe = pipe.clone();
    tokio::task::spawn_local(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if pipe.state().is_terminal() {
                debug!("watchdog for pipe {} stopping", pipe.id());
                break;
            }
            let _ = pipe.check_stall(Instant::now());
        }
    })
}
