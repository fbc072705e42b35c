//! Buffer management for stream roles.
//!
//! - ChunkQueue: ordered FIFO of chunks with size accounting, used for a
//!   Source's paused backlog and a Sink's pending writes.

mod queue;

pub use queue::ChunkQueue;
