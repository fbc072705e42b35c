//! # XStream - A Composable Byte-Stream Pipeline Runtime
//!
//! XStream models data flow as explicit stream roles joined by pipes:
//!
//! - **Readable**: pushes chunks, in order, to a single consumer
//! - **Writable**: accepts chunks and reports saturation
//! - **Duplex**: one readable and one writable half behind one handle
//! - **Pipe**: connects a readable to a writable, propagating backpressure,
//!   completion and errors
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Composition Layer                     │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │    Pipe     │ │  Watchdog   │ │  Source / Sink  │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Role Layer                            │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │  Readable   │ │  Writable   │ │     Duplex      │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Transport Layer                       │
//! │  ┌─────────────────────────────────────────────────┐   │
//! │  │     AsyncRead + AsyncWrite (tokio LocalSet)      │   │
//! │  └─────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Roles are single-threaded (`Rc`-based). Notifications are delivered
//! synchronously and never re-enter a handler.
//!
//! ## Example
//!
//! ```rust,ignore
//! use xstream::{Source, TransportConfig};
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async move {
//!     let conn = xstream::io::spawn_duplex(stream.compat(), TransportConfig::default());
//!     conn.pipe(&conn);
//!     xstream::io::wait_closed(&conn).await;
//! }).await;
//! ```

#![deny(unsafe_code)]

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod duplex;
pub mod error;
pub mod flow;
pub mod io;
pub mod notify;
pub mod pipe;
pub mod readable;
pub mod role;
pub mod sinks;
pub mod sources;
pub mod watchdog;
pub mod writable;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use chunk::Chunk;
pub use config::{PipeConfig, ReadableConfig, TransportConfig, WritableConfig};
pub use duplex::Duplex;
pub use error::{Error, ErrorKind, Result};
pub use flow::{FlowState, FlowUnit};
pub use notify::{ListenerId, Notifier};
pub use pipe::{Pipe, PipeState, PipeStats};
pub use readable::{ConsumerId, Readable, ReadableEvent, WeakReadable};
pub use role::{Sink, Source};
pub use writable::{SinkBackend, SinkStats, Writable, WritableEvent, WriteAck};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default high-water mark of readables and writables, in bytes
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Default read size of transport adapters
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;
