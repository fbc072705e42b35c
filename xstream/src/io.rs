//! Adapters between byte transports and stream roles.
//!
//! Everything here spawns `!Send` tasks with [`tokio::task::spawn_local`],
//! so it must run inside a [`tokio::task::LocalSet`].

use std::rc::Rc;

use futures::io::{AsyncRead, AsyncWrite};
use futures::{AsyncReadExt, AsyncWriteExt};
use log::{debug, trace, warn};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::chunk::Chunk;
use crate::config::TransportConfig;
use crate::duplex::Duplex;
use crate::error::{Error, Result};
use crate::readable::{Readable, ReadableEvent};
use crate::writable::{SinkBackend, Writable, WriteAck};

/// A connected byte transport, such as a tokio stream behind
/// `tokio_util::compat`.
pub trait AsyncTransport: AsyncRead + AsyncWrite + Unpin + 'static {}

impl<S> AsyncTransport for S where S: AsyncRead + AsyncWrite + Unpin + 'static {}

/// Wraps a connected transport in a [`Duplex`].
///
/// The readable half yields what the peer sends, in chunks of at most
/// `read_buffer_size` bytes (at least one), and ends on EOF. The writable half
/// writes to the peer; finalizing it closes the write direction once every
/// accepted chunk has been written.
///
/// The write half is shut down on the writer task after the writable has
/// already emitted `Finish` and closed. A failed shutdown is therefore only
/// logged; it does not turn the finished writable into an errored one.
///
/// # Panics
///
/// Panics when called outside a `LocalSet`.
pub fn spawn_duplex<S>(io: S, config: TransportConfig) -> Duplex<Vec<u8>>
where
    S: AsyncTransport,
{
    let (reader, writer) = io.split();
    let readable = spawn_reader(reader, config);
    let writable = Writable::with_backend(config.writable, WriterBackend::spawn(writer));
    Duplex::new(readable, writable)
}

/// Resolves once both halves of `duplex` are terminal.
pub async fn wait_closed<T: Chunk>(duplex: &Duplex<T>) {
    let (tx, rx) = oneshot::channel();
    duplex.on_close(move || {
        let _ = tx.send(());
    });
    let _ = rx.await;
}

/// Resolves once `writable` is terminal, with its error if it failed.
pub async fn wait_finished<T: Chunk>(writable: &Writable<T>) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    let sink = writable.clone();
    writable.on_close(move || {
        let _ = tx.send(());
    });
    let _ = rx.await;
    match sink.last_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn spawn_reader<R>(mut reader: R, config: TransportConfig) -> Readable<Vec<u8>>
where
    R: AsyncRead + Unpin + 'static,
{
    let readable = Readable::with_config(config.readable);
    let demand = Rc::new(Notify::new());

    let wake = Rc::clone(&demand);
    readable.on_event(move |event| {
        if matches!(event, ReadableEvent::Demand) {
            wake.notify_one();
        }
    });

    let source = readable.clone();
    // A zero-length buffer would make every read look like EOF.
    let read_buffer_size = config.read_buffer_size.max(1);
    let task = tokio::task::spawn_local(async move {
        let mut buf = vec![0u8; read_buffer_size];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("transport reached EOF");
                    if let Err(err) = source.end() {
                        debug!("readable already terminal at EOF: {}", err);
                    }
                    break;
                }
                Ok(n) => {
                    trace!("read {} bytes from transport", n);
                    match source.push(buf[..n].to_vec()) {
                        Ok(true) => {}
                        Ok(false) if source.is_open() => demand.notified().await,
                        Ok(false) | Err(_) => break,
                    }
                }
                Err(err) => {
                    warn!("transport read failed: {}", err);
                    source.fail(err.into());
                    break;
                }
            }
        }
    });

    readable.on_close(move || task.abort());
    readable
}

enum WriteOp {
    Chunk(Vec<u8>, WriteAck<Vec<u8>>),
    Finish,
}

struct WriterBackend {
    tx: mpsc::UnboundedSender<WriteOp>,
    task: JoinHandle<()>,
}

impl WriterBackend {
    fn spawn<W>(mut writer: W) -> Self
    where
        W: AsyncWrite + Unpin + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::task::spawn_local(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    WriteOp::Chunk(data, ack) => {
                        let result = writer.write_all(&data).await.map_err(Error::from);
                        if let Err(err) = &result {
                            warn!("transport write failed: {}", err);
                        }
                        ack.complete(result);
                    }
                    WriteOp::Finish => {
                        if let Err(err) = writer.close().await {
                            warn!("closing transport write half failed: {}", err);
                        } else {
                            debug!("transport write half closed");
                        }
                        break;
                    }
                }
            }
        });
        Self { tx, task }
    }
}

impl SinkBackend<Vec<u8>> for WriterBackend {
    fn write(&mut self, chunk: Vec<u8>, ack: WriteAck<Vec<u8>>) {
        if let Err(mpsc::error::SendError(op)) = self.tx.send(WriteOp::Chunk(chunk, ack)) {
            if let WriteOp::Chunk(_, ack) = op {
                ack.complete(Err(Error::ClosedStream));
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.tx
            .send(WriteOp::Finish)
            .map_err(|_| Error::ClosedStream)
    }

    fn abort(&mut self) {
        self.task.abort();
    }
}
