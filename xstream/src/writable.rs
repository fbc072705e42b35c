//! Writable side of a stream: a sink that accepts chunks and reports
//! saturation.
//!
//! A [`Writable`] owns a queue of accepted chunks and hands them one at a
//! time to its [`SinkBackend`]. The backend acknowledges each chunk through
//! a [`WriteAck`], either before returning from `write` or later (for
//! example from an I/O task). Once the buffered size reaches the high-water
//! mark `accept` returns `Ok(false)`; when the queue empties again the sink
//! emits [`WritableEvent::Drain`].

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::{debug, trace, warn};

use crate::buffer::ChunkQueue;
use crate::chunk::Chunk;
use crate::config::WritableConfig;
use crate::error::{Error, Result};
use crate::flow::{FlowState, FlowUnit};
use crate::notify::{ListenerId, Notifier};

/// Notifications emitted by a [`Writable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritableEvent {
    /// The sink went from saturated back to accepting.
    Drain,

    /// Every accepted chunk was written and the backend finished.
    Finish,

    /// The sink failed.
    Error(Error),

    /// The sink reached a terminal state. Always the last event.
    Close,
}

/// Byte and chunk accounting of a sink.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    /// Chunks taken by `accept`.
    pub chunks_accepted: u64,

    /// Bytes taken by `accept`.
    pub bytes_accepted: u64,

    /// Chunks acknowledged by the backend.
    pub chunks_written: u64,

    /// Bytes acknowledged by the backend.
    pub bytes_written: u64,

    /// Accepted chunks discarded by `destroy` or a failure.
    pub chunks_discarded: u64,
}

impl SinkStats {
    /// Chunks accepted but neither written nor discarded yet.
    pub fn chunks_pending(&self) -> u64 {
        self.chunks_accepted - self.chunks_written - self.chunks_discarded
    }
}

/// Destination that actually consumes the chunks of a [`Writable`].
pub trait SinkBackend<T: Chunk> {
    /// Consumes `chunk`. Call [`WriteAck::complete`] once it is fully
    /// processed. The writable never issues a second `write` before the
    /// previous ack completes.
    fn write(&mut self, chunk: T, ack: WriteAck<T>);

    /// Called once, after every accepted chunk has been acknowledged.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called when the writable is destroyed or fails. Pending acks may be
    /// dropped.
    fn abort(&mut self) {}
}

struct WritableState<T> {
    flow: FlowUnit,
    config: WritableConfig,
    queue: ChunkQueue<T>,
    in_flight: Option<usize>,
    need_drain: bool,
    ending: bool,
    finishing: bool,
    finished: bool,
    writing: bool,
    generation: u64,
    stats: SinkStats,
}

impl<T: Chunk> WritableState<T> {
    fn buffered(&self) -> usize {
        self.queue.size() + self.in_flight.unwrap_or(0)
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queue.is_empty()
    }

    fn discard(&mut self) {
        let dropped = self.queue.clear() as u64 + u64::from(self.in_flight.take().is_some());
        self.stats.chunks_discarded += dropped;
        self.generation += 1;
        self.need_drain = false;
    }
}

struct Shared<T> {
    state: RefCell<WritableState<T>>,
    backend: RefCell<Box<dyn SinkBackend<T>>>,
    events: Notifier<WritableEvent>,
}

/// A sink of chunks.
///
/// Cloning yields another handle to the same stream.
pub struct Writable<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

/// Completion token for one [`SinkBackend::write`].
///
/// Dropping an ack without completing it fails the writable, so a backend
/// cannot lose a chunk silently. Acks that outlive a `destroy` are ignored.
pub struct WriteAck<T: Chunk> {
    target: Option<(Weak<Shared<T>>, u64)>,
}

impl<T: Chunk> WriteAck<T> {
    pub fn complete(mut self, result: Result<()>) {
        if let Some((target, generation)) = self.target.take() {
            if let Some(shared) = target.upgrade() {
                Writable { shared }.on_write_complete(generation, result);
            }
        }
    }
}

impl<T: Chunk> Drop for WriteAck<T> {
    fn drop(&mut self) {
        if let Some((target, generation)) = self.target.take() {
            if let Some(shared) = target.upgrade() {
                Writable { shared }.on_write_complete(
                    generation,
                    Err(Error::other("write acknowledgement dropped")),
                );
            }
        }
    }
}

impl<T: Chunk> Writable<T> {
    pub fn new<B>(backend: B) -> Self
    where
        B: SinkBackend<T> + 'static,
    {
        Self::with_backend(WritableConfig::default(), backend)
    }

    pub fn with_backend<B>(config: WritableConfig, backend: B) -> Self
    where
        B: SinkBackend<T> + 'static,
    {
        let state = WritableState {
            flow: FlowUnit::new(),
            config,
            queue: ChunkQueue::new(),
            in_flight: None,
            need_drain: false,
            ending: false,
            finishing: false,
            finished: false,
            writing: false,
            generation: 0,
            stats: SinkStats::default(),
        };
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(state),
                backend: RefCell::new(Box::new(backend)),
                events: Notifier::new(),
            }),
        }
    }

    pub fn state(&self) -> FlowState {
        self.shared.state.borrow().flow.state()
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.borrow().flow.is_open()
    }

    /// True once `finalize` was called.
    pub fn is_ending(&self) -> bool {
        self.shared.state.borrow().ending
    }

    pub fn is_finished(&self) -> bool {
        self.shared.state.borrow().finished
    }

    /// The sink's own capacity signal: false while saturated or terminal.
    pub fn accepts_more(&self) -> bool {
        let st = self.shared.state.borrow();
        st.flow.is_open() && !st.ending && !st.need_drain
    }

    pub fn last_error(&self) -> Option<Error> {
        self.shared.state.borrow().flow.last_error().cloned()
    }

    /// Total size of accepted chunks not yet acknowledged.
    pub fn buffered_size(&self) -> usize {
        self.shared.state.borrow().buffered()
    }

    pub fn stats(&self) -> SinkStats {
        self.shared.state.borrow().stats
    }

    /// Takes ownership of `chunk`.
    ///
    /// `Ok(false)` means the sink is saturated and the producer should pause
    /// until [`WritableEvent::Drain`]; the chunk is queued regardless. A sink
    /// with nothing pending never reports saturation.
    pub fn accept(&self, chunk: T) -> Result<bool> {
        {
            let mut st = self.shared.state.borrow_mut();
            if !st.flow.is_open() || st.ending {
                return Err(Error::ClosedStream);
            }
            if st.config.strict_saturation && st.need_drain {
                warn!("chunk written to a saturated sink");
                return Err(Error::SinkSaturationViolation);
            }
            let size = chunk.size();
            st.stats.chunks_accepted += 1;
            st.stats.bytes_accepted += size as u64;
            trace!("accept chunk of {} bytes", size);
            st.queue.push(chunk);
        }

        self.pump();

        let mut st = self.shared.state.borrow_mut();
        if !st.flow.is_open() {
            return Err(st.flow.last_error().cloned().unwrap_or(Error::ClosedStream));
        }
        let buffered = st.buffered();
        let ok = buffered == 0 || buffered < st.config.high_water_mark;
        if !ok && !st.need_drain {
            debug!("sink saturated at {} bytes", buffered);
            st.need_drain = true;
        }
        Ok(ok)
    }

    /// Accepts `final_chunk` if given, then closes once everything accepted
    /// has been written and the backend finished.
    ///
    /// Calling `finalize()` again without a chunk is a no-op.
    pub fn finalize(&self, final_chunk: Option<T>) -> Result<()> {
        {
            let st = self.shared.state.borrow();
            if !st.flow.is_open() || st.ending {
                return match final_chunk {
                    Some(_) => Err(Error::ClosedStream),
                    None => Ok(()),
                };
            }
        }

        if let Some(chunk) = final_chunk {
            self.accept(chunk)?;
        }

        self.shared.state.borrow_mut().ending = true;
        debug!("sink finalizing");
        self.pump();
        Ok(())
    }

    /// Abrupt teardown: closes without flushing. Queued chunks are
    /// discarded, so byte-accurate totals require [`finalize`](Self::finalize).
    pub fn destroy(&self) {
        {
            let mut st = self.shared.state.borrow_mut();
            if !st.flow.close() {
                return;
            }
            st.discard();
            debug!(
                "sink destroyed, {} chunks discarded in total",
                st.stats.chunks_discarded
            );
        }
        self.abort_backend();
        self.shared.events.emit(WritableEvent::Close);
    }

    /// Fails the sink with `err`. No-op once terminal.
    pub fn fail(&self, err: Error) {
        {
            let mut st = self.shared.state.borrow_mut();
            if !st.flow.fail(err.clone()) {
                return;
            }
            st.discard();
        }
        debug!("sink failed: {}", err);
        self.abort_backend();
        self.shared.events.emit(WritableEvent::Error(err));
        self.shared.events.emit(WritableEvent::Close);
    }

    pub fn on_event<F>(&self, handler: F) -> ListenerId
    where
        F: FnMut(&WritableEvent) + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Runs `f` on every drain.
    pub fn on_drain<F>(&self, mut f: F) -> ListenerId
    where
        F: FnMut() + 'static,
    {
        self.on_event(move |event| {
            if matches!(event, WritableEvent::Drain) {
                f();
            }
        })
    }

    /// Runs `f` once the sink finished; immediately if it already has.
    pub fn on_finish<F>(&self, f: F) -> Option<ListenerId>
    where
        F: FnOnce() + 'static,
    {
        if self.is_finished() {
            f();
            return None;
        }
        let mut f = Some(f);
        Some(self.on_event(move |event| {
            if matches!(event, WritableEvent::Finish) {
                if let Some(f) = f.take() {
                    f();
                }
            }
        }))
    }

    /// Runs `f` once with the error that fails the sink.
    pub fn on_error<F>(&self, f: F) -> ListenerId
    where
        F: FnOnce(&Error) + 'static,
    {
        let mut f = Some(f);
        self.on_event(move |event| {
            if let WritableEvent::Error(err) = event {
                if let Some(f) = f.take() {
                    f(err);
                }
            }
        })
    }

    /// Runs `f` once the sink is terminal; immediately if it already is.
    pub fn on_close<F>(&self, f: F) -> Option<ListenerId>
    where
        F: FnOnce() + 'static,
    {
        if !self.is_open() {
            f();
            return None;
        }
        let mut f = Some(f);
        Some(self.on_event(move |event| {
            if matches!(event, WritableEvent::Close) {
                if let Some(f) = f.take() {
                    f();
                }
            }
        }))
    }

    /// Hands queued chunks to the backend one at a time.
    ///
    /// Returns while a write is outstanding; the ack restarts the pump.
    /// An ack completed from inside `write` is picked up by this loop
    /// rather than re-entering the backend.
    fn pump(&self) {
        loop {
            let (chunk, ack) = {
                let mut st = self.shared.state.borrow_mut();
                if st.writing || st.in_flight.is_some() || !st.flow.is_open() {
                    return;
                }
                let Some(chunk) = st.queue.pop() else {
                    break;
                };
                st.in_flight = Some(chunk.size());
                st.writing = true;
                let ack = WriteAck {
                    target: Some((Rc::downgrade(&self.shared), st.generation)),
                };
                (chunk, ack)
            };

            match self.shared.backend.try_borrow_mut() {
                Ok(mut backend) => backend.write(chunk, ack),
                Err(_) => {
                    drop(chunk);
                    self.shared.state.borrow_mut().writing = false;
                    ack.complete(Err(Error::other("sink backend re-entered")));
                    return;
                }
            }

            let mut st = self.shared.state.borrow_mut();
            st.writing = false;
            if st.in_flight.is_some() {
                return;
            }
        }
        self.settle();
    }

    fn on_write_complete(&self, generation: u64, result: Result<()>) {
        let writing = {
            let mut st = self.shared.state.borrow_mut();
            if st.generation != generation || !st.flow.is_open() {
                return;
            }
            let Some(size) = st.in_flight.take() else {
                return;
            };
            match result {
                Ok(()) => {
                    st.stats.chunks_written += 1;
                    st.stats.bytes_written += size as u64;
                    st.writing
                }
                Err(err) => {
                    // The chunk was lost by the backend.
                    st.stats.chunks_discarded += 1;
                    drop(st);
                    self.fail(err);
                    return;
                }
            }
        };
        if !writing {
            self.pump();
        }
    }

    /// Emits drain and finishes once nothing is queued or in flight.
    fn settle(&self) {
        let (drain, finish) = {
            let mut st = self.shared.state.borrow_mut();
            if !st.flow.is_open() || !st.is_idle() {
                return;
            }
            let drain = st.need_drain && !st.ending;
            st.need_drain = false;
            let finish = st.ending && !st.finishing;
            if finish {
                st.finishing = true;
            }
            (drain, finish)
        };

        if drain {
            debug!("sink drained");
            self.shared.events.emit(WritableEvent::Drain);
        }
        if !finish {
            return;
        }

        let result = match self.shared.backend.try_borrow_mut() {
            Ok(mut backend) => backend.finish(),
            Err(_) => Err(Error::other("sink backend re-entered during finish")),
        };
        match result {
            Ok(()) => {
                {
                    let mut st = self.shared.state.borrow_mut();
                    if !st.flow.close() {
                        return;
                    }
                    st.finished = true;
                    debug!(
                        "sink finished: {} chunks, {} bytes written",
                        st.stats.chunks_written, st.stats.bytes_written
                    );
                }
                self.shared.events.emit(WritableEvent::Finish);
                self.shared.events.emit(WritableEvent::Close);
            }
            Err(err) => self.fail(err),
        }
    }

    fn abort_backend(&self) {
        match self.shared.backend.try_borrow_mut() {
            Ok(mut backend) => backend.abort(),
            Err(_) => trace!("sink backend busy, abort skipped"),
        }
    }
}
