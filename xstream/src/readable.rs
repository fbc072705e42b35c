//! Readable side of a stream: a push-based producer of chunks.
//!
//! The producer calls [`Readable::push`] and [`Readable::end`]; the single
//! consumer (usually a [`Pipe`](crate::Pipe)) receives chunks in push order.
//! While paused, or while no consumer is attached, chunks accumulate in an
//! ordered backlog that is flushed first on resume.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::{debug, error, trace};

use crate::buffer::ChunkQueue;
use crate::chunk::Chunk;
use crate::config::ReadableConfig;
use crate::error::{Error, Result};
use crate::flow::{FlowState, FlowUnit};
use crate::notify::{ListenerId, Notifier};

/// Notifications emitted by a [`Readable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadableEvent {
    /// End-of-stream was delivered. No chunk follows.
    End,

    /// The source failed.
    Error(Error),

    /// The source reached a terminal state. Always the last event.
    Close,

    /// The backlog drained after `push` reported it full; the producer may
    /// push again.
    Demand,
}

/// Identifies the consumer currently attached to a [`Readable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerId(u64);

/// Implemented by whatever currently owns a readable's consumer slot, so a
/// newer owner can detach it.
pub(crate) trait Detach {
    fn detach(&self);
}

type Consumer<T> = Rc<RefCell<dyn FnMut(T)>>;

struct ReadableState<T> {
    flow: FlowUnit,
    config: ReadableConfig,
    paused: bool,
    backlog: ChunkQueue<T>,
    end_requested: bool,
    ended: bool,
    flushing: bool,
    need_demand: bool,
    consumer: Option<(ConsumerId, Consumer<T>)>,
    next_consumer: u64,
    owner: Option<Weak<dyn Detach>>,
    chunks_emitted: u64,
}

struct Shared<T> {
    state: RefCell<ReadableState<T>>,
    events: Notifier<ReadableEvent>,
}

/// A source of chunks.
///
/// Cloning yields another handle to the same stream.
pub struct Readable<T> {
    shared: Rc<Shared<T>>,
}

/// Non-owning handle to a [`Readable`].
pub struct WeakReadable<T> {
    shared: Weak<Shared<T>>,
}

impl<T> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> Clone for WeakReadable<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T: Chunk> WeakReadable<T> {
    pub fn upgrade(&self) -> Option<Readable<T>> {
        self.shared.upgrade().map(|shared| Readable { shared })
    }
}

impl<T: Chunk> Readable<T> {
    /// Creates a readable with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ReadableConfig::default())
    }

    pub fn with_config(config: ReadableConfig) -> Self {
        let state = ReadableState {
            flow: FlowUnit::new(),
            config,
            paused: config.start_paused,
            backlog: ChunkQueue::new(),
            end_requested: false,
            ended: false,
            flushing: false,
            need_demand: false,
            consumer: None,
            next_consumer: 0,
            owner: None,
            chunks_emitted: 0,
        };
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(state),
                events: Notifier::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakReadable<T> {
        WeakReadable {
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn state(&self) -> FlowState {
        self.shared.state.borrow().flow.state()
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.borrow().flow.is_open()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.borrow().paused
    }

    /// True once end-of-stream has been delivered to a consumer.
    pub fn is_ended(&self) -> bool {
        self.shared.state.borrow().ended
    }

    pub fn last_error(&self) -> Option<Error> {
        self.shared.state.borrow().flow.last_error().cloned()
    }

    /// Number of chunks waiting in the backlog.
    pub fn buffered_len(&self) -> usize {
        self.shared.state.borrow().backlog.len()
    }

    /// Total size of chunks waiting in the backlog.
    pub fn buffered_size(&self) -> usize {
        self.shared.state.borrow().backlog.size()
    }

    /// Number of chunks handed to a consumer so far.
    pub fn chunks_emitted(&self) -> u64 {
        self.shared.state.borrow().chunks_emitted
    }

    /// Emits a chunk.
    ///
    /// Returns `Ok(false)` when the producer should stop until the next
    /// [`ReadableEvent::Demand`]. The chunk is taken either way.
    ///
    /// Pushing after [`end`](Self::end) is a producer bug: the stream fails
    /// with [`Error::PostCompletionEmit`].
    pub fn push(&self, chunk: T) -> Result<bool> {
        {
            let mut st = self.shared.state.borrow_mut();
            if st.end_requested {
                drop(st);
                error!("chunk pushed after end-of-stream");
                self.fail(Error::PostCompletionEmit);
                return Err(Error::PostCompletionEmit);
            }
            st.flow.ensure_open()?;
            trace!("push chunk of {} bytes", chunk.size());
            st.backlog.push(chunk);
        }

        self.flush();

        let mut st = self.shared.state.borrow_mut();
        if !st.flow.is_open() {
            return Ok(false);
        }
        let more = !st.paused && st.backlog.size() < st.config.high_water_mark;
        if !more {
            st.need_demand = true;
        }
        Ok(more)
    }

    /// Signals end-of-stream. Chunks already pushed are still delivered
    /// first. Calling `end` again is a no-op.
    pub fn end(&self) -> Result<()> {
        {
            let mut st = self.shared.state.borrow_mut();
            if st.end_requested {
                return Ok(());
            }
            st.flow.ensure_open()?;
            st.end_requested = true;
        }
        self.flush();
        Ok(())
    }

    /// Stops delivery. Already-delivered chunks are unaffected; new ones
    /// queue in the backlog.
    pub fn pause(&self) {
        let mut st = self.shared.state.borrow_mut();
        if !st.paused {
            st.paused = true;
            debug!("readable paused with {} chunks buffered", st.backlog.len());
        }
    }

    /// Cancels a pause and flushes the backlog in order.
    pub fn resume(&self) {
        {
            let mut st = self.shared.state.borrow_mut();
            if st.paused {
                st.paused = false;
                debug!("readable resumed with {} chunks buffered", st.backlog.len());
            }
        }
        self.flush();
    }

    /// Tears the stream down without delivering end-of-stream. Buffered
    /// chunks are dropped.
    pub fn destroy(&self) {
        let dropped = {
            let mut st = self.shared.state.borrow_mut();
            if !st.flow.close() {
                return;
            }
            st.consumer = None;
            st.owner = None;
            st.backlog.clear()
        };
        debug!("readable destroyed, {} buffered chunks dropped", dropped);
        self.shared.events.emit(ReadableEvent::Close);
    }

    /// Fails the stream with `err`. No-op once terminal.
    pub fn fail(&self, err: Error) {
        {
            let mut st = self.shared.state.borrow_mut();
            if !st.flow.fail(err.clone()) {
                return;
            }
            st.consumer = None;
            st.owner = None;
            st.backlog.clear();
        }
        debug!("readable failed: {}", err);
        self.shared.events.emit(ReadableEvent::Error(err));
        self.shared.events.emit(ReadableEvent::Close);
    }

    /// Attaches `consumer` as the sole receiver of chunks, replacing (and
    /// detaching) any previous one.
    pub fn on_data<F>(&self, consumer: F) -> ConsumerId
    where
        F: FnMut(T) + 'static,
    {
        let id = self.install(consumer, None);
        self.flush();
        id
    }

    pub(crate) fn attach_consumer<F>(&self, consumer: F, owner: Weak<dyn Detach>) -> ConsumerId
    where
        F: FnMut(T) + 'static,
    {
        self.install(consumer, Some(owner))
    }

    fn install<F>(&self, consumer: F, owner: Option<Weak<dyn Detach>>) -> ConsumerId
    where
        F: FnMut(T) + 'static,
    {
        let previous = self.shared.state.borrow_mut().owner.take();
        if let Some(previous) = previous.and_then(|w| w.upgrade()) {
            debug!("readable re-piped, detaching previous pipe");
            previous.detach();
        }

        let mut st = self.shared.state.borrow_mut();
        let id = ConsumerId(st.next_consumer);
        st.next_consumer += 1;
        let consumer: Consumer<T> = Rc::new(RefCell::new(consumer));
        st.consumer = Some((id, consumer));
        st.owner = owner;
        id
    }

    /// Removes the consumer if it is still the one identified by `id`.
    pub fn clear_consumer(&self, id: ConsumerId) -> bool {
        let mut st = self.shared.state.borrow_mut();
        match &st.consumer {
            Some((current, _)) if *current == id => {
                st.consumer = None;
                st.owner = None;
                true
            }
            _ => false,
        }
    }

    pub fn has_consumer(&self) -> bool {
        self.shared.state.borrow().consumer.is_some()
    }

    pub fn on_event<F>(&self, handler: F) -> ListenerId
    where
        F: FnMut(&ReadableEvent) + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Runs `f` once end-of-stream is delivered.
    pub fn on_end<F>(&self, f: F) -> ListenerId
    where
        F: FnOnce() + 'static,
    {
        let mut f = Some(f);
        self.on_event(move |event| {
            if matches!(event, ReadableEvent::End) {
                if let Some(f) = f.take() {
                    f();
                }
            }
        })
    }

    /// Runs `f` once with the error that fails the stream.
    pub fn on_error<F>(&self, f: F) -> ListenerId
    where
        F: FnOnce(&Error) + 'static,
    {
        let mut f = Some(f);
        self.on_event(move |event| {
            if let ReadableEvent::Error(err) = event {
                if let Some(f) = f.take() {
                    f(err);
                }
            }
        })
    }

    /// Runs `f` once the stream is terminal; immediately if it already is.
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
            if matches!(event, ReadableEvent::Close) {
                if let Some(f) = f.take() {
                    f();
                }
            }
        }))
    }

    /// Delivers backlog chunks to the consumer until paused or empty, then
    /// delivers end-of-stream if requested.
    ///
    /// A flush started from inside a consumer returns at once; the outer
    /// loop picks up whatever was pushed.
    fn flush(&self) {
        {
            let mut st = self.shared.state.borrow_mut();
            if st.flushing {
                return;
            }
            st.flushing = true;
        }

        let mut ended = false;
        loop {
            let (consumer, chunk) = {
                let mut st = self.shared.state.borrow_mut();
                if st.paused || !st.flow.is_open() {
                    break;
                }
                let Some((_, consumer)) = st.consumer.as_ref() else {
                    break;
                };
                let consumer = Rc::clone(consumer);
                match st.backlog.pop() {
                    Some(chunk) => {
                        st.chunks_emitted += 1;
                        (consumer, chunk)
                    }
                    None => {
                        if st.end_requested && !st.ended {
                            st.ended = true;
                            st.flow.close();
                            st.consumer = None;
                            st.owner = None;
                            ended = true;
                        }
                        break;
                    }
                }
            };
            (consumer.borrow_mut())(chunk);
        }

        let demand = {
            let mut st = self.shared.state.borrow_mut();
            st.flushing = false;
            let below = st.backlog.size() < st.config.high_water_mark;
            if st.need_demand && st.flow.is_open() && !st.paused && below && !st.end_requested {
                st.need_demand = false;
                true
            } else {
                false
            }
        };

        if demand {
            trace!("readable backlog drained, signaling demand");
            self.shared.events.emit(ReadableEvent::Demand);
        }
        if ended {
            debug!("readable delivered end-of-stream");
            self.shared.events.emit(ReadableEvent::End);
            self.shared.events.emit(ReadableEvent::Close);
        }
    }
}

impl<T: Chunk> Default for Readable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn collecting(readable: &Readable<&'static str>) -> Rc<RefCell<Vec<&'static str>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        readable.on_data(move |chunk| s.borrow_mut().push(chunk));
        seen
    }

    #[test]
    fn test_chunks_wait_for_a_consumer() {
        let readable: Readable<&'static str> = Readable::new();
        readable.push("a").unwrap();
        readable.push("b").unwrap();
        assert_eq!(readable.buffered_len(), 2);

        let seen = collecting(&readable);
        assert_eq!(*seen.borrow(), vec!["a", "b"]);
        assert_eq!(readable.buffered_len(), 0);
        assert_eq!(readable.chunks_emitted(), 2);
    }

    #[test]
    fn test_pause_buffers_and_resume_flushes_in_order() {
        let readable: Readable<&'static str> = Readable::new();
        let seen = collecting(&readable);

        readable.push("1").unwrap();
        readable.pause();
        readable.pause();
        assert!(!readable.push("2").unwrap());
        assert!(!readable.push("3").unwrap());
        assert_eq!(*seen.borrow(), vec!["1"]);

        readable.resume();
        readable.push("4").unwrap();
        assert_eq!(*seen.borrow(), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_end_is_delivered_after_backlog() {
        let readable: Readable<&'static str> = Readable::with_config(
            ReadableConfig::new().with_start_paused(true),
        );
        let seen = collecting(&readable);
        let ended = Rc::new(Cell::new(false));
        let e = Rc::clone(&ended);
        readable.on_end(move || e.set(true));

        readable.push("x").unwrap();
        readable.end().unwrap();
        assert!(!ended.get());

        readable.resume();
        assert_eq!(*seen.borrow(), vec!["x"]);
        assert!(ended.get());
        assert!(readable.is_ended());
        assert_eq!(readable.state(), FlowState::Closed);
    }

    #[test]
    fn test_zero_length_chunk_is_not_end_of_stream() {
        let readable: Readable<&'static str> = Readable::new();
        let seen = collecting(&readable);
        readable.push("").unwrap();
        assert_eq!(*seen.borrow(), vec![""]);
        assert!(!readable.is_ended());
        assert!(readable.is_open());
    }

    #[test]
    fn test_push_after_end_is_fatal() {
        let readable: Readable<&'static str> = Readable::with_config(
            ReadableConfig::new().with_start_paused(true),
        );
        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&errors);
        readable.on_error(move |err| e.borrow_mut().push(err.clone()));

        readable.end().unwrap();
        assert_eq!(readable.push("late"), Err(Error::PostCompletionEmit));
        assert_eq!(readable.state(), FlowState::Errored);
        assert_eq!(*errors.borrow(), vec![Error::PostCompletionEmit]);
    }

    #[test]
    fn test_push_after_destroy_fails() {
        let readable: Readable<&'static str> = Readable::new();
        readable.destroy();
        assert_eq!(readable.push("a"), Err(Error::ClosedStream));
        assert_eq!(readable.end(), Err(Error::ClosedStream));
    }

    #[test]
    fn test_close_notifies_once() {
        let readable: Readable<&'static str> = Readable::new();
        let closes = Rc::new(Cell::new(0));
        let c = Rc::clone(&closes);
        readable.on_event(move |event| {
            if *event == ReadableEvent::Close {
                c.set(c.get() + 1);
            }
        });

        readable.destroy();
        readable.destroy();
        readable.fail(Error::other("late"));
        assert_eq!(closes.get(), 1);
        assert_eq!(readable.state(), FlowState::Closed);
    }

    #[test]
    fn test_demand_after_backlog_drains() {
        let readable: Readable<&'static str> = Readable::with_config(
            ReadableConfig::new().with_high_water_mark(2),
        );
        let demands = Rc::new(Cell::new(0));
        let d = Rc::clone(&demands);
        readable.on_event(move |event| {
            if *event == ReadableEvent::Demand {
                d.set(d.get() + 1);
            }
        });

        assert!(readable.push("a").unwrap());
        assert!(!readable.push("b").unwrap());
        assert_eq!(demands.get(), 0);

        let _seen = collecting(&readable);
        assert_eq!(demands.get(), 1);
    }

    #[test]
    fn test_consumer_pushing_reentrantly_keeps_order() {
        let readable: Readable<&'static str> = Readable::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let weak = readable.downgrade();
        readable.on_data(move |chunk| {
            s.borrow_mut().push(chunk);
            if chunk == "first" {
                if let Some(r) = weak.upgrade() {
                    r.push("second").unwrap();
                }
            }
        });

        readable.push("first").unwrap();
        readable.push("third").unwrap();
        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_on_close_fires_immediately_when_terminal() {
        let readable: Readable<&'static str> = Readable::new();
        readable.destroy();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        assert!(readable.on_close(move || f.set(true)).is_none());
        assert!(fired.get());
    }
}
