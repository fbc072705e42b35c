//! Pipe coordinator: connects one readable to one writable.
//!
//! The pipe forwards every chunk into the sink, pauses the source when the
//! sink saturates and resumes it on drain. Source end finalizes the sink;
//! source errors destroy it; sink errors pause (and optionally destroy) the
//! source. Every error reaches the pipe's error listeners, or the log when
//! nobody listens.
//!
//! ```text
//!   Idle ──► Streaming ──┬──► Completed
//!                        ├──► Errored
//!                        └──► Destroyed
//! ```
//!
//! Flow control follows the pause/resume/drain protocol. A pull-based
//! `request(n)` protocol could replace it without changing this type's
//! surface, provided `Readable` gains a matching pull operation.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use log::{debug, error, trace, warn};

use crate::chunk::Chunk;
use crate::config::PipeConfig;
use crate::error::{Error, Result};
use crate::notify::{ListenerId, Notifier};
use crate::readable::{ConsumerId, Detach, Readable, ReadableEvent};
use crate::writable::{Writable, WritableEvent};

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(1);

/// Pipe lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    /// Created, not yet wired.
    Idle,

    /// Forwarding chunks.
    Streaming,

    /// The source ended and the sink was finalized.
    Completed,

    /// Either end failed.
    Errored,

    /// Torn down explicitly, or replaced by a newer pipe on the same source.
    Destroyed,
}

impl PipeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipeState::Completed | PipeState::Errored | PipeState::Destroyed
        )
    }
}

/// Flow-control counters of one pipe.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipeStats {
    pub chunks_forwarded: u64,
    pub bytes_forwarded: u64,
    /// Times the source was paused for a saturated sink.
    pub pauses: u64,
    /// Times the source was resumed on drain.
    pub resumes: u64,
}

#[derive(Default)]
struct Links {
    consumer: Option<ConsumerId>,
    source_listener: Option<ListenerId>,
    sink_listener: Option<ListenerId>,
}

struct PipeShared<T> {
    id: u64,
    source: Readable<T>,
    sink: Writable<T>,
    config: PipeConfig,
    state: Cell<PipeState>,
    saturated_since: Cell<Option<Instant>>,
    stall_reported: Cell<bool>,
    stats: Cell<PipeStats>,
    links: RefCell<Links>,
    errors: Notifier<Error>,
    last_error: RefCell<Option<Error>>,
}

/// Handle to an established pipe.
///
/// The pipe keeps itself alive through its subscriptions on both ends until
/// it reaches a terminal state; dropping the handle does not stop it.
pub struct Pipe<T> {
    shared: Rc<PipeShared<T>>,
}

impl<T> Clone for Pipe<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: Chunk> Pipe<T> {
    /// Connects `source` to `sink` and starts the flow.
    ///
    /// A pipe already consuming `source` is detached first.
    pub fn new(source: Readable<T>, sink: Writable<T>, config: PipeConfig) -> Self {
        let shared = Rc::new(PipeShared {
            id: NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed),
            source,
            sink,
            config,
            state: Cell::new(PipeState::Idle),
            saturated_since: Cell::new(None),
            stall_reported: Cell::new(false),
            stats: Cell::new(PipeStats::default()),
            links: RefCell::new(Links::default()),
            errors: Notifier::new(),
            last_error: RefCell::new(None),
        });
        PipeShared::establish(&shared);
        Self { shared }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> PipeState {
        self.shared.state.get()
    }

    pub fn stats(&self) -> PipeStats {
        self.shared.stats.get()
    }

    /// True while the source is paused waiting for the sink to drain.
    pub fn is_saturated(&self) -> bool {
        self.shared.saturated_since.get().is_some()
    }

    pub fn last_error(&self) -> Option<Error> {
        self.shared.last_error.borrow().clone()
    }

    pub fn source(&self) -> &Readable<T> {
        &self.shared.source
    }

    pub fn sink(&self) -> &Writable<T> {
        &self.shared.sink
    }

    /// Subscribes to errors of this pipe. Without any subscriber, errors
    /// are logged instead.
    pub fn on_error<F>(&self, f: F) -> ListenerId
    where
        F: FnMut(&Error) + 'static,
    {
        self.shared.errors.subscribe(f)
    }

    pub fn off_error(&self, id: ListenerId) -> bool {
        self.shared.errors.unsubscribe(id)
    }

    /// Tears the pipe down, leaving both ends open. The source is paused.
    ///
    /// A completed pipe whose sink is still finishing only drops its sink
    /// subscription; the finalize already requested keeps running.
    pub fn destroy(&self) {
        match self.shared.state.get() {
            PipeState::Completed => {
                self.shared.release();
                return;
            }
            state if state.is_terminal() => return,
            _ => {}
        }
        debug!("pipe {} destroyed", self.shared.id);
        self.shared.state.set(PipeState::Destroyed);
        self.shared.release();
        self.shared.source.pause();
    }

    /// Reports a stall if the sink has been saturated for longer than the
    /// configured drain timeout. Meant to be polled by a watchdog.
    ///
    /// A stall is reported to the error listeners once per saturation
    /// episode; with `fail_on_stall` the pipe is also torn down and the sink
    /// destroyed.
    pub fn check_stall(&self, now: Instant) -> Result<()> {
        let shared = &self.shared;
        let Some(timeout) = shared.config.drain_timeout else {
            return Ok(());
        };
        if shared.state.get() != PipeState::Streaming {
            return Ok(());
        }
        let Some(since) = shared.saturated_since.get() else {
            return Ok(());
        };
        let waited = now.saturating_duration_since(since);
        if waited < timeout {
            return Ok(());
        }

        let err = Error::DrainStall { waited };
        if !shared.stall_reported.replace(true) {
            warn!("pipe {}: sink has not drained for {:?}", shared.id, waited);
            if shared.config.fail_on_stall {
                shared.state.set(PipeState::Errored);
                shared.release();
                shared.sink.destroy();
            }
            shared.report(err.clone());
        }
        Err(err)
    }
}

impl<T: Chunk> PipeShared<T> {
    fn establish(this: &Rc<Self>) {
        if !this.source.is_open() {
            this.state.set(PipeState::Streaming);
            if this.source.is_ended() {
                this.on_source_end();
            } else {
                let err = this.source.last_error().unwrap_or(Error::ClosedStream);
                this.on_source_error(err);
            }
            return;
        }
        if !this.sink.is_open() || this.sink.is_ending() {
            this.state.set(PipeState::Errored);
            this.report(Error::ClosedStream);
            return;
        }

        this.state.set(PipeState::Streaming);

        let owner: Weak<dyn Detach> = Rc::downgrade(this) as Weak<dyn Detach>;
        let pipe = Rc::clone(this);
        let consumer = this
            .source
            .attach_consumer(move |chunk| pipe.on_data(chunk), owner);

        let pipe = Rc::clone(this);
        let source_listener = this
            .source
            .on_event(move |event| pipe.on_source_event(event));

        let pipe = Rc::clone(this);
        let sink_listener = this.sink.on_event(move |event| pipe.on_sink_event(event));

        *this.links.borrow_mut() = Links {
            consumer: Some(consumer),
            source_listener: Some(source_listener),
            sink_listener: Some(sink_listener),
        };

        debug!("pipe {} established", this.id);
        this.source.resume();
    }

    fn on_data(&self, chunk: T) {
        if self.state.get() != PipeState::Streaming {
            warn!("pipe {}: chunk arrived after teardown", self.id);
            return;
        }

        let size = chunk.size();
        trace!("pipe {}: forwarding {} bytes", self.id, size);
        match self.sink.accept(chunk) {
            Ok(more) => {
                let mut stats = self.stats.get();
                stats.chunks_forwarded += 1;
                stats.bytes_forwarded += size as u64;
                if !more && self.saturated_since.get().is_none() {
                    stats.pauses += 1;
                    self.saturated_since.set(Some(Instant::now()));
                    self.stall_reported.set(false);
                    debug!("pipe {}: sink saturated, pausing source", self.id);
                    self.source.pause();
                }
                self.stats.set(stats);
            }
            Err(err) => self.on_sink_error(err),
        }
    }

    fn on_source_event(&self, event: &ReadableEvent) {
        match event {
            ReadableEvent::End => self.on_source_end(),
            ReadableEvent::Error(err) => self.on_source_error(err.clone()),
            ReadableEvent::Close => {
                if self.state.get() == PipeState::Streaming {
                    self.on_source_error(Error::ClosedStream);
                }
            }
            ReadableEvent::Demand => {}
        }
    }

    fn on_sink_event(&self, event: &WritableEvent) {
        match event {
            WritableEvent::Drain => {
                if self.state.get() == PipeState::Streaming
                    && self.saturated_since.take().is_some()
                {
                    let mut stats = self.stats.get();
                    stats.resumes += 1;
                    self.stats.set(stats);
                    debug!("pipe {}: sink drained, resuming source", self.id);
                    self.source.resume();
                }
            }
            WritableEvent::Error(err) => self.on_sink_error(err.clone()),
            WritableEvent::Finish => {
                if self.state.get() == PipeState::Completed {
                    debug!("pipe {} completed", self.id);
                    self.release();
                }
            }
            WritableEvent::Close => match self.state.get() {
                PipeState::Streaming => self.on_sink_error(Error::ClosedStream),
                PipeState::Completed if !self.sink.is_finished() => {
                    self.state.set(PipeState::Errored);
                    self.release();
                    self.report(Error::ClosedStream);
                }
                _ => {}
            },
        }
    }

    fn on_source_end(&self) {
        if self.state.get() != PipeState::Streaming {
            return;
        }
        debug!("pipe {}: source ended", self.id);
        self.state.set(PipeState::Completed);
        self.release_source();

        if !self.config.end_sink {
            self.release();
            return;
        }
        if let Err(err) = self.sink.finalize(None) {
            self.state.set(PipeState::Errored);
            self.release();
            self.report(err);
        } else if self.sink.is_finished() {
            self.release();
        }
    }

    fn on_source_error(&self, err: Error) {
        if self.state.get() != PipeState::Streaming {
            return;
        }
        debug!("pipe {}: source failed: {}", self.id, err);
        self.state.set(PipeState::Errored);
        self.release();
        if self.config.propagate_source_errors {
            self.sink.destroy();
        }
        self.report(err);
    }

    fn on_sink_error(&self, err: Error) {
        let was_streaming = match self.state.get() {
            PipeState::Streaming => true,
            PipeState::Completed => false,
            _ => return,
        };
        debug!("pipe {}: sink failed: {}", self.id, err);
        self.state.set(PipeState::Errored);
        self.release();
        if was_streaming {
            self.source.pause();
            if self.config.destroy_source_on_sink_error {
                self.source.destroy();
            }
        }
        self.report(err);
    }

    fn report(&self, err: Error) {
        *self.last_error.borrow_mut() = Some(err.clone());
        if self.errors.listener_count() == 0 {
            error!("pipe {} failed: {}", self.id, err);
        } else {
            self.errors.emit(err);
        }
    }

    fn release_source(&self) {
        let (consumer, listener) = {
            let mut links = self.links.borrow_mut();
            (links.consumer.take(), links.source_listener.take())
        };
        if let Some(id) = consumer {
            self.source.clear_consumer(id);
        }
        if let Some(id) = listener {
            self.source.off(id);
        }
        self.saturated_since.set(None);
    }

    /// Drops every subscription, which also breaks the reference cycles
    /// that keep the pipe alive.
    fn release(&self) {
        self.release_source();
        let listener = self.links.borrow_mut().sink_listener.take();
        if let Some(id) = listener {
            self.sink.off(id);
        }
    }
}

impl<T: Chunk> Detach for PipeShared<T> {
    fn detach(&self) {
        if self.state.get().is_terminal() {
            return;
        }
        debug!("pipe {} detached", self.id);
        self.state.set(PipeState::Destroyed);
        self.release();
    }
}
