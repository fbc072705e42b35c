//! Duplex channel: a readable half and a writable half behind one handle.
//!
//! The halves are independent; two pipes may drive them at the same time,
//! one feeding in and one draining out.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::trace;

use crate::chunk::Chunk;
use crate::config::{ReadableConfig, WritableConfig};
use crate::error::{Error, Result};
use crate::flow::FlowState;
use crate::readable::{Readable, ReadableEvent};
use crate::role::{Sink, Source};
use crate::writable::{SinkBackend, Writable, WriteAck};

pub struct Duplex<T> {
    readable: Readable<T>,
    writable: Writable<T>,
}

impl<T> Clone for Duplex<T> {
    fn clone(&self) -> Self {
        Self {
            readable: self.readable.clone(),
            writable: self.writable.clone(),
        }
    }
}

impl<T: Chunk> Duplex<T> {
    pub fn new(readable: Readable<T>, writable: Writable<T>) -> Self {
        Self { readable, writable }
    }

    /// A duplex whose writable half feeds its own readable half.
    ///
    /// Backpressure crosses the relay: a write stays unacknowledged while the
    /// readable backlog is full, so the writable saturates until the
    /// readable is consumed.
    pub fn passthrough() -> Self {
        Self::passthrough_with(ReadableConfig::default(), WritableConfig::default())
    }

    pub fn passthrough_with(readable: ReadableConfig, writable: WritableConfig) -> Self {
        let readable = Readable::with_config(readable);
        let writable = relay_into(&readable, writable);
        Self { readable, writable }
    }

    /// Two cross-wired ends, like a connected socket pair: what one end
    /// writes, the other end reads.
    pub fn pair() -> (Self, Self) {
        Self::pair_with(ReadableConfig::default(), WritableConfig::default())
    }

    pub fn pair_with(readable: ReadableConfig, writable: WritableConfig) -> (Self, Self) {
        let left_in = Readable::with_config(readable);
        let right_in = Readable::with_config(readable);
        let left_out = relay_into(&right_in, writable);
        let right_out = relay_into(&left_in, writable);
        (
            Self::new(left_in, left_out),
            Self::new(right_in, right_out),
        )
    }

    pub fn readable(&self) -> &Readable<T> {
        &self.readable
    }

    pub fn writable(&self) -> &Writable<T> {
        &self.writable
    }

    /// Errored if either half errored, Closed once both are closed, Open
    /// otherwise.
    pub fn state(&self) -> FlowState {
        match (self.readable.state(), self.writable.state()) {
            (FlowState::Errored, _) | (_, FlowState::Errored) => FlowState::Errored,
            (FlowState::Closed, FlowState::Closed) => FlowState::Closed,
            _ => FlowState::Open,
        }
    }

    pub fn destroy(&self) {
        self.readable.destroy();
        self.writable.destroy();
    }

    /// Runs `f` once both halves are terminal.
    pub fn on_close<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        let remaining = Rc::new(Cell::new(2u8));
        let f = Rc::new(RefCell::new(Some(f)));
        let half_closed = move || {
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                if let Some(f) = f.borrow_mut().take() {
                    f();
                }
            }
        };
        let other = half_closed.clone();
        self.readable.on_close(half_closed);
        self.writable.on_close(other);
    }
}

impl<T: Chunk> Source<T> for Duplex<T> {
    fn readable(&self) -> &Readable<T> {
        &self.readable
    }
}

impl<T: Chunk> Sink<T> for Duplex<T> {
    fn writable(&self) -> &Writable<T> {
        &self.writable
    }
}

/// Builds a writable whose chunks are pushed into `target`.
fn relay_into<T: Chunk>(target: &Readable<T>, config: WritableConfig) -> Writable<T> {
    let parked: Rc<RefCell<Option<WriteAck<T>>>> = Rc::new(RefCell::new(None));

    let waiting = Rc::clone(&parked);
    target.on_event(move |event| {
        let result = match event {
            ReadableEvent::Demand => Ok(()),
            ReadableEvent::Close => Err(Error::ClosedStream),
            _ => return,
        };
        let ack = waiting.borrow_mut().take();
        if let Some(ack) = ack {
            trace!("relay released parked write");
            ack.complete(result);
        }
    });

    Writable::with_backend(
        config,
        Relay {
            target: target.clone(),
            parked,
        },
    )
}

struct Relay<T: Chunk> {
    target: Readable<T>,
    parked: Rc<RefCell<Option<WriteAck<T>>>>,
}

impl<T: Chunk> SinkBackend<T> for Relay<T> {
    fn write(&mut self, chunk: T, ack: WriteAck<T>) {
        match self.target.push(chunk) {
            Ok(true) => ack.complete(Ok(())),
            Ok(false) if !self.target.is_open() => ack.complete(Err(Error::ClosedStream)),
            Ok(false) => {
                trace!("relay target full, parking write");
                *self.parked.borrow_mut() = Some(ack);
            }
            Err(err) => ack.complete(Err(err)),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.target.end()
    }

    fn abort(&mut self) {
        self.parked.borrow_mut().take();
        self.target.destroy();
    }
}
