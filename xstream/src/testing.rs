//! Scriptable sink backend for unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::config::WritableConfig;
use crate::error::{Error, Result};
use crate::writable::{SinkBackend, Writable, WriteAck};

/// A backend call, as recorded by [`ScriptedSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call<T> {
    Write(T),
    Finish,
    Abort,
}

pub(crate) struct ScriptedSink<T: Chunk> {
    log: Rc<RefCell<Vec<Call<T>>>>,
    pending: Rc<RefCell<VecDeque<WriteAck<T>>>>,
    finish_error: Rc<RefCell<Option<Error>>>,
    manual: bool,
}

/// Test-side handle: inspects calls and releases held acks.
pub(crate) struct Probe<T: Chunk> {
    log: Rc<RefCell<Vec<Call<T>>>>,
    pending: Rc<RefCell<VecDeque<WriteAck<T>>>>,
    finish_error: Rc<RefCell<Option<Error>>>,
}

impl<T: Chunk + Clone> ScriptedSink<T> {
    /// Acknowledges every write before returning from `write`.
    pub(crate) fn immediate(config: WritableConfig) -> (Writable<T>, Probe<T>) {
        Self::build(config, false)
    }

    /// Holds every ack until the probe releases it.
    pub(crate) fn manual(config: WritableConfig) -> (Writable<T>, Probe<T>) {
        Self::build(config, true)
    }

    fn build(config: WritableConfig, manual: bool) -> (Writable<T>, Probe<T>) {
        let sink = ScriptedSink {
            log: Rc::new(RefCell::new(Vec::new())),
            pending: Rc::new(RefCell::new(VecDeque::new())),
            finish_error: Rc::new(RefCell::new(None)),
            manual,
        };
        let probe = Probe {
            log: Rc::clone(&sink.log),
            pending: Rc::clone(&sink.pending),
            finish_error: Rc::clone(&sink.finish_error),
        };
        (Writable::with_backend(config, sink), probe)
    }
}

impl<T: Chunk + Clone> SinkBackend<T> for ScriptedSink<T> {
    fn write(&mut self, chunk: T, ack: WriteAck<T>) {
        self.log.borrow_mut().push(Call::Write(chunk));
        if self.manual {
            self.pending.borrow_mut().push_back(ack);
        } else {
            ack.complete(Ok(()));
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.log.borrow_mut().push(Call::Finish);
        match self.finish_error.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn abort(&mut self) {
        self.log.borrow_mut().push(Call::Abort);
    }
}

impl<T: Chunk + Clone> Probe<T> {
    pub(crate) fn calls(&self) -> Vec<Call<T>> {
        self.log.borrow().clone()
    }

    /// Chunks written so far, in order.
    pub(crate) fn written(&self) -> Vec<T> {
        self.log
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Write(chunk) => Some(chunk.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Completes the oldest held ack. Returns false if none was held.
    pub(crate) fn release_one(&self) -> bool {
        let ack = self.pending.borrow_mut().pop_front();
        match ack {
            Some(ack) => {
                ack.complete(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Completes held acks, including ones issued while releasing, until
    /// none are left.
    pub(crate) fn release_all(&self) {
        while self.release_one() {}
    }

    pub(crate) fn fail_one(&self, err: Error) {
        let ack = self.pending.borrow_mut().pop_front();
        if let Some(ack) = ack {
            ack.complete(Err(err));
        }
    }

    pub(crate) fn fail_finish_with(&self, err: Error) {
        *self.finish_error.borrow_mut() = Some(err);
    }
}
