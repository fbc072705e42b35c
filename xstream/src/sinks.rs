//! Ready-made sinks.

use std::cell::RefCell;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::config::WritableConfig;
use crate::error::Result;
use crate::writable::{SinkBackend, Writable, WriteAck};

/// Chunks gathered by a [`collect`] sink.
pub struct Collected<T> {
    items: Rc<RefCell<Vec<T>>>,
}

impl<T> Clone for Collected<T> {
    fn clone(&self) -> Self {
        Self {
            items: Rc::clone(&self.items),
        }
    }
}

impl<T: Chunk> Collected<T> {
    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.borrow().clone()
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Total size of the collected chunks.
    pub fn size(&self) -> usize {
        self.items.borrow().iter().map(Chunk::size).sum()
    }
}

impl Collected<Vec<u8>> {
    /// Concatenates collected byte chunks.
    pub fn concat(&self) -> Vec<u8> {
        self.items.borrow().concat()
    }
}

/// A sink that keeps every chunk in memory.
pub fn collect<T: Chunk>() -> (Writable<T>, Collected<T>) {
    let items = Rc::new(RefCell::new(Vec::new()));
    let collected = Collected {
        items: Rc::clone(&items),
    };
    let sink = from_fn(WritableConfig::default(), move |chunk| {
        items.borrow_mut().push(chunk);
        Ok(())
    });
    (sink, collected)
}

/// A sink that drops every chunk. Its [`stats`](Writable::stats) still
/// count what went through.
pub fn discard<T: Chunk>() -> Writable<T> {
    from_fn(WritableConfig::default(), |_| Ok(()))
}

/// A sink that hands each chunk to `f` and completes the write with its
/// result. An `Err` fails the sink.
pub fn from_fn<T, F>(config: WritableConfig, f: F) -> Writable<T>
where
    T: Chunk,
    F: FnMut(T) -> Result<()> + 'static,
{
    Writable::with_backend(config, FnSink { f })
}

struct FnSink<F> {
    f: F,
}

impl<T, F> SinkBackend<T> for FnSink<F>
where
    T: Chunk,
    F: FnMut(T) -> Result<()>,
{
    fn write(&mut self, chunk: T, ack: WriteAck<T>) {
        ack.complete((self.f)(chunk));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::flow::FlowState;

    #[test]
    fn test_collect_keeps_order() {
        let (sink, collected) = collect();
        sink.accept(b"ab".to_vec()).unwrap();
        sink.accept(Vec::new()).unwrap();
        sink.finalize(Some(b"c".to_vec())).unwrap();

        assert_eq!(collected.len(), 3);
        assert_eq!(collected.size(), 3);
        assert_eq!(collected.concat(), b"abc".to_vec());
        assert!(sink.is_finished());
    }

    #[test]
    fn test_discard_counts_bytes() {
        let sink = discard();
        sink.accept("hello").unwrap();
        sink.accept("!").unwrap();
        let stats = sink.stats();
        assert_eq!(stats.chunks_written, 2);
        assert_eq!(stats.bytes_written, 6);
    }

    #[test]
    fn test_from_fn_error_fails_sink() {
        let sink = from_fn(WritableConfig::default(), |chunk: &'static str| {
            if chunk == "bad" {
                Err(Error::other("rejected"))
            } else {
                Ok(())
            }
        });
        assert!(sink.accept("good").unwrap());
        assert_eq!(sink.accept("bad"), Err(Error::other("rejected")));
        assert_eq!(sink.state(), FlowState::Errored);
    }
}
