//! Stream roles.
//!
//! Anything that exposes a [`Readable`] is a [`Source`]; anything that
//! exposes a [`Writable`] is a [`Sink`]. A [`Duplex`](crate::Duplex) is
//! both, which is what makes `a.pipe(&b).pipe(&c)` chain.

use crate::chunk::Chunk;
use crate::config::PipeConfig;
use crate::pipe::Pipe;
use crate::readable::Readable;
use crate::writable::Writable;

pub trait Source<T: Chunk> {
    fn readable(&self) -> &Readable<T>;

    /// Pipes into `dst` with the default configuration and returns `dst`
    /// for chaining.
    ///
    /// The pipe handle is dropped, so its errors are only logged. Use
    /// [`pipe_with`](Source::pipe_with) to subscribe to them.
    fn pipe<D>(&self, dst: &D) -> D
    where
        D: Sink<T> + Clone,
    {
        Pipe::new(
            self.readable().clone(),
            dst.writable().clone(),
            PipeConfig::default(),
        );
        dst.clone()
    }

    /// Pipes into `dst` and returns the pipe handle.
    fn pipe_with<D>(&self, dst: &D, config: PipeConfig) -> Pipe<T>
    where
        D: Sink<T> + ?Sized,
    {
        Pipe::new(self.readable().clone(), dst.writable().clone(), config)
    }
}

pub trait Sink<T: Chunk> {
    fn writable(&self) -> &Writable<T>;
}

impl<T: Chunk> Source<T> for Readable<T> {
    fn readable(&self) -> &Readable<T> {
        self
    }
}

impl<T: Chunk> Sink<T> for Writable<T> {
    fn writable(&self) -> &Writable<T> {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::WritableConfig;
    use crate::error::Error;
    use crate::testing::ScriptedSink;

    #[test]
    fn test_pipe_with_exposes_errors() {
        let src: Readable<&'static str> = Readable::new();
        let (sink, _probe) = ScriptedSink::immediate(WritableConfig::default());
        let pipe = src.pipe_with(&sink, PipeConfig::default());
        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&errors);
        pipe.on_error(move |err| e.borrow_mut().push(err.clone()));

        src.fail(Error::other("boom"));
        assert_eq!(*errors.borrow(), vec![Error::other("boom")]);
        assert_eq!(pipe.last_error(), Some(Error::other("boom")));
    }

    #[test]
    fn test_pipe_returns_destination_for_chaining() {
        let src: Readable<&'static str> = Readable::new();
        let (sink, probe) = ScriptedSink::immediate(WritableConfig::default());
        let chained = src.pipe(&sink);

        src.push("a").unwrap();
        src.end().unwrap();
        assert!(chained.is_finished());
        assert_eq!(probe.written(), vec!["a"]);
    }
}
