//! Ready-made sources.

use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::chunk::Chunk;
use crate::config::ReadableConfig;
use crate::readable::{Readable, ReadableEvent, WeakReadable};

/// A source producing the items of `iter`, then end-of-stream.
///
/// Production is demand-driven: the iterator is advanced only until the
/// readable reports its backlog full, and resumes on the next
/// [`ReadableEvent::Demand`]. The iterator is dropped once exhausted.
pub fn from_iter<I>(iter: I, config: ReadableConfig) -> Readable<I::Item>
where
    I: IntoIterator,
    I::IntoIter: 'static,
    I::Item: Chunk,
{
    let readable = Readable::with_config(config);
    let iter = Rc::new(RefCell::new(Some(iter.into_iter())));

    let weak = readable.downgrade();
    let pending = Rc::clone(&iter);
    readable.on_event(move |event| {
        if matches!(event, ReadableEvent::Demand) {
            fill(&weak, &pending);
        }
    });

    fill(&readable.downgrade(), &iter);
    readable
}

fn fill<I>(readable: &WeakReadable<I::Item>, iter: &Rc<RefCell<Option<I>>>)
where
    I: Iterator,
    I::Item: Chunk,
{
    let Some(readable) = readable.upgrade() else {
        return;
    };
    loop {
        let next = match iter.try_borrow_mut() {
            Ok(mut iter) => match iter.as_mut() {
                Some(it) => it.next(),
                None => return,
            },
            Err(_) => return,
        };
        match next {
            Some(chunk) => match readable.push(chunk) {
                Ok(true) => {}
                Ok(false) | Err(_) => return,
            },
            None => {
                trace!("iterator source exhausted");
                iter.borrow_mut().take();
                let _ = readable.end();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::Source;
    use crate::sinks;

    #[test]
    fn test_produces_everything_then_ends() {
        let source = from_iter(vec!["a", "b", "c"], ReadableConfig::default());
        let (sink, collected) = sinks::collect();
        source.pipe(&sink);

        assert_eq!(collected.items(), vec!["a", "b", "c"]);
        assert!(source.is_ended());
        assert!(sink.is_finished());
    }

    #[test]
    fn test_production_waits_for_demand() {
        let source = from_iter(
            (0..10u8).map(|i| vec![i; 4]),
            ReadableConfig::new().with_high_water_mark(8),
        );
        assert_eq!(source.buffered_len(), 2);

        let (sink, collected) = sinks::collect();
        source.pipe(&sink);
        assert_eq!(collected.len(), 10);
        assert_eq!(collected.size(), 40);
        assert!(sink.is_finished());
    }

    #[test]
    fn test_paused_source_produces_one_chunk_up_front() {
        let source = from_iter(
            vec!["x", "y"],
            ReadableConfig::new().with_start_paused(true),
        );
        assert_eq!(source.buffered_len(), 1);
        assert_eq!(source.chunks_emitted(), 0);
    }
}
