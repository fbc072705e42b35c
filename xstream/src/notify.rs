//! Typed listener registry used by every stream role.
//!
//! Dispatch is synchronous. An event emitted while the same notifier is
//! already dispatching is queued and delivered once the current event has
//! reached every listener, so a handler is never re-entered and events keep
//! their emission order.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Handle returned by [`Notifier::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler<E> = Rc<RefCell<dyn FnMut(&E)>>;

struct Listener<E> {
    id: ListenerId,
    once: bool,
    handler: Handler<E>,
}

pub struct Notifier<E> {
    listeners: RefCell<Vec<Listener<E>>>,
    queue: RefCell<VecDeque<E>>,
    dispatching: Cell<bool>,
    next_id: Cell<u64>,
}

impl<E> Notifier<E> {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
            next_id: Cell::new(0),
        }
    }

    /// Registers a handler for every future event.
    pub fn subscribe<F>(&self, handler: F) -> ListenerId
    where
        F: FnMut(&E) + 'static,
    {
        self.register(handler, false)
    }

    /// Registers a handler that is removed after its first invocation.
    pub fn once<F>(&self, handler: F) -> ListenerId
    where
        F: FnMut(&E) + 'static,
    {
        self.register(handler, true)
    }

    fn register<F>(&self, handler: F, once: bool) -> ListenerId
    where
        F: FnMut(&E) + 'static,
    {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let handler: Handler<E> = Rc::new(RefCell::new(handler));
        self.listeners.borrow_mut().push(Listener { id, once, handler });
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Delivers `event` to every registered listener.
    pub fn emit(&self, event: E) {
        self.queue.borrow_mut().push_back(event);
        if self.dispatching.replace(true) {
            return;
        }
        let _guard = DispatchGuard(&self.dispatching);

        loop {
            let Some(event) = self.queue.borrow_mut().pop_front() else {
                break;
            };

            let snapshot: Vec<(ListenerId, bool, Handler<E>)> = self
                .listeners
                .borrow()
                .iter()
                .map(|l| (l.id, l.once, Rc::clone(&l.handler)))
                .collect();

            for (id, once, handler) in snapshot {
                // An earlier handler may have unsubscribed this one.
                let still_registered = if once {
                    self.unsubscribe(id)
                } else {
                    self.listeners.borrow().iter().any(|l| l.id == id)
                };
                if !still_registered {
                    continue;
                }
                (handler.borrow_mut())(&event);
            }
        }
    }
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_listeners() {
        let notifier: Notifier<u32> = Notifier::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s1 = Rc::clone(&seen);
        notifier.subscribe(move |e| s1.borrow_mut().push(("a", *e)));
        let s2 = Rc::clone(&seen);
        notifier.subscribe(move |e| s2.borrow_mut().push(("b", *e)));

        notifier.emit(7);
        assert_eq!(*seen.borrow(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let notifier: Notifier<()> = Notifier::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        notifier.once(move |_| c.set(c.get() + 1));

        notifier.emit(());
        notifier.emit(());
        assert_eq!(count.get(), 1);
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let notifier: Notifier<()> = Notifier::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let id = notifier.subscribe(move |_| c.set(c.get() + 1));

        notifier.emit(());
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.emit(());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_nested_emit_is_queued_in_order() {
        let notifier: Rc<Notifier<u32>> = Rc::new(Notifier::new());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let n = Rc::downgrade(&notifier);
        let s = Rc::clone(&seen);
        notifier.subscribe(move |e| {
            s.borrow_mut().push(*e);
            if *e == 1 {
                if let Some(n) = n.upgrade() {
                    n.emit(2);
                    n.emit(3);
                }
            }
        });

        notifier.emit(1);
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }
}
