// Single-threaded input queue in front of a handler.
//
// Win32 can re-enter the UI thread while a handler is still running (a
// WinEvent delivered inside EndDeferWindowPos, a WM_TIMER during a modal
// dialog). Such inputs are queued and run, in arrival order, by the dispatch
// call that already holds the handler. Handlers never interleave.

use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use tracing::debug;

pub trait Handler<T> {
    fn handle(&mut self, input: T);
}

pub struct Dispatcher<T, H> {
    handler: RefCell<H>,
    pending: RefCell<VecDeque<T>>,
}

impl<T, H: Handler<T>> Dispatcher<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: RefCell::new(handler),
            pending: RefCell::new(VecDeque::new()),
        }
    }

    /// Run `input` now, or queue it if a handler is already running.
    /// Returns whether this call drained the queue.
    pub fn dispatch(&self, input: T) -> bool {
        self.pending.borrow_mut().push_back(input);

        let Ok(mut handler) = self.handler.try_borrow_mut() else {
            debug!("Handler busy, input queued");
            return false;
        };

        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(input) = next else {
                return true;
            };
            handler.handle(input);
        }
    }

    /// Direct access for setup and teardown, outside any callback.
    pub fn handler(&self) -> RefMut<'_, H> {
        self.handler.borrow_mut()
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Drop queued inputs without running them.
    pub fn clear(&self) {
        self.pending.borrow_mut().clear();
    }
}
