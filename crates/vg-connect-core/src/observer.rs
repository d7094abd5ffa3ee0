use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use vg_api_types::{ConnectionEvent, ViewState};

/// Receives controller lifecycle events and a fresh view after every state change.
pub trait ConnectionObserver {
    fn on_event(&self, event: &ConnectionEvent);

    fn render(&self, _view: &ViewState) {}
}

/// Keeps the most recent events and the last rendered view.
pub struct EventLog {
    capacity: usize,
    events: RefCell<VecDeque<ConnectionEvent>>,
    last_view: RefCell<Option<ViewState>>,
    renders: Cell<usize>,
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RefCell::new(VecDeque::new()),
            last_view: RefCell::new(None),
            renders: Cell::new(0),
        }
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.borrow().iter().cloned().collect()
    }

    pub fn last_event(&self) -> Option<ConnectionEvent> {
        self.events.borrow().back().cloned()
    }

    pub fn last_view(&self) -> Option<ViewState> {
        self.last_view.borrow().clone()
    }

    pub fn render_count(&self) -> usize {
        self.renders.get()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(256)
    }
}

impl ConnectionObserver for EventLog {
    fn on_event(&self, event: &ConnectionEvent) {
        let mut events = self.events.borrow_mut();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }

    fn render(&self, view: &ViewState) {
        self.renders.set(self.renders.get() + 1);
        *self.last_view.borrow_mut() = Some(view.clone());
    }
}
