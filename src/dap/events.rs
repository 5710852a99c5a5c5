//! Event-name keyed subscriber registry
//!
//! Handlers run synchronously on the reader task, in registration order,
//! against a context the caller hands in (the session core). They never
//! touch the pending-request flow directly unless the context lets them.

use super::types::Event;

/// What a handler wants to happen after it ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Drop every subscription once the current dispatch finishes
    UnsubscribeAll,
}

type Handler<C> = Box<dyn FnMut(&mut C, &Event) -> Flow + Send>;

pub struct EventDispatcher<C> {
    handlers: Vec<(String, Handler<C>)>,
}

impl<C> Default for EventDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventDispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler for one event name
    pub fn subscribe<F>(&mut self, event: &str, handler: F)
    where
        F: FnMut(&mut C, &Event) -> Flow + Send + 'static,
    {
        self.handlers.push((event.to_string(), Box::new(handler)));
    }

    /// Run every handler registered for the event's name
    ///
    /// Returns how many handlers ran. Events nobody subscribed to are
    /// ignored.
    pub fn dispatch(&mut self, ctx: &mut C, event: &Event) -> usize {
        let name = event.name();
        let mut ran = 0;
        let mut unsubscribe = false;

        for (subscribed, handler) in self.handlers.iter_mut() {
            if subscribed.as_str() != name {
                continue;
            }
            ran += 1;
            if handler(ctx, event) == Flow::UnsubscribeAll {
                unsubscribe = true;
            }
        }

        if ran == 0 {
            tracing::trace!(event = name, "Ignoring event with no subscribers");
        }
        if unsubscribe {
            self.clear();
        }
        ran
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let mut dispatcher: EventDispatcher<Vec<&'static str>> = EventDispatcher::new();
        dispatcher.subscribe("initialized", |log, _| {
            log.push("first");
            Flow::Continue
        });
        dispatcher.subscribe("terminated", |log, _| {
            log.push("other");
            Flow::Continue
        });
        dispatcher.subscribe("initialized", |log, _| {
            log.push("second");
            Flow::Continue
        });

        let mut log = Vec::new();
        assert_eq!(dispatcher.dispatch(&mut log, &Event::Initialized), 2);
        assert_eq!(log, vec!["first", "second"]);
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        let mut dispatcher: EventDispatcher<u32> = EventDispatcher::new();
        dispatcher.subscribe("stopped", |n, _| {
            *n += 1;
            Flow::Continue
        });

        let mut count = 0;
        let event = Event::Unknown {
            event: "loadedSource".into(),
            body: None,
        };
        assert_eq!(dispatcher.dispatch(&mut count, &event), 0);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unsubscribe_all_after_dispatch() {
        let mut dispatcher: EventDispatcher<u32> = EventDispatcher::new();
        dispatcher.subscribe("terminated", |n, _| {
            *n += 1;
            Flow::UnsubscribeAll
        });
        dispatcher.subscribe("terminated", |n, _| {
            *n += 10;
            Flow::Continue
        });
        dispatcher.subscribe("output", |_, _| Flow::Continue);

        let mut count = 0;
        dispatcher.dispatch(&mut count, &Event::Terminated);
        // both terminated handlers still run in the same cycle
        assert_eq!(count, 11);
        assert!(dispatcher.is_empty());

        assert_eq!(dispatcher.dispatch(&mut count, &Event::Terminated), 0);
    }
}
