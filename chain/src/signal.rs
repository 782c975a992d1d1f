//! Synchronous publish/subscribe points for controller events.
//!
//! Subscribers run on the writer thread, inside the call that produced the
//! event; they must not reenter the controller.

/// A list of subscribers invoked synchronously, in subscription order.
pub struct Signal<T> {
    subscribers: Vec<Box<dyn Fn(&T) + Send + Sync>>,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self { subscribers: Vec::new() }
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, subscriber: impl Fn(&T) + Send + Sync + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    pub fn emit(&self, event: &T) {
        for subscriber in &self.subscribers {
            subscriber(event);
        }
    }
}
