//! The `(topic, message)` pub/sub bus.
//!
//! Two listener registries: per-run listeners are cleared on `stop`,
//! global listeners persist for the life of the engine (the transport's
//! status collector lives there). `broadcast` invokes global listeners
//! first, then per-run listeners, each in registration order. A listener
//! may answer with a [`TaskSpawn`]; the scheduler picks those up and turns
//! them into new tasks. Listener failures never propagate — they are
//! collected and republished on the `"error"` topic.

use crate::error::ExecError;
use crate::task::TaskSpawn;

/// A broadcast listener.
///
/// Receives `(topic, message)`; returning `Ok(Some(spawn))` schedules a
/// new task.
pub type Listener = Box<dyn FnMut(&str, &str) -> Result<Option<TaskSpawn>, ExecError> + Send>;

/// Pub/sub bus with per-run and global listener registries.
#[derive(Default)]
pub struct EventBus {
    run_listeners: Vec<Listener>,
    global_listeners: Vec<Listener>,
    pending_spawns: Vec<TaskSpawn>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a per-run listener (cleared on `stop`).
    pub fn listen(&mut self, listener: Listener) {
        self.run_listeners.push(listener);
    }

    /// Registers a listener that survives `stop`.
    pub fn listen_global(&mut self, listener: Listener) {
        self.global_listeners.push(listener);
    }

    /// Publishes `(topic, message)` to all listeners.
    ///
    /// Spawns returned by listeners accumulate until the scheduler drains
    /// them with [`Self::take_spawns`]. Listener errors republish on the
    /// `"error"` topic; errors raised while already on `"error"` are
    /// dropped so a faulty error listener cannot loop the bus.
    pub fn broadcast(&mut self, topic: &str, message: &str) {
        let mut errors = Vec::new();
        for listener in self.global_listeners.iter_mut().chain(&mut self.run_listeners) {
            match listener(topic, message) {
                Ok(Some(spawn)) => self.pending_spawns.push(spawn),
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
        }
        if topic != "error" {
            for err in errors {
                self.broadcast("error", &err.to_string());
            }
        }
    }

    /// Takes the spawns accumulated since the last call.
    pub fn take_spawns(&mut self) -> Vec<TaskSpawn> {
        std::mem::take(&mut self.pending_spawns)
    }

    /// Number of registered per-run listeners.
    #[must_use]
    pub fn run_listener_count(&self) -> usize {
        self.run_listeners.len()
    }

    /// Drops all per-run listeners (global ones stay).
    pub fn clear_run_listeners(&mut self) {
        self.run_listeners.clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("run_listeners", &self.run_listeners.len())
            .field("global_listeners", &self.global_listeners.len())
            .field("pending_spawns", &self.pending_spawns.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn collector(into: Arc<Mutex<Vec<(String, String)>>>) -> Listener {
        Box::new(move |topic, message| {
            into.lock().unwrap().push((topic.to_owned(), message.to_owned()));
            Ok(None)
        })
    }

    #[test]
    fn global_listeners_run_before_run_listeners() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let seen = Arc::clone(&order);
        bus.listen(Box::new(move |_, _| {
            seen.lock().unwrap().push("run");
            Ok(None)
        }));
        let seen = Arc::clone(&order);
        bus.listen_global(Box::new(move |_, _| {
            seen.lock().unwrap().push("global");
            Ok(None)
        }));
        bus.broadcast("x", "y");
        assert_eq!(*order.lock().unwrap(), vec!["global", "run"]);
    }

    #[test]
    fn listener_errors_republish_on_error_topic() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.listen_global(collector(Arc::clone(&seen)));
        bus.listen(Box::new(|_, _| Err(ExecError::execution("boom"))));
        bus.broadcast("ping", "1");

        let events = seen.lock().unwrap().clone();
        assert_eq!(events[0], ("ping".to_owned(), "1".to_owned()));
        assert_eq!(events[1].0, "error");
        assert!(events[1].1.contains("boom"));
    }

    #[test]
    fn clear_run_listeners_keeps_global() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.listen_global(collector(Arc::clone(&seen)));
        bus.listen(Box::new(|_, _| Err(ExecError::execution("never runs"))));
        bus.clear_run_listeners();
        assert_eq!(bus.run_listener_count(), 0);
        bus.broadcast("a", "b");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
