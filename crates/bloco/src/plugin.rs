//! Scoped plugin contexts bound to an engine run.
//!
//! A plugin context is an extension resource (keyboard capture, clipboard,
//! a GUI surface...) whose lifetime is tied to program execution: the
//! engine acquires every registered resource on `start`, before the first
//! root task runs, and releases them all on `stop`. Block executors reach
//! an active resource by its registered name and downcast through
//! [`Resource::as_any`] for typed access.
//!
//! Resources may run their own OS threads; those threads talk back to the
//! engine exclusively through the thread-safe [`crate::EngineHandle`] they
//! received at acquisition. `acquire` itself runs while the engine lock is
//! held, so the handle is for the resource's own threads, not for
//! re-entrant calls from `acquire`.

use std::any::Any;

use crate::error::ExecError;

/// An extension resource with a run-scoped lifecycle.
pub trait Resource: Send {
    /// Acquires the resource for a run. Called on `start`, before root
    /// tasks execute.
    fn acquire(&mut self, engine: &crate::engine::EngineHandle) -> Result<(), ExecError>;

    /// Releases the resource. Called on `stop`; must be safe to call even
    /// if `acquire` failed.
    fn release(&mut self);

    /// Downcasting hook for typed access from block executors.
    fn as_any(&mut self) -> &mut dyn Any;
}

/// Builds a fresh resource instance for each run.
pub type ResourceFactory = Box<dyn Fn() -> Box<dyn Resource> + Send + Sync>;

/// The registered plugin factories and the currently active resources.
#[derive(Default)]
pub(crate) struct PluginSet {
    factories: Vec<(String, ResourceFactory)>,
    active: Vec<(String, Box<dyn Resource>)>,
}

impl PluginSet {
    /// Registers a factory under a type name.
    pub fn add(&mut self, name: impl Into<String>, factory: ResourceFactory) {
        self.factories.push((name.into(), factory));
    }

    /// Constructs and acquires every registered resource.
    ///
    /// On failure the resources acquired so far are released before the
    /// error is returned.
    pub fn acquire_all(&mut self, engine: &crate::engine::EngineHandle) -> Result<(), ExecError> {
        for i in 0..self.factories.len() {
            let (name, factory) = &self.factories[i];
            let name = name.clone();
            let mut resource = factory();
            if let Err(err) = resource.acquire(engine) {
                self.release_all();
                return Err(ExecError::execution(format!(
                    "plugin context '{name}' failed to acquire: {err}"
                )));
            }
            self.active.push((name, resource));
        }
        Ok(())
    }

    /// Releases and drops all active resources.
    pub fn release_all(&mut self) {
        for (_, resource) in &mut self.active {
            resource.release();
        }
        self.active.clear();
    }

    /// Borrows an active resource by name.
    pub fn get(&mut self, name: &str) -> Option<&mut (dyn Resource + '_)> {
        match self.active.iter_mut().find(|(key, _)| key == name) {
            Some((_, resource)) => Some(resource.as_mut()),
            None => None,
        }
    }
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSet")
            .field("factories", &self.factories.len())
            .field("active", &self.active.len())
            .finish()
    }
}
