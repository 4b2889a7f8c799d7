//! The per-invocation facade handed to block executors.
//!
//! An [`ExecCtx`] exists for the duration of one executor call. It exposes
//! the engine services a block body may use — variables, the event bus,
//! listener registration, plugin contexts — plus the spawn descriptors
//! event blocks hand to their listeners. Sequential control flow (`next`,
//! `recurse`, substacks) is not a context call: executors describe it with
//! the [`crate::task::Outcome`] they return and the task machinery drives
//! it.

use crate::bus::{EventBus, Listener};
use crate::error::ExecError;
use crate::loader::{BlockNode, NodeId};
use crate::plugin::PluginSet;
use crate::registry::Registry;
use crate::task::TaskSpawn;
use crate::tracer::EngineTracer;
use crate::value::Value;
use crate::variables::{VariableRef, VariableStore};

/// The engine services a resuming task may touch.
///
/// The scheduler assembles one of these from the engine state for every
/// resume; the task machinery reborrows it into [`ExecCtx`]s.
pub(crate) struct World<'a> {
    pub registry: &'a Registry,
    pub variables: &'a mut VariableStore,
    pub bus: &'a mut EventBus,
    pub plugins: &'a mut PluginSet,
    pub tracer: &'a mut (dyn EngineTracer + Send),
}

/// Execution context for one block invocation.
pub struct ExecCtx<'a> {
    pub(crate) variables: &'a mut VariableStore,
    pub(crate) bus: &'a mut EventBus,
    pub(crate) plugins: &'a mut PluginSet,
    pub(crate) tracer: &'a mut (dyn EngineTracer + Send),
    pub(crate) node: &'a BlockNode,
    pub(crate) node_id: NodeId,
    pub(crate) eager: bool,
}

impl ExecCtx<'_> {
    /// The id of the block being executed.
    #[must_use]
    pub fn block_id(&self) -> &str {
        &self.node.id
    }

    /// The eagerness hint this invocation was made with.
    ///
    /// Spawns created from this context inherit it.
    #[must_use]
    pub fn eager(&self) -> bool {
        self.eager
    }

    /// Publishes `(topic, message)` on the event bus.
    pub fn broadcast(&mut self, topic: &str, message: &str) {
        self.tracer.on_broadcast(topic, message);
        self.bus.broadcast(topic, message);
    }

    /// Registers a per-run listener.
    ///
    /// The callback receives every subsequent `(topic, message)` pair; a
    /// returned [`TaskSpawn`] is scheduled as a new task.
    pub fn listen(&mut self, listener: Listener) {
        self.bus.listen(listener);
    }

    /// Reads a variable through the store.
    pub fn get_variable(&self, var_ref: &VariableRef) -> Result<Value, ExecError> {
        self.variables.get(var_ref)
    }

    /// Writes a variable and publishes `("variable", "change")`.
    pub fn set_variable(&mut self, var_ref: VariableRef, value: Value) {
        self.tracer.on_variable_write(&var_ref, &value);
        self.variables.set(var_ref, value);
        self.broadcast("variable", "change");
    }

    /// Borrows an active plugin context by its registered name.
    ///
    /// Fails when no such context is active (not registered, or the
    /// engine is not running).
    pub fn plugin_context(&mut self, name: &str) -> Result<&mut dyn crate::plugin::Resource, ExecError> {
        self.plugins
            .get(name)
            .ok_or_else(|| ExecError::execution(format!("no active plugin context '{name}'")))
    }

    /// Spawn descriptor for this block's successor, if it has one.
    ///
    /// Event blocks capture this in their listeners; the spawn inherits the
    /// current eagerness hint.
    #[must_use]
    pub fn next_spawn(&self) -> Option<TaskSpawn> {
        self.node.next.map(|node| TaskSpawn {
            node,
            eager: self.eager,
            extra: Vec::new(),
        })
    }

    /// Spawn descriptor re-invoking this same block.
    #[must_use]
    pub fn recurse_spawn(&self) -> TaskSpawn {
        TaskSpawn {
            node: self.node_id,
            eager: self.eager,
            extra: Vec::new(),
        }
    }
}
