//! Engine execution tracing.
//!
//! A trait-based tracing system for the scheduler and task machinery.
//! All hooks have inline no-op defaults, so [`NoopTracer`] costs nothing;
//! concrete tracers only override the hooks they care about:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (production default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event capture for tests and post-mortem |
//!
//! The engine owns its tracer; [`RecordingTracer`] hands out a shared view
//! of the captured events so a test can keep reading after the engine has
//! taken ownership.

use std::sync::{Arc, Mutex};

use crate::error::ExecError;
use crate::task::Step;
use crate::value::Value;
use crate::variables::VariableRef;

/// One captured execution event.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// A task was spawned for a block.
    Spawn { block_id: String, block_kind: String },
    /// A task crossed a block boundary.
    Step {
        block_id: String,
        block_kind: String,
        eager: bool,
    },
    /// A task ran its chain to completion.
    Finish { block_id: String },
    /// A `(topic, message)` pair went out on the event bus.
    Broadcast { topic: String, message: String },
    /// A variable was written.
    VariableWrite { id: String, value: Value },
    /// A task died with an error.
    Error { message: String },
}

/// Trait for engine execution tracing.
///
/// Hooks default to no-ops; implementations override what they need.
pub trait EngineTracer: std::fmt::Debug {
    /// Called when a root or listener task is created.
    #[inline]
    fn on_task_spawn(&mut self, _block_id: &str, _block_kind: &str) {}

    /// Called for every [`Step`] a task yields, eager or not.
    #[inline]
    fn on_step(&mut self, _step: &Step) {}

    /// Called when a task terminates normally.
    #[inline]
    fn on_task_finish(&mut self, _block_id: &str) {}

    /// Called for every event bus publication.
    #[inline]
    fn on_broadcast(&mut self, _topic: &str, _message: &str) {}

    /// Called for every variable write.
    #[inline]
    fn on_variable_write(&mut self, _var_ref: &VariableRef, _value: &Value) {}

    /// Called when a task is terminated by an error.
    #[inline]
    fn on_error(&mut self, _error: &ExecError) {}
}

/// The zero-cost default tracer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl EngineTracer for NoopTracer {}

/// Logs every event to stderr. Debugging aid.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl EngineTracer for StderrTracer {
    fn on_task_spawn(&mut self, block_id: &str, block_kind: &str) {
        eprintln!("[bloco] spawn {block_kind} ({block_id})");
    }

    fn on_step(&mut self, step: &Step) {
        let mode = if step.eager { "eager" } else { "step" };
        eprintln!("[bloco] {mode} {} ({})", step.block_kind, step.block_id);
    }

    fn on_task_finish(&mut self, block_id: &str) {
        eprintln!("[bloco] finish ({block_id})");
    }

    fn on_broadcast(&mut self, topic: &str, message: &str) {
        eprintln!("[bloco] broadcast ({topic}, {message})");
    }

    fn on_variable_write(&mut self, var_ref: &VariableRef, value: &Value) {
        eprintln!("[bloco] set {}-{} = {value}", var_ref.type_tag, var_ref.id);
    }

    fn on_error(&mut self, error: &ExecError) {
        eprintln!("[bloco] error: {error}");
    }
}

/// Captures every event into a shared buffer.
///
/// Clones share the buffer, so a test can keep one clone and hand the
/// other to the engine.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("tracer poisoned").clone()
    }

    /// The block ids of captured steps, in emission order.
    #[must_use]
    pub fn step_ids(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TraceEvent::Step { block_id, .. } => Some(block_id),
                _ => None,
            })
            .collect()
    }

    /// Drops all captured events.
    pub fn clear(&self) {
        self.events.lock().expect("tracer poisoned").clear();
    }

    fn push(&self, event: TraceEvent) {
        self.events.lock().expect("tracer poisoned").push(event);
    }
}

impl EngineTracer for RecordingTracer {
    fn on_task_spawn(&mut self, block_id: &str, block_kind: &str) {
        self.push(TraceEvent::Spawn {
            block_id: block_id.to_owned(),
            block_kind: block_kind.to_owned(),
        });
    }

    fn on_step(&mut self, step: &Step) {
        self.push(TraceEvent::Step {
            block_id: step.block_id.clone(),
            block_kind: step.block_kind.clone(),
            eager: step.eager,
        });
    }

    fn on_task_finish(&mut self, block_id: &str) {
        self.push(TraceEvent::Finish {
            block_id: block_id.to_owned(),
        });
    }

    fn on_broadcast(&mut self, topic: &str, message: &str) {
        self.push(TraceEvent::Broadcast {
            topic: topic.to_owned(),
            message: message.to_owned(),
        });
    }

    fn on_variable_write(&mut self, var_ref: &VariableRef, value: &Value) {
        self.push(TraceEvent::VariableWrite {
            id: var_ref.id.clone(),
            value: value.clone(),
        });
    }

    fn on_error(&mut self, error: &ExecError) {
        self.push(TraceEvent::Error {
            message: error.to_string(),
        });
    }
}
