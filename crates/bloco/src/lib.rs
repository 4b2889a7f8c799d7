//! # bloco
//!
//! A stepping execution engine for visual block-based programs.
//!
//! Programs arrive as XML trees of connected blocks (the shape a
//! Blockly/Scratch-style editor saves). The engine parses them into an
//! immutable block graph, then drives evaluation under a cooperative
//! scheduler: every block boundary is a step the UI can observe, eager
//! steps run straight through, and non-eager steps can be held for
//! user-driven single stepping. Blocks communicate through a `(topic,
//! message)` event bus — hat blocks register listeners that spawn new
//! tasks — and read/write typed program variables.
//!
//! The usual embedding is a [`Session`] speaking the transport command
//! vocabulary, or an [`Engine`] directly:
//!
//! ```
//! use bloco::{Engine, Registry};
//!
//! let engine = Engine::new(Registry::with_defaults());
//! engine
//!     .load_program(r#"<xml><block type="event_whenflagclicked" id="go"></block></xml>"#)
//!     .unwrap();
//! engine.start(false).unwrap();
//! engine.complete();
//! engine.stop();
//! ```

mod blocks;
mod bus;
mod context;
mod engine;
mod error;
mod loader;
mod metadata;
mod plugin;
mod registry;
mod scheduler;
mod session;
mod task;
pub mod tracer;
mod value;
mod variables;

pub use crate::{
    blocks::register_defaults,
    bus::Listener,
    context::ExecCtx,
    engine::{Engine, EngineHandle},
    error::{ExecError, LoadError},
    loader::{Binding, BlockNode, NodeId, Program},
    metadata::{Colour, VisualArg, VisualDefinition, block_metadata},
    plugin::{Resource, ResourceFactory},
    registry::{BlockDefinition, ParamKind, ParamSpec, Registry},
    session::{Command, Response, Session, StatusPayload},
    task::{Arg, Args, Call, DEFAULT_ITERATION_LIMIT, Outcome, Step, TaskSpawn},
    tracer::{EngineTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
    value::Value,
    variables::{
        BROADCAST_TYPE, BroadcastVariableHandler, LIST_TYPE, ListVariableHandler, SCALAR_TYPE,
        ScalarVariableHandler, VariableDecl, VariableEntry, VariableHandler, VariableRef,
        VariableStore,
    },
};
