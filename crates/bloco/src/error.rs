//! Error kinds for program loading and block execution.
//!
//! Load-time failures ([`LoadError`]) surface synchronously from
//! `Engine::load_program` and the metadata export. Run-time failures
//! ([`ExecError`]) never propagate out of the scheduler: the task wrapper
//! catches them, traces them, and republishes them on the event bus as
//! `("error", "<Kind>: <message>")` so the transport can surface them.

use std::fmt;

/// Errors raised while loading a program or exporting block metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The program XML is unparseable or a block is missing a required
    /// attribute.
    MalformedProgram(String),
    /// A referenced block type has no registry entry.
    UnknownBlock(String),
    /// A visual definition's title has more placeholders than declared
    /// arguments.
    MalformedDefinition(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedProgram(msg) => write!(f, "MalformedProgram: {msg}"),
            Self::UnknownBlock(kind) => write!(f, "UnknownBlock: unknown block type '{kind}'"),
            Self::MalformedDefinition(msg) => write!(f, "MalformedDefinition: {msg}"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Errors raised while a task is running.
///
/// These are fatal to the task that raised them but not to the engine:
/// the scheduler publishes them and keeps draining the other tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// A block executor failed (bad coercion, missing argument, arithmetic
    /// domain error, plugin failure...).
    Execution(String),
    /// The per-resume iteration safety bound was exceeded, which points at
    /// runaway eager recursion or an absurd repeat count.
    IterationLimit { limit: usize },
    /// An executor produced a flow instruction the task cannot follow,
    /// e.g. a plan naming an argument that is not a statement.
    InvalidStep(String),
}

impl ExecError {
    /// Convenience constructor for executor failures.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution(msg) => write!(f, "ExecutionError: {msg}"),
            Self::IterationLimit { limit } => {
                write!(f, "IterationLimitExceeded: task exceeded {limit} iterations in one resume")
            }
            Self::InvalidStep(msg) => write!(f, "InvalidStep: {msg}"),
        }
    }
}

impl std::error::Error for ExecError {}
