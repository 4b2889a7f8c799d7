//! The typed command surface an external transport drives.
//!
//! A [`Session`] wraps one [`Engine`] — one editor connection at a time —
//! and speaks the command vocabulary the front-end sends over its socket:
//! load a program, start, step, complete, stop, status, exit. The session
//! keeps a global bus listener that accumulates every `(topic, message)`
//! pair; `status` drains that accumulator, so each status response carries
//! exactly the broadcasts since the previous one.
//!
//! The core is JSON-free; [`Session::handle_json`] is the thin serde edge
//! for transports that move strings.

use std::sync::{Arc, Mutex};

use crate::engine::Engine;
use crate::registry::Registry;
use crate::variables::VariableEntry;

/// A command from the transport.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    /// Load a program from XML.
    Program { value: String },
    /// Begin execution.
    Start {
        #[serde(default, rename = "isEager")]
        is_eager: bool,
    },
    /// Advance one non-eager boundary.
    Step,
    /// Run to quiescence.
    Complete,
    /// Halt execution.
    Stop,
    /// Report status.
    Status,
    /// Stop and dispose the session.
    Exit,
}

/// Engine status as serialized to the transport.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StatusPayload {
    pub variables: Vec<VariableEntry>,
    #[serde(rename = "isRunning")]
    pub is_running: bool,
    #[serde(rename = "taskCount")]
    pub task_count: usize,
    pub highlights: Vec<String>,
    /// `(topic, message)` pairs accumulated since the last status.
    pub broadcasts: Vec<(String, String)>,
}

/// A response to the transport.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Status(StatusPayload),
    Error { value: String },
    Log { value: String },
}

/// One transport session over one engine.
pub struct Session {
    engine: Engine,
    broadcasts: Arc<Mutex<Vec<(String, String)>>>,
    closed: bool,
}

impl Session {
    /// Builds a session over a fresh engine for the given registry.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self::over(Engine::new(registry))
    }

    /// Builds a session over an existing engine (custom tracer, plugins).
    #[must_use]
    pub fn over(engine: Engine) -> Self {
        let broadcasts = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&broadcasts);
        engine.add_global_listener(Box::new(move |topic, message| {
            sink.lock()
                .expect("broadcast sink poisoned")
                .push((topic.to_owned(), message.to_owned()));
            Ok(None)
        }));
        Self {
            engine,
            broadcasts,
            closed: false,
        }
    }

    /// The engine under this session.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Whether `Exit` has been processed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Dispatches one command.
    pub fn handle(&mut self, command: Command) -> Response {
        match command {
            Command::Program { value } => match self.engine.load_program(&value) {
                Ok(()) => Response::Log {
                    value: "program loaded".to_owned(),
                },
                Err(err) => Response::Error {
                    value: err.to_string(),
                },
            },
            Command::Start { is_eager } => match self.engine.start(is_eager) {
                Ok(()) => Response::Status(self.status()),
                Err(err) => Response::Error {
                    value: err.to_string(),
                },
            },
            Command::Step => {
                self.engine.step();
                Response::Status(self.status())
            }
            Command::Complete => {
                self.engine.complete();
                Response::Status(self.status())
            }
            Command::Stop => {
                self.engine.stop();
                Response::Status(self.status())
            }
            Command::Status => Response::Status(self.status()),
            Command::Exit => {
                self.engine.stop();
                self.closed = true;
                Response::Log {
                    value: "session closed".to_owned(),
                }
            }
        }
    }

    /// Dispatches a JSON-encoded command, answering in JSON.
    pub fn handle_json(&mut self, payload: &str) -> String {
        let response = match serde_json::from_str::<Command>(payload) {
            Ok(command) => self.handle(command),
            Err(err) => Response::Error {
                value: format!("invalid command: {err}"),
            },
        };
        serde_json::to_string(&response).unwrap_or_else(|err| {
            format!(r#"{{"type":"error","value":"serialization failed: {err}"}}"#)
        })
    }

    /// Builds a status payload, draining accumulated broadcasts.
    pub fn status(&mut self) -> StatusPayload {
        let broadcasts = std::mem::take(
            &mut *self.broadcasts.lock().expect("broadcast sink poisoned"),
        );
        StatusPayload {
            variables: self.engine.variables(),
            is_running: !self.engine.is_complete(),
            task_count: self.engine.task_count(),
            highlights: self.engine.highlights(),
            broadcasts,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("closed", &self.closed).finish_non_exhaustive()
    }
}
