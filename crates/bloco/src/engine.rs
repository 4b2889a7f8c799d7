//! The engine facade.
//!
//! One [`Engine`] owns one program, its variables, the event bus, the
//! plugin contexts and the scheduler queues, all behind a single mutex. A
//! dedicated worker thread drives [`crate::scheduler::scheduler_tick`]
//! while a run is active; every public method is safe to call from any
//! thread, so the transport layer can post commands directly.
//!
//! Lifecycle: `load_program` → `start` → (`step` | `complete`)* → `stop`.
//! `load_program` and `start` both stop any prior run first. `stop` is
//! synchronous: it joins the worker, closes in-flight tasks, clears
//! per-run listeners and highlights, and releases plugin contexts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::bus::{EventBus, Listener};
use crate::error::{ExecError, LoadError};
use crate::loader::Program;
use crate::plugin::{PluginSet, ResourceFactory};
use crate::registry::Registry;
use crate::scheduler::{self, Tick, scheduler_tick};
use crate::task::{DEFAULT_ITERATION_LIMIT, Task, TaskSpawn, TaskState};
use crate::tracer::{EngineTracer, NoopTracer};
use crate::value::Value;
use crate::variables::{VariableEntry, VariableRef, VariableStore};

/// Everything the scheduler loop and the facade share, under one lock.
pub(crate) struct EngineState {
    pub registry: Arc<Registry>,
    pub program: Arc<Program>,
    pub variables: VariableStore,
    pub bus: EventBus,
    pub plugins: PluginSet,
    pub queues: crate::scheduler::TaskQueues,
    pub tracer: Box<dyn EngineTracer + Send>,
}

impl EngineState {
    /// Resumes a task against this state.
    pub(crate) fn resume_task(&mut self, task: &mut Task) -> Result<TaskState, ExecError> {
        let registry = Arc::clone(&self.registry);
        let mut world = crate::context::World {
            registry: &registry,
            variables: &mut self.variables,
            bus: &mut self.bus,
            plugins: &mut self.plugins,
            tracer: self.tracer.as_mut(),
        };
        task.resume(&mut world)
    }

    /// Publishes on the bus, through the tracer.
    pub(crate) fn broadcast(&mut self, topic: &str, message: &str) {
        self.tracer.on_broadcast(topic, message);
        self.bus.broadcast(topic, message);
    }

    /// Publishes a task failure on the `"error"` topic.
    pub(crate) fn publish_error(&mut self, err: &ExecError) {
        self.tracer.on_error(err);
        let message = err.to_string();
        self.broadcast("error", &message);
    }

    /// Turns listener spawns accumulated on the bus into fresh tasks.
    pub(crate) fn intake_spawns(&mut self) {
        for spawn in self.bus.take_spawns() {
            scheduler::spawn_task(self, spawn);
        }
    }
}

impl std::fmt::Debug for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineState")
            .field("program_blocks", &self.program.len())
            .field("tasks", &self.queues.len())
            .finish_non_exhaustive()
    }
}

/// The block-program execution engine.
///
/// # Example
/// ```
/// use bloco::{Engine, Registry};
///
/// let engine = Engine::new(Registry::with_defaults());
/// engine
///     .load_program(r#"<xml><block type="event_whenflagclicked" id="go"></block></xml>"#)
///     .unwrap();
/// engine.start(false).unwrap();
/// engine.complete();
/// engine.stop();
/// assert!(engine.is_complete());
/// ```
pub struct Engine {
    state: Arc<Mutex<EngineState>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Builds an engine over the given registry with no tracing.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self::with_tracer(registry, Box::new(NoopTracer))
    }

    /// Builds an engine with a tracer.
    #[must_use]
    pub fn with_tracer(registry: Registry, tracer: Box<dyn EngineTracer + Send>) -> Self {
        let state = EngineState {
            registry: Arc::new(registry),
            program: Arc::new(Program::default()),
            variables: VariableStore::with_core_handlers(),
            bus: EventBus::new(),
            plugins: PluginSet::default(),
            queues: crate::scheduler::TaskQueues::default(),
            tracer,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().expect("engine state poisoned")
    }

    /// Registers a plugin context factory under a type name.
    ///
    /// Must be called before `start`; contexts registered later join the
    /// next run.
    pub fn add_plugin(&self, name: impl Into<String>, factory: ResourceFactory) {
        self.state().plugins.add(name, factory);
    }

    /// Registers a listener that survives `stop` (e.g. the transport's
    /// status collector).
    pub fn add_global_listener(&self, listener: Listener) {
        self.state().bus.listen_global(listener);
    }

    /// Registers an additional variable default handler.
    pub fn add_variable_handler(&self, handler: Box<dyn crate::variables::VariableHandler>) {
        self.state().variables.add_handler(handler);
    }

    /// The registry this engine executes against.
    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.state().registry)
    }

    /// Editor metadata for all visible, non-predefined blocks.
    pub fn block_metadata(&self) -> Result<serde_json::Value, LoadError> {
        self.registry().metadata()
    }

    /// Parses and installs a program, stopping any prior run.
    ///
    /// Replaces the starting-block list, the per-block argument caches and
    /// the variable store contents in one swap.
    pub fn load_program(&self, xml: &str) -> Result<(), LoadError> {
        let registry = self.registry();
        let program = Program::parse(xml, &registry)?;
        self.stop();
        let mut state = self.state();
        state.program = Arc::new(program);
        let program = Arc::clone(&state.program);
        state.variables.load_declarations(program.variables());
        Ok(())
    }

    /// Starts execution.
    ///
    /// Stops any prior run, resets variables from the program, acquires
    /// plugin contexts, then launches every starting block as a root task
    /// in program order. Each root runs synchronously up to its first
    /// non-eager boundary (event blocks finish their listener registration
    /// here) before `("executor", "start")` is published, so listeners
    /// observe the start broadcast. Finally the worker thread takes over.
    pub fn start(&self, is_eager: bool) -> Result<(), ExecError> {
        self.stop();
        {
            let mut state = self.state();
            let program = Arc::clone(&state.program);
            state.variables.load_declarations(program.variables());
            let handle = self.handle();
            state.plugins.acquire_all(&handle)?;

            for &root in program.starting_blocks() {
                let node = program.node(root);
                state.tracer.on_task_spawn(&node.id, &node.kind);
                let mut task = Task::new(Arc::clone(&program), TaskSpawn::new(root, is_eager));
                let mut resumes = 0usize;
                loop {
                    resumes += 1;
                    if resumes > DEFAULT_ITERATION_LIMIT {
                        state.publish_error(&ExecError::IterationLimit {
                            limit: DEFAULT_ITERATION_LIMIT,
                        });
                        break;
                    }
                    match state.resume_task(&mut task) {
                        Ok(TaskState::Yielded(step)) => {
                            state.tracer.on_step(&step);
                            if step.eager {
                                continue;
                            }
                            state.queues.route(task, Some(step));
                            break;
                        }
                        Ok(TaskState::Finished) => {
                            state.tracer.on_task_finish(task.root_id());
                            break;
                        }
                        Err(err) => {
                            state.publish_error(&err);
                            break;
                        }
                    }
                }
            }

            state.broadcast("executor", "start");
            state.intake_spawns();
        }
        self.spawn_worker();
        Ok(())
    }

    /// Lets one more non-eager boundary through the step gate.
    pub fn step(&self) {
        self.state().queues.current_step += 1;
    }

    /// Runs until both intakes are empty (quiescence).
    ///
    /// Drives scheduler ticks inline, so it works whether or not the
    /// worker is running and returns only when the queues have drained.
    pub fn complete(&self) {
        loop {
            let mut state = self.state();
            if state.queues.is_empty() {
                state.queues.reset_counters();
                return;
            }
            state.queues.completing = true;
            scheduler_tick(&mut state);
        }
    }

    /// Halts execution.
    ///
    /// Joins the worker, drops all in-flight tasks, clears per-run
    /// listeners and highlights, and releases plugin contexts. Idempotent;
    /// variables keep their last written values.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.lock().expect("worker handle poisoned").take() {
            let _ = worker.join();
        }
        let mut state = self.state();
        state.queues.clear();
        state.bus.clear_run_listeners();
        let _ = state.bus.take_spawns();
        state.plugins.release_all();
    }

    /// Whether execution has fully quiesced: no live tasks and no per-run
    /// listeners waiting for events.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let state = self.state();
        state.queues.is_empty() && state.bus.run_listener_count() == 0
    }

    /// Number of live tasks (parked, eager or uninitialised).
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.state().queues.len()
    }

    /// Block ids of currently suspended non-eager steps.
    #[must_use]
    pub fn highlights(&self) -> Vec<String> {
        self.state().queues.highlights.iter().cloned().collect()
    }

    /// Serializable variable listing in declaration order.
    #[must_use]
    pub fn variables(&self) -> Vec<VariableEntry> {
        self.state().variables.entries()
    }

    /// Reads one variable.
    pub fn variable(&self, var_ref: &VariableRef) -> Result<Value, ExecError> {
        self.state().variables.get(var_ref)
    }

    /// Publishes an external event (keyboard transport, tests...).
    pub fn broadcast(&self, topic: &str, message: &str) {
        let mut state = self.state();
        state.broadcast(topic, message);
        state.intake_spawns();
    }

    /// A thread-safe handle for plugin contexts and external threads.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            state: Arc::clone(&self.state),
            running: Arc::clone(&self.running),
        }
    }

    fn spawn_worker(&self) {
        self.running.store(true, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let worker = std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let tick = {
                    let mut state = state.lock().expect("engine state poisoned");
                    scheduler_tick(&mut state)
                };
                match tick {
                    Tick::Worked => {}
                    Tick::Idle | Tick::Gated => std::thread::sleep(crate::scheduler::IDLE_SLEEP),
                }
            }
        });
        *self.worker.lock().expect("worker handle poisoned") = Some(worker);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Thread-safe engine surface for plugin contexts.
///
/// Plugin threads communicate back into the engine exclusively through
/// [`EngineHandle::broadcast`].
#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<Mutex<EngineState>>,
    running: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Publishes `(topic, message)`; listener spawns are scheduled.
    pub fn broadcast(&self, topic: &str, message: &str) {
        let mut state = self.state.lock().expect("engine state poisoned");
        state.broadcast(topic, message);
        state.intake_spawns();
    }

    /// Whether execution has quiesced (see [`Engine::is_complete`]).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let state = self.state.lock().expect("engine state poisoned");
        state.queues.is_empty() && state.bus.run_listener_count() == 0
    }

    /// Whether the worker loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}
