//! The cooperative stepping scheduler.
//!
//! Three intake structures feed the loop:
//!
//! - an **eager stack** (LIFO) for items whose last step was eager (or
//!   that have not stepped yet after the uninitialised drain);
//! - a **step queue** (FIFO) for items parked at a non-eager boundary,
//!   ordered by a monotonically increasing enqueue priority;
//! - an **uninitialised list** of freshly spawned tasks, drained at the
//!   top of every tick so their first step classifies them.
//!
//! The eager stack always wins over the step queue, so eager sub-work
//! interleaves before any parked task advances. A parked item only passes
//! when its priority is within `current_step` (one `step()` call admits
//! one item) or when `completing` disables the gate entirely. Parked items
//! carry the highlight for their block until they are resumed.
//!
//! One [`scheduler_tick`] performs one loop iteration; the engine's worker
//! thread (and `complete`, which drives ticks inline) call it under the
//! engine lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;

use crate::engine::EngineState;
use crate::task::{Step, Task, TaskState, TaskSpawn};

/// How long the worker sleeps when there is nothing to do.
pub(crate) const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// A task waiting in one of the intake structures.
#[derive(Debug)]
pub(crate) struct ScheduledItem {
    /// `-1` for eager items, else the monotonic enqueue order.
    pub priority: i64,
    pub task: Task,
    /// The step the task last yielded (`None` before its first step).
    pub step: Option<Step>,
}

/// The scheduler's intake structures and stepping state.
#[derive(Debug)]
pub(crate) struct TaskQueues {
    eager: Vec<ScheduledItem>,
    stepq: VecDeque<ScheduledItem>,
    pub uninitialised: Vec<Task>,
    task_counter: i64,
    /// Highest step-queue priority currently allowed through.
    pub current_step: i64,
    pub completing: bool,
    pub highlights: AHashSet<String>,
}

impl Default for TaskQueues {
    fn default() -> Self {
        Self {
            eager: Vec::new(),
            stepq: VecDeque::new(),
            uninitialised: Vec::new(),
            task_counter: 0,
            current_step: -1,
            completing: false,
            highlights: AHashSet::new(),
        }
    }
}

impl TaskQueues {
    /// Classifies a resumed task by the step it yielded.
    ///
    /// Eager steps (and stepless fresh items) go on the eager stack;
    /// non-eager steps park in the step queue and take the highlight for
    /// their block.
    pub fn route(&mut self, task: Task, step: Option<Step>) {
        let eager = step.as_ref().is_none_or(|s| s.eager);
        if eager {
            self.eager.push(ScheduledItem {
                priority: -1,
                task,
                step,
            });
        } else {
            if let Some(step) = &step {
                self.highlights.insert(step.block_id.clone());
            }
            let priority = self.task_counter;
            self.task_counter += 1;
            self.stepq.push_back(ScheduledItem {
                priority,
                task,
                step,
            });
        }
    }

    /// Whether the head of the step queue is being held back.
    pub fn gated(&self) -> bool {
        if self.completing || !self.eager.is_empty() {
            return false;
        }
        self.stepq
            .front()
            .is_some_and(|item| item.priority > self.current_step)
    }

    /// Pops the next runnable item: eager stack first, then step queue.
    pub fn pop(&mut self) -> Option<ScheduledItem> {
        if let Some(item) = self.eager.pop() {
            return Some(item);
        }
        self.stepq.pop_front()
    }

    /// Total live tasks, including ones that have not stepped yet.
    pub fn len(&self) -> usize {
        self.eager.len() + self.stepq.len() + self.uninitialised.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resets the stepping counters once the loop runs dry.
    pub fn reset_counters(&mut self) {
        self.completing = false;
        self.task_counter = 0;
        self.current_step = -1;
    }

    /// Drops every task and highlight and resets the counters.
    pub fn clear(&mut self) {
        self.eager.clear();
        self.stepq.clear();
        self.uninitialised.clear();
        self.highlights.clear();
        self.reset_counters();
    }
}

/// What one tick did, so the worker knows whether to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// A task was resumed (or initialized).
    Worked,
    /// Both intakes are empty.
    Idle,
    /// The step-queue head is waiting for `step()`/`complete()`.
    Gated,
}

/// One scheduler loop iteration. Runs under the engine lock.
pub(crate) fn scheduler_tick(state: &mut EngineState) -> Tick {
    // Drain fresh tasks: one resume each, so their first step routes them.
    let fresh = std::mem::take(&mut state.queues.uninitialised);
    let drained = !fresh.is_empty();
    for task in fresh {
        resume_and_route(state, task);
    }
    state.intake_spawns();

    if state.queues.is_empty() {
        state.queues.reset_counters();
        return if drained { Tick::Worked } else { Tick::Idle };
    }
    if state.queues.gated() {
        return Tick::Gated;
    }

    let Some(item) = state.queues.pop() else {
        return Tick::Idle;
    };
    let ScheduledItem { task, step, .. } = item;
    if let Some(step) = &step {
        state.queues.highlights.remove(&step.block_id);
    }
    resume_and_route(state, task);
    state.intake_spawns();
    Tick::Worked
}

/// Resumes a task once and routes it (or retires it).
fn resume_and_route(state: &mut EngineState, mut task: Task) {
    match state.resume_task(&mut task) {
        Ok(TaskState::Yielded(step)) => {
            state.tracer.on_step(&step);
            state.queues.route(task, Some(step));
        }
        Ok(TaskState::Finished) => {
            state.tracer.on_task_finish(task.root_id());
        }
        Err(err) => {
            state.publish_error(&err);
        }
    }
}

/// Turns a listener's spawn into an uninitialised task.
pub(crate) fn spawn_task(state: &mut EngineState, spawn: TaskSpawn) {
    let program = Arc::clone(&state.program);
    let node = program.node(spawn.node);
    state.tracer.on_task_spawn(&node.id, &node.kind);
    state.queues.uninitialised.push(Task::new(program, spawn));
}
