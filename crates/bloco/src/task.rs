//! Resumable tasks: the block-invocation state machine.
//!
//! A [`Task`] executes one chain of blocks cooperatively. It is a stack of
//! frames, one per in-flight block invocation; each call to
//! [`Task::resume`] runs until the next block boundary and returns the
//! [`Step`] announced there (or [`TaskState::Finished`]). The scheduler
//! decides what a boundary means — eager steps are resumed immediately,
//! non-eager steps wait for the user to step or run to completion.
//!
//! A frame moves through four phases: announce the step, resolve the
//! block's arguments (evaluating nested expression blocks in child frames,
//! each argument at most once per invocation), invoke the executor, then
//! drive whatever flow instruction the executor returned. Sequential flow
//! (`next`, `recurse`, substacks) is data, not calls: executors return an
//! [`Outcome`] and the frame machinery performs it, pushing child frames
//! or — for a call in tail position — replacing the current frame so
//! unbounded chains like `forever` run in constant stack depth.

use std::collections::VecDeque;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::context::{ExecCtx, World};
use crate::error::ExecError;
use crate::loader::{Binding, NodeId, Program};
use crate::registry::ParamKind;
use crate::value::Value;
use crate::variables::VariableRef;

/// Iteration bound for a single [`Task::resume`] call.
///
/// A resume normally ends quickly at the next block boundary; only
/// runaway flow that never announces a step (an enormous repeat over an
/// empty substack, a degenerate plan) can spin, and this bound turns that
/// into an error instead of a hung engine.
pub const DEFAULT_ITERATION_LIMIT: usize = 100_000;

/// A block boundary announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub block_id: String,
    pub block_kind: String,
    /// Eager steps must not suspend the scheduler; non-eager steps wait in
    /// the step queue.
    pub eager: bool,
}

/// One composed argument as the executor sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// An immediate value, already resolved.
    Value(Value),
    /// The variable reference itself (reference-typed parameters).
    Ref(VariableRef),
    /// A substack handle; `None` is the empty (no-op) substack.
    Statement(Option<NodeId>),
    /// An unevaluated expression (lazy parameters). Force it with
    /// [`Outcome::NeedArg`].
    Thunk(NodeId),
}

/// Named arguments for one block invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    entries: Vec<(String, Arg)>,
}

impl Args {
    /// Sets an argument, replacing any previous entry of the same name.
    pub fn set(&mut self, name: impl Into<String>, arg: Arg) {
        let name = name.into().to_lowercase();
        if let Some(entry) = self.entries.iter_mut().find(|(key, _)| *key == name) {
            entry.1 = arg;
        } else {
            self.entries.push((name, arg));
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, arg)| arg)
    }

    /// The resolved value of an argument, failing when it is absent or not
    /// an immediate value.
    pub fn value(&self, name: &str) -> Result<&Value, ExecError> {
        match self.get(name) {
            Some(Arg::Value(value)) => Ok(value),
            Some(_) => Err(ExecError::execution(format!("argument '{name}' is not a value"))),
            None => Err(ExecError::execution(format!("missing argument '{name}'"))),
        }
    }

    /// The resolved value of a lazy argument, or `None` while it is still
    /// an unevaluated thunk.
    #[must_use]
    pub fn forced(&self, name: &str) -> Option<&Value> {
        match self.get(name) {
            Some(Arg::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn num(&self, name: &str) -> Result<f64, ExecError> {
        self.value(name)?.as_num()
    }

    pub fn int(&self, name: &str) -> Result<i64, ExecError> {
        self.value(name)?.as_int()
    }

    pub fn text(&self, name: &str) -> Result<String, ExecError> {
        Ok(self.value(name)?.to_text())
    }

    pub fn truthy(&self, name: &str) -> Result<bool, ExecError> {
        Ok(self.value(name)?.truthy())
    }

    /// The variable reference bound to a reference-typed parameter.
    pub fn reference(&self, name: &str) -> Result<&VariableRef, ExecError> {
        match self.get(name) {
            Some(Arg::Ref(var_ref)) => Ok(var_ref),
            Some(_) => Err(ExecError::execution(format!(
                "argument '{name}' is not a variable reference"
            ))),
            None => Err(ExecError::execution(format!("missing argument '{name}'"))),
        }
    }
}

/// One step of an executor's flow plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    /// Run the named substack argument once.
    Substack(&'static str),
    /// Run the named substack argument the given number of times.
    SubstackRepeat(&'static str, u64),
    /// Run this block's successor.
    Next,
    /// Re-invoke this block (fresh argument resolution).
    Recurse,
}

/// What a block executor tells the task machinery to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// An expression result, delivered to the consuming argument slot.
    Value(Value),
    /// The chain ends here (`stop`, event registrations).
    Done,
    /// Perform these calls in order, then finish the invocation.
    Run(SmallVec<[Call; 4]>),
    /// Evaluate the named lazy argument, then invoke this executor again.
    NeedArg(&'static str),
}

impl Outcome {
    /// Plan that just proceeds to the successor block.
    #[must_use]
    pub fn next() -> Self {
        Self::Run(SmallVec::from_slice(&[Call::Next]))
    }

    /// Plan from a call slice.
    #[must_use]
    pub fn run(calls: &[Call]) -> Self {
        Self::Run(SmallVec::from_slice(calls))
    }

    /// Expression result shorthand.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }
}

/// Seed for a new task: which block to run and with what eagerness.
///
/// Event listeners return these; the scheduler turns them into tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpawn {
    pub node: NodeId,
    pub eager: bool,
    /// Argument overrides applied on top of the block's cached bindings.
    pub extra: Vec<(String, Arg)>,
}

impl TaskSpawn {
    #[must_use]
    pub fn new(node: NodeId, eager: bool) -> Self {
        Self {
            node,
            eager,
            extra: Vec::new(),
        }
    }
}

/// Stack mutation decided by [`Task::advance_top`], applied by the resume
/// loop once the top-frame borrow has ended.
enum Advance {
    Yield(Step),
    Push(NodeId, bool),
    Replace(NodeId, bool),
    FinishTop(Value),
    Continue,
}

/// Result of one resume tick.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TaskState {
    /// The task crossed a block boundary and suspended.
    Yielded(Step),
    /// The task's chain completed.
    Finished,
}

#[derive(Debug)]
enum Phase {
    /// Announce the step for this block.
    Start,
    /// Compose arguments and evaluate pending expression arguments.
    Resolving,
    /// A child frame is computing the named argument.
    AwaitingArg(String),
    /// Call the executor.
    Invoke,
    /// Drive the executor's plan.
    Plan {
        calls: SmallVec<[Call; 4]>,
        idx: usize,
    },
}

#[derive(Debug)]
struct Frame {
    node: NodeId,
    /// Eagerness hint of this invocation (not including `can_run`).
    eager: bool,
    phase: Phase,
    args: Args,
    composed: bool,
    pending: VecDeque<(String, NodeId)>,
    extra: Vec<(String, Arg)>,
}

impl Frame {
    fn new(node: NodeId, eager: bool) -> Self {
        Self::with_extra(node, eager, Vec::new())
    }

    fn with_extra(node: NodeId, eager: bool, extra: Vec<(String, Arg)>) -> Self {
        Self {
            node,
            eager,
            phase: Phase::Start,
            args: Args::default(),
            composed: false,
            pending: VecDeque::new(),
            extra,
        }
    }
}

/// A cooperative computation over one chain of blocks.
pub(crate) struct Task {
    program: Arc<Program>,
    frames: Vec<Frame>,
    root: NodeId,
    iteration_limit: usize,
}

impl Task {
    pub fn new(program: Arc<Program>, spawn: TaskSpawn) -> Self {
        Self {
            frames: vec![Frame::with_extra(spawn.node, spawn.eager, spawn.extra)],
            program,
            root: spawn.node,
            iteration_limit: DEFAULT_ITERATION_LIMIT,
        }
    }

    /// The block id of the task's root node.
    pub fn root_id(&self) -> &str {
        &self.program.node(self.root).id
    }

    /// Runs until the next block boundary.
    ///
    /// An `Err` terminates the task; the scheduler publishes it on the
    /// `"error"` topic and drops the task without affecting its siblings.
    pub fn resume(&mut self, world: &mut World<'_>) -> Result<TaskState, ExecError> {
        let program = Arc::clone(&self.program);
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            if iterations > self.iteration_limit {
                return Err(ExecError::IterationLimit {
                    limit: self.iteration_limit,
                });
            }
            if self.frames.is_empty() {
                return Ok(TaskState::Finished);
            }
            // Work out what the top frame wants with the frame borrowed,
            // then apply any stack mutation afterwards.
            match self.advance_top(&program, world)? {
                Advance::Yield(step) => return Ok(TaskState::Yielded(step)),
                Advance::Push(target, eager) => self.frames.push(Frame::new(target, eager)),
                Advance::Replace(target, eager) => {
                    let top = self.frames.len() - 1;
                    self.frames[top] = Frame::new(target, eager);
                }
                Advance::FinishTop(value) => self.finish_top(value),
                Advance::Continue => {}
            }
        }
    }

    /// Runs the top frame's current phase. Stack mutations are returned as
    /// an [`Advance`] so the caller can apply them once the frame borrow
    /// ends.
    fn advance_top(&mut self, program: &Program, world: &mut World<'_>) -> Result<Advance, ExecError> {
        let frame = self.frames.last_mut().expect("advance_top on empty stack");
        let node = program.node(frame.node);
        let definition = world
            .registry
            .lookup(&node.kind)
            .map_err(|err| ExecError::execution(err.to_string()))?;

        match &mut frame.phase {
            Phase::Start => {
                let step = Step {
                    block_id: node.id.clone(),
                    block_kind: node.kind.clone(),
                    eager: frame.eager || definition.can_run,
                };
                frame.phase = Phase::Resolving;
                Ok(Advance::Yield(step))
            }
            Phase::Resolving => {
                if !frame.composed {
                    frame.composed = true;
                    for (name, binding) in &node.bindings {
                        let arg = match binding {
                            Binding::Literal(value) => Arg::Value(value.clone()),
                            Binding::Variable(var_ref) => {
                                if definition.is_reference_param(name) {
                                    Arg::Ref(var_ref.clone())
                                } else {
                                    Arg::Value(world.variables.get(var_ref)?)
                                }
                            }
                            Binding::Expression(target) => {
                                if definition.param_kind(name) == Some(ParamKind::Lazy) {
                                    Arg::Thunk(*target)
                                } else {
                                    frame.pending.push_back((name.clone(), *target));
                                    continue;
                                }
                            }
                            Binding::Statement(substack) => Arg::Statement(*substack),
                        };
                        frame.args.set(name.clone(), arg);
                    }
                    for param in &definition.params {
                        let pending = frame.pending.iter().any(|(name, _)| *name == param.name);
                        if frame.args.get(&param.name).is_none() && !pending {
                            match param.kind {
                                ParamKind::Statement => {
                                    frame.args.set(param.name.clone(), Arg::Statement(None));
                                }
                                ParamKind::Value | ParamKind::Lazy => {
                                    frame
                                        .args
                                        .set(param.name.clone(), Arg::Value(Value::Str(String::new())));
                                }
                                ParamKind::Reference => {}
                            }
                        }
                    }
                    for (name, arg) in std::mem::take(&mut frame.extra) {
                        frame.args.set(name, arg);
                    }
                }
                if let Some((name, target)) = frame.pending.pop_front() {
                    frame.phase = Phase::AwaitingArg(name);
                    Ok(Advance::Push(target, true))
                } else {
                    frame.phase = Phase::Invoke;
                    Ok(Advance::Continue)
                }
            }
            Phase::AwaitingArg(name) => {
                // Only reachable if a child frame vanished without
                // delivering, which would be a machinery bug.
                let name = name.clone();
                Err(ExecError::InvalidStep(format!(
                    "argument '{name}' was never delivered"
                )))
            }
            Phase::Invoke => {
                let eager = frame.eager;
                let node_id = frame.node;
                let outcome = {
                    let mut ctx = ExecCtx {
                        variables: &mut *world.variables,
                        bus: &mut *world.bus,
                        plugins: &mut *world.plugins,
                        tracer: &mut *world.tracer,
                        node,
                        node_id,
                        eager,
                    };
                    (definition.executor)(&mut ctx, &frame.args)?
                };
                match outcome {
                    Outcome::Value(value) => Ok(Advance::FinishTop(value)),
                    Outcome::Done => Ok(Advance::FinishTop(Value::Null)),
                    Outcome::Run(calls) => {
                        frame.phase = Phase::Plan { calls, idx: 0 };
                        Ok(Advance::Continue)
                    }
                    Outcome::NeedArg(name) => match frame.args.get(name) {
                        Some(Arg::Thunk(target)) => {
                            let target = *target;
                            frame.phase = Phase::AwaitingArg(name.to_owned());
                            Ok(Advance::Push(target, true))
                        }
                        _ => Err(ExecError::InvalidStep(format!(
                            "argument '{name}' cannot be forced"
                        ))),
                    },
                }
            }
            Phase::Plan { calls, idx } => {
                if *idx >= calls.len() {
                    return Ok(Advance::FinishTop(Value::Null));
                }
                let call = calls[*idx];
                let last = *idx + 1 == calls.len();
                let eager = frame.eager;
                let (target, advance) = match call {
                    Call::Next => (node.next, true),
                    Call::Recurse => (Some(frame.node), true),
                    Call::Substack(name) => (substack_target(&frame.args, name)?, true),
                    Call::SubstackRepeat(_, 0) => (None, true),
                    Call::SubstackRepeat(name, remaining) => {
                        let target = substack_target(&frame.args, name)?;
                        calls[*idx] = Call::SubstackRepeat(name, remaining - 1);
                        (target, remaining == 1)
                    }
                };
                if advance {
                    *idx += 1;
                }
                match target {
                    None => Ok(Advance::Continue),
                    // Tail position: nothing left to do in this frame, so
                    // the call replaces it instead of stacking on it.
                    Some(target) if advance && last => Ok(Advance::Replace(target, eager)),
                    Some(target) => Ok(Advance::Push(target, eager)),
                }
            }
        }
    }

    /// Pops the finished top frame, delivering its value to the parent.
    fn finish_top(&mut self, value: Value) {
        self.frames.pop();
        if let Some(parent) = self.frames.last_mut() {
            if let Phase::AwaitingArg(name) = &parent.phase {
                let name = name.clone();
                parent.args.set(name, Arg::Value(value));
                parent.phase = Phase::Resolving;
            }
            // A parent mid-plan discards the child's value.
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("root", &self.root)
            .field("frames", &self.frames.len())
            .finish()
    }
}

fn substack_target(args: &Args, name: &str) -> Result<Option<NodeId>, ExecError> {
    match args.get(name) {
        Some(Arg::Statement(substack)) => Ok(*substack),
        _ => Err(ExecError::InvalidStep(format!(
            "argument '{name}' is not a statement"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::plugin::PluginSet;
    use crate::registry::Registry;
    use crate::tracer::NoopTracer;
    use crate::variables::VariableStore;

    struct Harness {
        registry: Registry,
        variables: VariableStore,
        bus: EventBus,
        plugins: PluginSet,
        tracer: NoopTracer,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Registry::with_defaults(),
                variables: VariableStore::with_core_handlers(),
                bus: EventBus::new(),
                plugins: PluginSet::default(),
                tracer: NoopTracer,
            }
        }

        fn program(&self, xml: &str) -> Arc<Program> {
            Arc::new(Program::parse(xml, &self.registry).unwrap())
        }

        fn resume(&mut self, task: &mut Task) -> Result<TaskState, ExecError> {
            let mut world = World {
                registry: &self.registry,
                variables: &mut self.variables,
                bus: &mut self.bus,
                plugins: &mut self.plugins,
                tracer: &mut self.tracer,
            };
            task.resume(&mut world)
        }

        /// Drives a task to completion, collecting the steps it yields.
        fn drain(&mut self, task: &mut Task) -> Result<Vec<Step>, ExecError> {
            let mut steps = Vec::new();
            loop {
                match self.resume(task)? {
                    TaskState::Yielded(step) => steps.push(step),
                    TaskState::Finished => return Ok(steps),
                }
            }
        }
    }

    #[test]
    fn steps_follow_preorder_traversal() {
        let mut harness = Harness::new();
        let program = harness.program(
            r#"<xml>
                <block type="operator_add" id="root">
                    <value name="OPERAND1"><block type="operator_add" id="inner">
                        <value name="OPERAND1"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
                        <value name="OPERAND2"><shadow type="math_number"><field name="NUM">2</field></shadow></value>
                    </block></value>
                    <value name="OPERAND2"><shadow type="math_number"><field name="NUM">3</field></shadow></value>
                </block>
            </xml>"#,
        );
        let mut task = Task::new(Arc::clone(&program), TaskSpawn::new(program.roots()[0], true));
        let steps = harness.drain(&mut task).unwrap();
        let ids: Vec<&str> = steps.iter().map(|s| s.block_id.as_str()).collect();
        assert_eq!(ids, vec!["root", "inner"]);
        assert!(steps.iter().all(|s| s.eager));
    }

    #[test]
    fn statement_chain_steps_in_order() {
        let mut harness = Harness::new();
        let program = harness.program(
            r#"<xml>
                <variables><variable id="v" type="">x</variable></variables>
                <block type="data_setvariableto" id="a">
                    <field name="VARIABLE" id="v"></field>
                    <value name="VALUE"><shadow type="text"><field name="TEXT">1</field></shadow></value>
                    <next><block type="data_setvariableto" id="b">
                        <field name="VARIABLE" id="v"></field>
                        <value name="VALUE"><shadow type="text"><field name="TEXT">2</field></shadow></value>
                    </block></next>
                </block>
            </xml>"#,
        );
        harness.variables.load_declarations(program.variables());
        let mut task = Task::new(Arc::clone(&program), TaskSpawn::new(program.roots()[0], true));
        let steps = harness.drain(&mut task).unwrap();
        let ids: Vec<&str> = steps.iter().map(|s| s.block_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(
            harness.variables.get(&VariableRef::scalar("v")).unwrap(),
            Value::Str("2".into())
        );
    }

    #[test]
    fn lazy_condition_reevaluates_per_recursion() {
        // repeat_until counts x up to 3: the condition thunk must be
        // re-forced on every recursion.
        let mut harness = Harness::new();
        let program = harness.program(
            r#"<xml>
                <variables><variable id="v" type="">x</variable></variables>
                <block type="control_repeat_until" id="loop">
                    <value name="CONDITION"><block type="operator_equals" id="cmp">
                        <value name="OPERAND1"><block type="data_variable" id="read">
                            <field name="VARIABLE" id="v"></field>
                        </block></value>
                        <value name="OPERAND2"><shadow type="math_number"><field name="NUM">3</field></shadow></value>
                    </block></value>
                    <statement name="SUBSTACK"><block type="data_changevariableby" id="inc">
                        <field name="VARIABLE" id="v"></field>
                        <value name="VALUE"><shadow type="math_number"><field name="NUM">1</field></shadow></value>
                    </block></statement>
                </block>
            </xml>"#,
        );
        harness.variables.load_declarations(program.variables());
        let mut task = Task::new(Arc::clone(&program), TaskSpawn::new(program.roots()[0], true));
        harness.drain(&mut task).unwrap();
        assert_eq!(
            harness.variables.get(&VariableRef::scalar("v")).unwrap(),
            Value::Num(3.0)
        );
    }

    #[test]
    fn runaway_plan_trips_iteration_limit() {
        let mut harness = Harness::new();
        let program = harness.program(
            r#"<xml>
                <block type="control_repeat" id="spin">
                    <value name="TIMES"><shadow type="math_number"><field name="NUM">200000</field></shadow></value>
                    <statement name="SUBSTACK"></statement>
                </block>
            </xml>"#,
        );
        let mut task = Task::new(Arc::clone(&program), TaskSpawn::new(program.roots()[0], true));
        let err = harness.drain(&mut task).unwrap_err();
        assert!(matches!(err, ExecError::IterationLimit { .. }));
    }

    #[test]
    fn forever_runs_in_constant_frame_depth() {
        let mut harness = Harness::new();
        let program = harness.program(
            r#"<xml>
                <block type="control_forever" id="spin">
                    <statement name="SUBSTACK"><block type="data_setvariableto" id="body">
                        <field name="VARIABLE" id="v" variabletype=""></field>
                        <value name="VALUE"><shadow type="text"><field name="TEXT">x</field></shadow></value>
                    </block></statement>
                </block>
            </xml>"#,
        );
        harness
            .variables
            .load_declarations(&[crate::variables::VariableDecl {
                id: "v".into(),
                type_tag: String::new(),
                name: "v".into(),
            }]);
        let mut task = Task::new(Arc::clone(&program), TaskSpawn::new(program.roots()[0], false));
        for _ in 0..200 {
            match harness.resume(&mut task).unwrap() {
                TaskState::Yielded(_) => {}
                TaskState::Finished => panic!("forever must not finish"),
            }
        }
        assert!(task.frames.len() <= 3, "frame depth grew: {}", task.frames.len());
    }

    #[test]
    fn missing_substack_argument_is_invalid_step() {
        let mut harness = Harness::new();
        harness.registry.register(crate::registry::BlockDefinition::new(
            "demo_broken_plan",
            |_, _| Ok(Outcome::run(&[Call::Substack("nope")])),
        ));
        let program = harness.program(r#"<xml><block type="demo_broken_plan" id="x"></block></xml>"#);
        let mut task = Task::new(Arc::clone(&program), TaskSpawn::new(program.roots()[0], true));
        let err = harness.drain(&mut task).unwrap_err();
        assert!(matches!(err, ExecError::InvalidStep(_)));
    }
}
