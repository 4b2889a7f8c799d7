//! Control-flow blocks.
//!
//! These blocks only describe flow: the task machinery performs the
//! substack/next/recurse calls they return. `wait` deliberately sleeps on
//! the engine thread — one program runs at a time and the editor's wait
//! block is expected to stall the whole program.
//!
//! The loop conditions (`wait_until`, `repeat_until`) are lazy parameters:
//! each invocation forces the condition expression once, and the recursion
//! that implements the loop re-resolves it on the next pass.

use std::thread;
use std::time::Duration;

use crate::registry::{BlockDefinition, ParamSpec, Registry};
use crate::task::{Call, Outcome};

pub fn register(registry: &mut Registry) {
    registry.register(
        BlockDefinition::new("control_wait", |_ctx, args| {
            let duration = args.num("duration")?;
            if duration > 0.0 {
                if let Ok(delay) = Duration::try_from_secs_f64(duration) {
                    thread::sleep(delay);
                }
            }
            Ok(Outcome::next())
        })
        .category("control")
        .predefined()
        .params(vec![ParamSpec::value("duration")]),
    );

    registry.register(
        BlockDefinition::new("control_repeat", |_ctx, args| {
            let times = args.num("times")?;
            let times = if times.is_finite() && times > 0.0 { times as u64 } else { 0 };
            Ok(Outcome::run(&[Call::SubstackRepeat("substack", times), Call::Next]))
        })
        .category("control")
        .predefined()
        .params(vec![ParamSpec::value("times"), ParamSpec::statement("substack")]),
    );

    registry.register(
        BlockDefinition::new("control_forever", |_ctx, _args| {
            Ok(Outcome::run(&[Call::Substack("substack"), Call::Recurse]))
        })
        .category("control")
        .predefined()
        .params(vec![ParamSpec::statement("substack")]),
    );

    registry.register(
        BlockDefinition::new("control_if", |_ctx, args| {
            if args.truthy("condition")? {
                Ok(Outcome::run(&[Call::Substack("substack"), Call::Next]))
            } else {
                Ok(Outcome::next())
            }
        })
        .category("control")
        .predefined()
        .params(vec![ParamSpec::value("condition"), ParamSpec::statement("substack")]),
    );

    registry.register(
        BlockDefinition::new("control_if_else", |_ctx, args| {
            let branch = if args.truthy("condition")? {
                Call::Substack("substack")
            } else {
                Call::Substack("substack2")
            };
            Ok(Outcome::run(&[branch, Call::Next]))
        })
        .category("control")
        .predefined()
        .params(vec![
            ParamSpec::value("condition"),
            ParamSpec::statement("substack"),
            ParamSpec::statement("substack2"),
        ]),
    );

    registry.register(
        BlockDefinition::new("control_wait_until", |_ctx, args| {
            match args.forced("condition") {
                None => Ok(Outcome::NeedArg("condition")),
                Some(condition) if condition.truthy() => Ok(Outcome::next()),
                Some(_) => Ok(Outcome::run(&[Call::Recurse])),
            }
        })
        .category("control")
        .predefined()
        .params(vec![ParamSpec::lazy("condition")]),
    );

    registry.register(
        BlockDefinition::new("control_repeat_until", |_ctx, args| {
            match args.forced("condition") {
                None => Ok(Outcome::NeedArg("condition")),
                Some(condition) if condition.truthy() => Ok(Outcome::next()),
                Some(_) => Ok(Outcome::run(&[Call::Substack("substack"), Call::Recurse])),
            }
        })
        .category("control")
        .predefined()
        .params(vec![ParamSpec::lazy("condition"), ParamSpec::statement("substack")]),
    );

    // Ends the chain by not scheduling a successor.
    registry.register(
        BlockDefinition::new("control_stop", |_ctx, _args| Ok(Outcome::Done))
            .category("control")
            .predefined(),
    );
}
