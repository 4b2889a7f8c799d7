//! I/O blocks.
//!
//! The engine has no output device of its own; `print` publishes on the
//! `"print"` topic and the transport decides where that text goes.

use crate::metadata::{VisualArg, VisualDefinition};
use crate::registry::{BlockDefinition, ParamSpec, Registry};
use crate::task::Outcome;

const COLOUR: u16 = 200;

pub fn register(registry: &mut Registry) {
    registry.register(
        BlockDefinition::new("io_print", |ctx, args| {
            let message = args.text("message")?;
            ctx.broadcast("print", &message);
            Ok(Outcome::next())
        })
        .category("io")
        .params(vec![ParamSpec::value("message")])
        .visual(
            VisualDefinition::new("Print %1")
                .colour(COLOUR)
                .args(vec![VisualArg::value("MESSAGE")])
                .statement_connectors(),
        ),
    );
}
