//! Numeric extension blocks.

use crate::metadata::{VisualArg, VisualDefinition};
use crate::registry::{BlockDefinition, ParamSpec, Registry};
use crate::task::Outcome;

const OPERATOR_COLOUR: &str = "#59C059";

pub fn register(registry: &mut Registry) {
    registry.register(
        BlockDefinition::new("numbers_isnumeric", |_ctx, args| {
            Ok(Outcome::value(args.value("value")?.as_num().is_ok()))
        })
        .category("operators")
        .params(vec![ParamSpec::value("value")])
        .visual(
            VisualDefinition::new("is %1 numeric")
                .colour(OPERATOR_COLOUR)
                .args(vec![VisualArg::value("VALUE")])
                .extension("output_boolean"),
        ),
    );
}
