//! Operator blocks: arithmetic, comparison, boolean, string and the
//! multiplexed math table.
//!
//! Arithmetic and comparison coerce both operands to 64-bit floats, so
//! comparing non-numeric text is an execution error rather than a string
//! comparison. Trigonometry works in radians. `round` rounds ties to even.

use std::str::FromStr;

use rand::Rng;
use strum::EnumString;

use crate::error::ExecError;
use crate::registry::{BlockDefinition, ParamSpec, Registry};
use crate::task::Outcome;

/// Operations understood by `operator_mathop`, keyed by the editor's
/// dropdown strings (note the spaces in `"e ^"` and `"10 ^"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
enum MathOp {
    #[strum(serialize = "abs")]
    Abs,
    #[strum(serialize = "floor")]
    Floor,
    #[strum(serialize = "ceiling")]
    Ceiling,
    #[strum(serialize = "sqrt")]
    Sqrt,
    #[strum(serialize = "sin")]
    Sin,
    #[strum(serialize = "cos")]
    Cos,
    #[strum(serialize = "tan")]
    Tan,
    #[strum(serialize = "asin")]
    Asin,
    #[strum(serialize = "acos")]
    Acos,
    #[strum(serialize = "atan")]
    Atan,
    #[strum(serialize = "ln")]
    Ln,
    #[strum(serialize = "log")]
    Log,
    #[strum(serialize = "e ^")]
    Exp,
    #[strum(serialize = "10 ^")]
    Pow10,
}

fn domain_error() -> ExecError {
    ExecError::execution("math domain error")
}

fn apply_mathop(op: MathOp, num: f64) -> Result<f64, ExecError> {
    match op {
        MathOp::Abs => Ok(num.abs()),
        MathOp::Floor => Ok(num.floor()),
        MathOp::Ceiling => Ok(num.ceil()),
        MathOp::Sqrt => {
            if num < 0.0 {
                return Err(domain_error());
            }
            Ok(num.sqrt())
        }
        MathOp::Sin => Ok(num.sin()),
        MathOp::Cos => Ok(num.cos()),
        MathOp::Tan => Ok(num.tan()),
        MathOp::Asin => {
            if !(-1.0..=1.0).contains(&num) {
                return Err(domain_error());
            }
            Ok(num.asin())
        }
        MathOp::Acos => {
            if !(-1.0..=1.0).contains(&num) {
                return Err(domain_error());
            }
            Ok(num.acos())
        }
        MathOp::Atan => Ok(num.atan()),
        MathOp::Ln => {
            if num <= 0.0 {
                return Err(domain_error());
            }
            Ok(num.ln())
        }
        MathOp::Log => {
            if num <= 0.0 {
                return Err(domain_error());
            }
            Ok(num.log10())
        }
        MathOp::Exp => Ok(num.exp()),
        MathOp::Pow10 => Ok(10f64.powf(num)),
    }
}

fn binary_params() -> Vec<ParamSpec> {
    vec![ParamSpec::value("operand1"), ParamSpec::value("operand2")]
}

pub fn register(registry: &mut Registry) {
    registry.register(
        BlockDefinition::new("operator_add", |_ctx, args| {
            Ok(Outcome::value(args.num("operand1")? + args.num("operand2")?))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_subtract", |_ctx, args| {
            Ok(Outcome::value(args.num("operand1")? - args.num("operand2")?))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_multiply", |_ctx, args| {
            Ok(Outcome::value(args.num("operand1")? * args.num("operand2")?))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_divide", |_ctx, args| {
            let lhs = args.num("operand1")?;
            let rhs = args.num("operand2")?;
            if rhs == 0.0 {
                return Err(ExecError::execution("float division by zero"));
            }
            Ok(Outcome::value(lhs / rhs))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_mod", |_ctx, args| {
            let lhs = args.num("operand1")?;
            let rhs = args.num("operand2")?;
            if rhs == 0.0 {
                return Err(ExecError::execution("float modulo"));
            }
            // Sign follows the divisor.
            Ok(Outcome::value(lhs - rhs * (lhs / rhs).floor()))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_random", |_ctx, args| {
            let from = args.int("from")?;
            let to = args.int("to")?;
            if to <= from {
                return Err(ExecError::execution("empty range for random"));
            }
            let picked = rand::thread_rng().gen_range(from..to);
            Ok(Outcome::value(picked as f64))
        })
        .category("operators")
        .predefined()
        .params(vec![ParamSpec::value("from"), ParamSpec::value("to")]),
    );

    registry.register(
        BlockDefinition::new("operator_lt", |_ctx, args| {
            Ok(Outcome::value(args.num("operand1")? < args.num("operand2")?))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_equals", |_ctx, args| {
            Ok(Outcome::value(args.num("operand1")? == args.num("operand2")?))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_gt", |_ctx, args| {
            Ok(Outcome::value(args.num("operand1")? > args.num("operand2")?))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_round", |_ctx, args| {
            Ok(Outcome::value(args.num("value")?.round_ties_even()))
        })
        .category("operators")
        .predefined()
        .params(vec![ParamSpec::value("value")]),
    );

    registry.register(
        BlockDefinition::new("operator_and", |_ctx, args| {
            Ok(Outcome::value(args.truthy("operand1")? && args.truthy("operand2")?))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_or", |_ctx, args| {
            Ok(Outcome::value(args.truthy("operand1")? || args.truthy("operand2")?))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_not", |_ctx, args| {
            Ok(Outcome::value(!args.truthy("operand1")?))
        })
        .category("operators")
        .predefined()
        .params(vec![ParamSpec::value("operand1")]),
    );

    registry.register(
        BlockDefinition::new("operator_join", |_ctx, args| {
            let mut joined = args.text("operand1")?;
            joined.push_str(&args.text("operand2")?);
            Ok(Outcome::value(joined))
        })
        .category("operators")
        .predefined()
        .params(binary_params()),
    );

    registry.register(
        BlockDefinition::new("operator_letter_of", |_ctx, args| {
            let text = args.text("string")?;
            let chars: Vec<char> = text.chars().collect();
            let mut index = args.int("letter")?;
            if index < 0 {
                index += chars.len() as i64;
            }
            if index < 0 || index as usize >= chars.len() {
                return Err(ExecError::execution("string index out of range"));
            }
            Ok(Outcome::value(chars[index as usize].to_string()))
        })
        .category("operators")
        .predefined()
        .params(vec![ParamSpec::value("letter"), ParamSpec::value("string")]),
    );

    registry.register(
        BlockDefinition::new("operator_length", |_ctx, args| {
            Ok(Outcome::value(args.text("value")?.chars().count() as f64))
        })
        .category("operators")
        .predefined()
        .params(vec![ParamSpec::value("value")]),
    );

    registry.register(
        BlockDefinition::new("operator_contains", |_ctx, args| {
            let haystack = args.text("string1")?;
            let needle = args.text("string2")?;
            Ok(Outcome::value(haystack.contains(&needle)))
        })
        .category("operators")
        .predefined()
        .params(vec![ParamSpec::value("string1"), ParamSpec::value("string2")]),
    );

    registry.register(
        BlockDefinition::new("operator_mathop", |_ctx, args| {
            let name = args.text("operator")?;
            let op = MathOp::from_str(&name)
                .map_err(|_| ExecError::execution(format!("unknown math operation '{name}'")))?;
            Ok(Outcome::value(apply_mathop(op, args.num("num")?)?))
        })
        .category("operators")
        .predefined()
        .params(vec![ParamSpec::value("operator"), ParamSpec::value("num")]),
    );
}
