//! String extension blocks.
//!
//! These ship with visual definitions (they are not part of the editor's
//! predefined set) and render in the operators category. Substring
//! indices follow slice semantics: out-of-range bounds clamp, negative
//! bounds count from the end.

use crate::error::ExecError;
use crate::metadata::{VisualArg, VisualDefinition};
use crate::registry::{BlockDefinition, ParamSpec, Registry};
use crate::task::Outcome;
use crate::value::Value;

const OPERATOR_COLOUR: &str = "#59C059";

/// Slice of `text` by character positions; negatives count from the end,
/// out-of-range bounds clamp to the text.
fn slice_chars(text: &str, start: i64, end: i64) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;
    let clamp = |index: i64| {
        let index = if index < 0 { index + len } else { index };
        index.clamp(0, len) as usize
    };
    let (start, end) = (clamp(start), clamp(end));
    if start >= end {
        String::new()
    } else {
        chars[start..end].iter().collect()
    }
}

fn split_to_values(text: &str, separator: &str) -> Result<Vec<Value>, ExecError> {
    if separator.is_empty() {
        return Err(ExecError::execution("empty separator"));
    }
    Ok(text.split(separator).map(|part| Value::Str(part.to_owned())).collect())
}

pub fn register(registry: &mut Registry) {
    registry.register(
        BlockDefinition::new("string_trim", |_ctx, args| {
            Ok(Outcome::value(args.text("string")?.trim().to_owned()))
        })
        .category("operators")
        .params(vec![ParamSpec::value("string")])
        .visual(
            VisualDefinition::new("trim %1")
                .colour(OPERATOR_COLOUR)
                .args(vec![VisualArg::value("STRING")])
                .extension("output_string"),
        ),
    );

    registry.register(
        BlockDefinition::new("string_split", |_ctx, args| {
            let parts = split_to_values(&args.text("string")?, &args.text("chars")?)?;
            Ok(Outcome::Value(Value::List(parts)))
        })
        .category("operators")
        .params(vec![ParamSpec::value("string"), ParamSpec::value("chars")])
        .visual(
            VisualDefinition::new("split %1 on %2")
                .colour(OPERATOR_COLOUR)
                .args(vec![VisualArg::value("STRING"), VisualArg::value("CHARS")])
                .extension("output_string"),
        ),
    );

    registry.register(
        BlockDefinition::new("string_splitvar", |ctx, args| {
            let parts = split_to_values(&args.text("string")?, &args.text("chars")?)?;
            let var_ref = args.reference("variable")?.clone();
            ctx.set_variable(var_ref, Value::List(parts));
            Ok(Outcome::next())
        })
        .category("operators")
        .params(vec![
            ParamSpec::value("string"),
            ParamSpec::value("chars"),
            ParamSpec::reference("variable"),
        ])
        .visual(
            VisualDefinition::new("split %1 on %2 to %3")
                .colour(OPERATOR_COLOUR)
                .args(vec![
                    VisualArg::value("STRING"),
                    VisualArg::value("CHARS"),
                    VisualArg::variable("VARIABLE", &["list"]),
                ])
                .statement_connectors(),
        ),
    );

    registry.register(
        BlockDefinition::new("string_join", |ctx, args| {
            let var_ref = args.reference("variable")?.clone();
            let items = ctx.get_variable(&var_ref)?.into_list()?;
            let separator = args.text("chars")?;
            let joined = items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(&separator);
            // Writes the joined text back into the variable.
            ctx.set_variable(var_ref, Value::Str(joined));
            Ok(Outcome::next())
        })
        .category("operators")
        .params(vec![ParamSpec::reference("variable"), ParamSpec::value("chars")])
        .visual(
            VisualDefinition::new("join %1 with %2")
                .colour(OPERATOR_COLOUR)
                .args(vec![
                    VisualArg::variable("VARIABLE", &["list"]),
                    VisualArg::value("CHARS"),
                ])
                .extension("output_string"),
        ),
    );

    registry.register(
        BlockDefinition::new("string_newline", |_ctx, _args| Ok(Outcome::value("\n")))
            .category("operators")
            .visual(
                VisualDefinition::new("newline")
                    .colour(OPERATOR_COLOUR)
                    .extension("output_string"),
            ),
    );

    registry.register(
        BlockDefinition::new("string_substring", |_ctx, args| {
            let text = args.text("string")?;
            let start = args.int("start")?;
            let end = args.int("end")?;
            Ok(Outcome::value(slice_chars(&text, start, end)))
        })
        .category("operators")
        .params(vec![
            ParamSpec::value("start"),
            ParamSpec::value("end"),
            ParamSpec::value("string"),
        ])
        .visual(
            VisualDefinition::new("substring from %1 to %2 of %3")
                .colour(OPERATOR_COLOUR)
                .args(vec![
                    VisualArg::value("START"),
                    VisualArg::value("END"),
                    VisualArg::value("STRING"),
                ])
                .extension("output_string"),
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_clamps_and_wraps() {
        assert_eq!(slice_chars("hello", 1, 3), "el");
        assert_eq!(slice_chars("hello", 0, 99), "hello");
        assert_eq!(slice_chars("hello", -3, -1), "ll");
        assert_eq!(slice_chars("hello", 4, 2), "");
    }

    #[test]
    fn split_rejects_empty_separator() {
        assert!(split_to_values("a,b", "").is_err());
        let parts = split_to_values("a,b", ",").unwrap();
        assert_eq!(parts, vec![Value::Str("a".into()), Value::Str("b".into())]);
    }
}
