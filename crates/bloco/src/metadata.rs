//! Visual block definitions and the editor metadata export.
//!
//! Blocks that are not predefined by the editor carry a [`VisualDefinition`]
//! describing how the editor should render them: a title template, the
//! argument widgets, connector flags, colour and extensions. The export
//! turns those into the JSON shape the editor's block loader consumes.
//!
//! Title templates use `%<N>` placeholders and newlines: each line becomes
//! one `message{i}`, placeholders are renumbered left-to-right per line and
//! consume the declared arguments in order.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, json};

use crate::error::LoadError;
use crate::registry::BlockDefinition;

/// Block colour: either a Blockly hue (0-360) or a hex string.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Colour {
    Hue(u16),
    Hex(String),
}

impl Default for Colour {
    fn default() -> Self {
        Self::Hue(160)
    }
}

impl From<u16> for Colour {
    fn from(hue: u16) -> Self {
        Self::Hue(hue)
    }
}

impl From<&str> for Colour {
    fn from(hex: &str) -> Self {
        Self::Hex(hex.to_owned())
    }
}

/// One argument widget of a visual definition.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "type")]
pub enum VisualArg {
    /// Numeric entry field.
    #[serde(rename = "field_number")]
    Number {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        precision: Option<f64>,
    },
    /// Variable picker; marks the parameter as reference-typed.
    #[serde(rename = "field_variable")]
    Variable {
        name: String,
        #[serde(rename = "variableTypes", skip_serializing_if = "Option::is_none")]
        variable_types: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        variable: Option<String>,
    },
    /// Dropdown of `(label, value)` options.
    #[serde(rename = "field_dropdown")]
    Dropdown {
        name: String,
        options: Vec<(String, String)>,
    },
    /// Value input socket.
    #[serde(rename = "input_value")]
    Value { name: String },
    /// Substack socket.
    #[serde(rename = "input_statement")]
    Statement { name: String },
    /// Layout-only spacer.
    #[serde(rename = "input_dummy")]
    Dummy { name: String },
}

impl VisualArg {
    /// The argument's parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Number { name, .. }
            | Self::Variable { name, .. }
            | Self::Dropdown { name, .. }
            | Self::Value { name }
            | Self::Statement { name }
            | Self::Dummy { name } => name,
        }
    }

    /// Whether this widget denotes a variable reference.
    #[must_use]
    pub fn is_variable(&self) -> bool {
        matches!(self, Self::Variable { .. })
    }

    /// Shorthand for a plain value input.
    pub fn value(name: impl Into<String>) -> Self {
        Self::Value { name: name.into() }
    }

    /// Shorthand for a substack input.
    pub fn statement(name: impl Into<String>) -> Self {
        Self::Statement { name: name.into() }
    }

    /// Shorthand for a variable picker restricted to the given type tags.
    pub fn variable(name: impl Into<String>, variable_types: &[&str]) -> Self {
        Self::Variable {
            name: name.into(),
            variable_types: if variable_types.is_empty() {
                None
            } else {
                Some(variable_types.iter().map(|&t| t.to_owned()).collect())
            },
            variable: None,
        }
    }
}

/// Editor-facing description of a block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisualDefinition {
    /// Title template; `%<N>` placeholders, newline-separated messages.
    pub title: String,
    pub colour: Colour,
    /// Arguments in declaration order; placeholders consume them in order.
    pub args: Vec<VisualArg>,
    pub has_previous_statement: bool,
    pub has_next_statement: bool,
    /// Output type constraint, e.g. `"String"`.
    pub output: Option<String>,
    /// Editor output shape code.
    pub output_shape: Option<u8>,
    /// Editor extensions, e.g. `"output_string"`.
    pub extensions: Vec<String>,
}

impl VisualDefinition {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn colour(mut self, colour: impl Into<Colour>) -> Self {
        self.colour = colour.into();
        self
    }

    #[must_use]
    pub fn args(mut self, args: Vec<VisualArg>) -> Self {
        self.args = args;
        self
    }

    /// Marks the block as a statement with both connectors.
    #[must_use]
    pub fn statement_connectors(mut self) -> Self {
        self.has_previous_statement = true;
        self.has_next_statement = true;
        self
    }

    #[must_use]
    pub fn extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%\d+").unwrap())
}

/// Builds the editor metadata for one block definition.
///
/// Returns `None` for predefined blocks and blocks without a visual
/// definition — the editor already knows those. Fails with
/// [`LoadError::MalformedDefinition`] when the title has more placeholders
/// than declared arguments.
pub fn block_metadata(def: &BlockDefinition) -> Result<Option<serde_json::Value>, LoadError> {
    if def.is_predefined {
        return Ok(None);
    }
    let Some(visual) = &def.visual else {
        return Ok(None);
    };

    let mut out = Map::new();
    out.insert("colour".into(), json!(visual.colour));

    let mut remaining = visual.args.iter();
    for (i, line) in visual.title.split('\n').enumerate() {
        let mut line_args = Vec::new();
        let mut message = String::new();
        let mut cursor = 0;
        for m in placeholder_pattern().find_iter(line) {
            let arg = remaining.next().ok_or_else(|| {
                LoadError::MalformedDefinition(format!(
                    "too few arguments found for block '{}'",
                    def.kind
                ))
            })?;
            line_args.push(arg);
            message.push_str(&line[cursor..m.start()]);
            message.push('%');
            message.push_str(&line_args.len().to_string());
            cursor = m.end();
        }
        message.push_str(&line[cursor..]);
        out.insert(format!("message{i}"), json!(message));
        out.insert(format!("args{i}"), json!(line_args));
    }

    if visual.has_previous_statement {
        out.insert("previousStatement".into(), serde_json::Value::Null);
    }
    if visual.has_next_statement {
        out.insert("nextStatement".into(), serde_json::Value::Null);
    }
    if let Some(shape) = visual.output_shape {
        out.insert("outputShape".into(), json!(shape));
    }
    if let Some(output) = &visual.output {
        out.insert("output".into(), json!(output));
    }
    if !visual.extensions.is_empty() {
        out.insert("extensions".into(), json!(visual.extensions));
    }
    Ok(Some(serde_json::Value::Object(out)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::BlockDefinition;
    use crate::task::Outcome;

    fn visible_block(title: &str, args: Vec<VisualArg>) -> BlockDefinition {
        BlockDefinition::new("demo_block", |_, _| Ok(Outcome::Done))
            .visual(VisualDefinition::new(title).args(args))
    }

    #[test]
    fn placeholders_renumber_per_line() {
        let def = visible_block(
            "take %1 and %2\nthen %3",
            vec![
                VisualArg::value("A"),
                VisualArg::value("B"),
                VisualArg::value("C"),
            ],
        );
        let meta = block_metadata(&def).unwrap().unwrap();
        assert_eq!(meta["message0"], "take %1 and %2");
        assert_eq!(meta["message1"], "then %1");
        assert_eq!(meta["args0"].as_array().unwrap().len(), 2);
        assert_eq!(meta["args1"].as_array().unwrap().len(), 1);
        assert_eq!(meta["args1"][0]["name"], "C");
    }

    #[test]
    fn too_few_arguments_is_malformed() {
        let def = visible_block("join %1 with %2", vec![VisualArg::value("A")]);
        let err = block_metadata(&def).unwrap_err();
        assert!(matches!(err, LoadError::MalformedDefinition(_)));
    }

    #[test]
    fn predefined_blocks_export_nothing() {
        let def = BlockDefinition::new("control_if", |_, _| Ok(Outcome::Done)).predefined();
        assert_eq!(block_metadata(&def).unwrap(), None);
    }
}
