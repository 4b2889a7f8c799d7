//! Runtime values produced and consumed by block executors.
//!
//! Block programs only ever move numbers, text, booleans and lists around,
//! so the value model is a small tagged enum with structural equality.
//! Coercions follow the editor's conventions: arithmetic coerces to 64-bit
//! floats (failing on non-numeric text), truthiness treats empty/zero
//! values as false, and stringification renders integral floats without a
//! trailing `.0`.

use std::fmt;

use crate::error::ExecError;

/// A runtime value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// The absent value; produced by statement blocks and empty fields.
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Coerces to a 64-bit float.
    ///
    /// Numbers pass through, booleans map to 0/1, and text is parsed.
    /// Anything else (or non-numeric text) is an execution error, mirroring
    /// the editor's behavior of failing arithmetic on junk input.
    pub fn as_num(&self) -> Result<f64, ExecError> {
        match self {
            Self::Num(n) => Ok(*n),
            Self::Bool(b) => Ok(f64::from(u8::from(*b))),
            Self::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| ExecError::execution(format!("could not convert '{s}' to a number"))),
            other => Err(ExecError::execution(format!(
                "could not convert {} to a number",
                other.kind_name()
            ))),
        }
    }

    /// Coerces to an integer via [`Self::as_num`], truncating toward zero.
    pub fn as_int(&self) -> Result<i64, ExecError> {
        Ok(self.as_num()? as i64)
    }

    /// Truthiness: `Null`, `false`, `0`, the empty string and the empty
    /// list are false; everything else is true.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Num(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }

    /// Standard stringification, used by the string operators and `print`.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Num(n) => format_num(*n),
            Self::Str(s) => s.clone(),
            Self::List(items) => {
                let mut out = String::from("[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&item.to_text());
                }
                out.push(']');
                out
            }
        }
    }

    /// Borrows the value as a list, or fails when it is not one.
    pub fn as_list(&self) -> Result<&[Value], ExecError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(ExecError::execution(format!(
                "expected a list, found {}",
                other.kind_name()
            ))),
        }
    }

    /// Converts into an owned list: lists pass through, strings split into
    /// one-character items (how the editor treats a scalar used as a list),
    /// anything else is an error.
    pub fn into_list(self) -> Result<Vec<Value>, ExecError> {
        match self {
            Self::List(items) => Ok(items),
            Self::Str(s) => Ok(s.chars().map(|c| Self::Str(c.to_string())).collect()),
            other => Err(ExecError::execution(format!(
                "expected a list, found {}",
                other.kind_name()
            ))),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "nothing",
            Self::Bool(_) => "a boolean",
            Self::Num(_) => "a number",
            Self::Str(_) => "text",
            Self::List(_) => "a list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// Renders a float the way the editor displays it: integral values drop
/// the fractional part, everything else uses the shortest round-trip form.
fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::Num(2.5).as_num().unwrap(), 2.5);
        assert_eq!(Value::Str(" 3 ".into()).as_num().unwrap(), 3.0);
        assert_eq!(Value::Bool(true).as_num().unwrap(), 1.0);
        assert!(Value::Str("abc".into()).as_num().is_err());
        assert!(Value::List(vec![]).as_num().is_err());
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Num(0.0).truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(!Value::List(vec![]).truthy());
        assert!(Value::Num(-1.0).truthy());
        assert!(Value::Str("false?".into()).truthy());
    }

    #[test]
    fn text_rendering_drops_integral_fraction() {
        assert_eq!(Value::Num(3.0).to_text(), "3");
        assert_eq!(Value::Num(3.25).to_text(), "3.25");
        assert_eq!(Value::List(vec![Value::Num(1.0), Value::Str("a".into())]).to_text(), "[1, a]");
    }

    #[test]
    fn string_used_as_list_splits_into_chars() {
        let items = Value::Str("ab".into()).into_list().unwrap();
        assert_eq!(items, vec![Value::Str("a".into()), Value::Str("b".into())]);
    }
}
