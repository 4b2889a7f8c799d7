//! Typed program variables and their default-value handlers.
//!
//! A variable is addressed by a [`VariableRef`] — the pair of its editor
//! type tag and its stable id. The store keeps values and display names in
//! declaration order so the status serialization matches the editor's
//! variable panel. Default values for known type tags come from
//! [`VariableHandler`] implementations; unknown tags fall back to storing
//! the element text as a plain scalar.

use indexmap::IndexMap;

use crate::value::Value;

/// Type tag of plain scalar variables.
pub const SCALAR_TYPE: &str = "";
/// Type tag of list variables.
pub const LIST_TYPE: &str = "list";
/// Type tag of broadcast channels; the stored value is the channel's
/// human-readable name.
pub const BROADCAST_TYPE: &str = "broadcast_msg";

/// Reference to a program variable: `(type tag, id)`.
///
/// Equality is structural; two refs with the same tag and id address the
/// same slot regardless of where they were parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct VariableRef {
    /// Editor type tag; empty for plain scalars.
    pub type_tag: String,
    /// Stable variable id from the program XML.
    pub id: String,
}

impl VariableRef {
    pub fn new(type_tag: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            id: id.into(),
        }
    }

    /// Plain scalar ref (empty type tag).
    pub fn scalar(id: impl Into<String>) -> Self {
        Self::new(SCALAR_TYPE, id)
    }
}

/// One `<variable>` declaration from the program's `<variables>` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDecl {
    pub id: String,
    pub type_tag: String,
    /// Element text: the display name.
    pub name: String,
}

impl VariableDecl {
    /// The ref this declaration creates.
    #[must_use]
    pub fn to_ref(&self) -> VariableRef {
        VariableRef::new(self.type_tag.clone(), self.id.clone())
    }
}

/// Supplies the initial value for variables of one type tag.
pub trait VariableHandler: Send + Sync {
    /// The type tag this handler covers.
    fn type_name(&self) -> &str;

    /// Initial value for a declaration of this type.
    fn default_value(&self, decl: &VariableDecl) -> Value;
}

/// Plain scalars start at zero.
#[derive(Debug, Default)]
pub struct ScalarVariableHandler;

impl VariableHandler for ScalarVariableHandler {
    fn type_name(&self) -> &str {
        SCALAR_TYPE
    }

    fn default_value(&self, _decl: &VariableDecl) -> Value {
        Value::Num(0.0)
    }
}

/// Broadcast channels store their own display name.
#[derive(Debug, Default)]
pub struct BroadcastVariableHandler;

impl VariableHandler for BroadcastVariableHandler {
    fn type_name(&self) -> &str {
        BROADCAST_TYPE
    }

    fn default_value(&self, decl: &VariableDecl) -> Value {
        Value::Str(decl.name.clone())
    }
}

/// Lists start empty.
#[derive(Debug, Default)]
pub struct ListVariableHandler;

impl VariableHandler for ListVariableHandler {
    fn type_name(&self) -> &str {
        LIST_TYPE
    }

    fn default_value(&self, _decl: &VariableDecl) -> Value {
        Value::List(Vec::new())
    }
}

/// One entry of the serialized variable listing.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VariableEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub name: String,
    pub value: Value,
}

/// Insertion-ordered variable storage with display names.
#[derive(Default)]
pub struct VariableStore {
    values: IndexMap<VariableRef, Value>,
    names: IndexMap<VariableRef, String>,
    handlers: Vec<Box<dyn VariableHandler>>,
}

impl VariableStore {
    /// An empty store with the three core handlers installed.
    #[must_use]
    pub fn with_core_handlers() -> Self {
        let mut store = Self::default();
        store.add_handler(Box::new(ScalarVariableHandler));
        store.add_handler(Box::new(BroadcastVariableHandler));
        store.add_handler(Box::new(ListVariableHandler));
        store
    }

    pub fn add_handler(&mut self, handler: Box<dyn VariableHandler>) {
        self.handlers.push(handler);
    }

    /// Clears all values and names, keeping the handlers.
    pub fn clear(&mut self) {
        self.values.clear();
        self.names.clear();
    }

    /// (Re)creates the variables for a program's declarations.
    ///
    /// A declaration whose type tag has a registered handler takes that
    /// handler's default; any other tag stores the element text as a plain
    /// scalar, matching the loader contract.
    pub fn load_declarations(&mut self, decls: &[VariableDecl]) {
        self.clear();
        for decl in decls {
            let value = match self.handlers.iter().find(|h| h.type_name() == decl.type_tag) {
                Some(handler) => handler.default_value(decl),
                None => Value::Str(decl.name.clone()),
            };
            let var_ref = decl.to_ref();
            self.values.insert(var_ref.clone(), value);
            self.names.insert(var_ref, decl.name.clone());
        }
    }

    /// Reads a variable, failing on a dangling ref.
    pub fn get(&self, var_ref: &VariableRef) -> Result<Value, crate::error::ExecError> {
        self.values.get(var_ref).cloned().ok_or_else(|| {
            crate::error::ExecError::execution(format!(
                "unknown variable '{}-{}'",
                var_ref.type_tag, var_ref.id
            ))
        })
    }

    /// Writes a variable, creating the slot when it does not exist yet.
    pub fn set(&mut self, var_ref: VariableRef, value: Value) {
        self.values.insert(var_ref, value);
    }

    /// Display name for a ref, when known.
    #[must_use]
    pub fn name(&self, var_ref: &VariableRef) -> Option<&str> {
        self.names.get(var_ref).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Serializable listing in declaration order.
    #[must_use]
    pub fn entries(&self) -> Vec<VariableEntry> {
        self.values
            .iter()
            .map(|(var_ref, value)| VariableEntry {
                id: var_ref.id.clone(),
                type_tag: var_ref.type_tag.clone(),
                name: self.names.get(var_ref).cloned().unwrap_or_default(),
                value: value.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore")
            .field("values", &self.values)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
