//! The catalog of known block kinds.
//!
//! Every block kind the loader may encounter has a [`BlockDefinition`]:
//! editor metadata flags, the parameter schema, and the executor that runs
//! the block. Registration is explicit — the engine is constructed from a
//! [`Registry`] that the embedder fills with the built-in library and any
//! extension blocks, so there is no import-time side-effect registration.
//!
//! Each block declares its parameter names and kinds up front; the loader
//! and task machinery use that schema to decide how
//! `<field>`/`<value>`/`<statement>` children bind and when expression
//! arguments are forced.

use ahash::AHashMap;

use crate::context::ExecCtx;
use crate::error::{ExecError, LoadError};
use crate::metadata::VisualDefinition;
use crate::task::{Args, Outcome};

/// How a declared parameter receives its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Resolved to an immediate [`crate::Value`] before the executor runs.
    Value,
    /// Receives the [`crate::VariableRef`] itself instead of the stored
    /// value.
    Reference,
    /// Receives the unevaluated expression; the executor forces it with
    /// [`Outcome::NeedArg`].
    Lazy,
    /// Receives a substack handle the executor can run via
    /// [`crate::task::Call::Substack`].
    Statement,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn value(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Value)
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Reference)
    }

    pub fn lazy(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Lazy)
    }

    pub fn statement(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Statement)
    }
}

/// A block executor: named arguments in, flow instruction out.
pub type Executor = Box<dyn Fn(&mut ExecCtx<'_>, &Args) -> Result<Outcome, ExecError> + Send + Sync>;

/// Registry entry for one block kind.
pub struct BlockDefinition {
    /// The block type string used in program XML.
    pub kind: String,
    pub category: Option<String>,
    pub is_visible: bool,
    /// Whether this kind may root execution (a starting block).
    pub can_run: bool,
    /// Predefined blocks ship with the editor and export no metadata.
    pub is_predefined: bool,
    pub params: Vec<ParamSpec>,
    pub executor: Executor,
    pub visual: Option<VisualDefinition>,
}

impl BlockDefinition {
    pub fn new(
        kind: impl Into<String>,
        executor: impl Fn(&mut ExecCtx<'_>, &Args) -> Result<Outcome, ExecError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: kind.into(),
            category: None,
            is_visible: true,
            can_run: false,
            is_predefined: false,
            params: Vec::new(),
            executor: Box::new(executor),
            visual: None,
        }
    }

    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn can_run(mut self) -> Self {
        self.can_run = true;
        self
    }

    #[must_use]
    pub fn predefined(mut self) -> Self {
        self.is_predefined = true;
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.is_visible = false;
        self
    }

    #[must_use]
    pub fn params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn visual(mut self, visual: VisualDefinition) -> Self {
        self.visual = Some(visual);
        self
    }

    /// Looks up a declared parameter by (lowercased) name.
    #[must_use]
    pub fn param_kind(&self, name: &str) -> Option<ParamKind> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.kind)
    }

    /// Whether the named parameter is reference-typed.
    ///
    /// Two signals count, either one suffices: the schema declares the
    /// parameter as [`ParamKind::Reference`], or the visual definition
    /// renders it as a variable picker.
    #[must_use]
    pub fn is_reference_param(&self, name: &str) -> bool {
        if self.param_kind(name) == Some(ParamKind::Reference) {
            return true;
        }
        self.visual.as_ref().is_some_and(|v| {
            v.args
                .iter()
                .any(|arg| arg.is_variable() && arg.name().eq_ignore_ascii_case(name))
        })
    }
}

impl std::fmt::Debug for BlockDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockDefinition")
            .field("kind", &self.kind)
            .field("category", &self.category)
            .field("can_run", &self.can_run)
            .field("is_predefined", &self.is_predefined)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Catalog of block definitions keyed by kind.
#[derive(Debug, Default)]
pub struct Registry {
    blocks: AHashMap<String, BlockDefinition>,
}

impl Registry {
    /// An empty registry (extension-only engines).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in block library.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::blocks::register_defaults(&mut registry);
        registry
    }

    /// Inserts a definition, overriding any previous entry of the same kind.
    pub fn register(&mut self, definition: BlockDefinition) {
        self.blocks.insert(definition.kind.clone(), definition);
    }

    /// Looks up a definition by kind.
    pub fn lookup(&self, kind: &str) -> Result<&BlockDefinition, LoadError> {
        self.blocks
            .get(kind)
            .ok_or_else(|| LoadError::UnknownBlock(kind.to_owned()))
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.blocks.contains_key(kind)
    }

    /// Kind strings of all blocks that may root execution.
    #[must_use]
    pub fn starting_kinds(&self) -> Vec<&str> {
        self.blocks
            .values()
            .filter(|def| def.can_run)
            .map(|def| def.kind.as_str())
            .collect()
    }

    /// Iterates all definitions (metadata export).
    pub fn definitions(&self) -> impl Iterator<Item = &BlockDefinition> {
        self.blocks.values()
    }

    /// Editor metadata for every visible, non-predefined block.
    pub fn metadata(&self) -> Result<serde_json::Value, LoadError> {
        let mut out = serde_json::Map::new();
        for def in self.blocks.values() {
            if !def.is_visible {
                continue;
            }
            if let Some(meta) = crate::metadata::block_metadata(def)? {
                out.insert(def.kind.clone(), meta);
            }
        }
        Ok(serde_json::Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::VisualArg;

    fn noop_def(kind: &str) -> BlockDefinition {
        BlockDefinition::new(kind, |_, _| Ok(Outcome::Done))
    }

    #[test]
    fn register_overrides_by_kind() {
        let mut registry = Registry::new();
        registry.register(noop_def("demo"));
        registry.register(noop_def("demo").can_run());
        assert!(registry.lookup("demo").unwrap().can_run);
    }

    #[test]
    fn lookup_unknown_kind_fails() {
        let registry = Registry::new();
        assert!(matches!(registry.lookup("ghost"), Err(LoadError::UnknownBlock(_))));
    }

    #[test]
    fn reference_detection_uses_schema_and_visual() {
        let by_schema = noop_def("a").params(vec![ParamSpec::reference("variable")]);
        assert!(by_schema.is_reference_param("variable"));

        let by_visual = noop_def("b")
            .params(vec![ParamSpec::value("variable")])
            .visual(VisualDefinition::new("set %1").args(vec![VisualArg::variable("VARIABLE", &[])]));
        assert!(by_visual.is_reference_param("variable"));
        assert!(!noop_def("c").params(vec![ParamSpec::value("x")]).is_reference_param("x"));
    }
}
