//! Parses program XML into an immutable, arena-allocated block graph.
//!
//! All XML work happens here, once, at load time: the loader strips any
//! `xmlns` declaration, walks the DOM, validates every referenced block
//! kind against the registry, and extracts each block's argument bindings
//! into the node itself. Nothing re-parses XML while a program runs — the
//! cached bindings are what the task machinery composes arguments from,
//! and the arena index ([`NodeId`]) is the stable identity that call
//! creation is keyed on across a load epoch.

use std::sync::OnceLock;

use regex::Regex;
use smallvec::SmallVec;

use crate::error::LoadError;
use crate::registry::Registry;
use crate::value::Value;
use crate::variables::{VariableDecl, VariableRef};

/// Index of a block node in a [`Program`] arena.
///
/// Ids are only meaningful within the program (load epoch) that produced
/// them; `load_program` swaps the whole arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("program arena overflow"))
    }

    /// Returns the raw arena index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One parsed argument binding of a block node.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// A literal from a `<field>` or `<shadow>`: raw text, or a parsed
    /// number for `NUM` fields.
    Literal(Value),
    /// A `<field id="…">` naming a variable. Read through the store at
    /// invocation time (or passed as the ref itself for reference-typed
    /// parameters).
    Variable(VariableRef),
    /// A nested expression block inside a `<value>` socket.
    Expression(NodeId),
    /// A substack; `None` is the empty statement (a no-op callable).
    Statement(Option<NodeId>),
}

/// One parsed `<block>` element. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    /// Stable block id from the editor (synthesized when absent).
    pub id: String,
    /// Block type string; validated against the registry at load.
    pub kind: String,
    /// Successor statement from `<next><block…/></next>`.
    pub next: Option<NodeId>,
    /// Bindings keyed by lowercased argument name, in document order.
    pub bindings: SmallVec<[(String, Binding); 4]>,
}

impl BlockNode {
    /// Looks up a binding by (already lowercased) name.
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, binding)| binding)
    }
}

/// A fully parsed program: the node arena, its roots, and the variable
/// declarations from the `<variables>` section.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Program {
    nodes: Vec<BlockNode>,
    roots: Vec<NodeId>,
    starting: Vec<NodeId>,
    variables: Vec<VariableDecl>,
}

fn xmlns_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"xmlns="[^"]+""#).unwrap())
}

impl Program {
    /// Parses program XML.
    ///
    /// Fails with [`LoadError::MalformedProgram`] when the XML does not
    /// parse or a required attribute is missing, and with
    /// [`LoadError::UnknownBlock`] when any reachable block's type has no
    /// registry entry — unknown kinds surface at load, not mid-run.
    pub fn parse(xml: &str, registry: &Registry) -> Result<Self, LoadError> {
        let stripped = xmlns_pattern().replace_all(xml, "");
        let doc = roxmltree::Document::parse(&stripped)
            .map_err(|err| LoadError::MalformedProgram(err.to_string()))?;

        let mut program = Self::default();
        for child in doc.root_element().children().filter(roxmltree::Node::is_element) {
            match child.tag_name().name() {
                "variables" => program.parse_variables(&child)?,
                "block" => {
                    let node_id = program.parse_block(&child, registry)?;
                    program.roots.push(node_id);
                    if registry.lookup(&program.nodes[node_id.index()].kind)?.can_run {
                        program.starting.push(node_id);
                    }
                }
                _ => {}
            }
        }
        Ok(program)
    }

    /// Blocks that root execution, in program order.
    #[must_use]
    pub fn starting_blocks(&self) -> &[NodeId] {
        &self.starting
    }

    /// All top-level blocks, in program order.
    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// The `<variables>` declarations, in document order.
    #[must_use]
    pub fn variables(&self) -> &[VariableDecl] {
        &self.variables
    }

    /// Borrows a node by arena id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &BlockNode {
        &self.nodes[id.index()]
    }

    /// Number of parsed blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn parse_variables(&mut self, section: &roxmltree::Node<'_, '_>) -> Result<(), LoadError> {
        for variable in section.children().filter(roxmltree::Node::is_element) {
            let id = variable
                .attribute("id")
                .ok_or_else(|| LoadError::MalformedProgram("variable is missing an 'id' attribute".into()))?;
            self.variables.push(VariableDecl {
                id: id.to_owned(),
                type_tag: variable.attribute("type").unwrap_or_default().to_owned(),
                name: variable.text().unwrap_or_default().trim().to_owned(),
            });
        }
        Ok(())
    }

    fn parse_block(
        &mut self,
        el: &roxmltree::Node<'_, '_>,
        registry: &Registry,
    ) -> Result<NodeId, LoadError> {
        let kind = el
            .attribute("type")
            .ok_or_else(|| LoadError::MalformedProgram("block is missing a 'type' attribute".into()))?
            .to_owned();
        // Validate eagerly so unknown kinds fail the load instead of a run.
        registry.lookup(&kind)?;

        // Reserve the slot first so child ids come out in pre-order after
        // their parent.
        let node_id = NodeId::new(self.nodes.len());
        let id = el
            .attribute("id")
            .map_or_else(|| format!("auto-{}", node_id.index()), str::to_owned);
        self.nodes.push(BlockNode {
            id,
            kind,
            next: None,
            bindings: SmallVec::new(),
        });

        let mut next = None;
        let mut bindings: SmallVec<[(String, Binding); 4]> = SmallVec::new();
        for child in el.children().filter(roxmltree::Node::is_element) {
            match child.tag_name().name() {
                "next" => {
                    if let Some(block) = first_element(&child, "block") {
                        next = Some(self.parse_block(&block, registry)?);
                    }
                }
                "field" => {
                    if let Some(name) = child.attribute("name") {
                        bindings.push((name.to_lowercase(), parse_field(&child)?));
                    }
                }
                "value" => {
                    if let Some(name) = child.attribute("name") {
                        bindings.push((name.to_lowercase(), self.parse_value(&child, registry)?));
                    }
                }
                "statement" => {
                    if let Some(name) = child.attribute("name") {
                        let substack = match first_element(&child, "block") {
                            Some(block) => Some(self.parse_block(&block, registry)?),
                            None => None,
                        };
                        bindings.push((name.to_lowercase(), Binding::Statement(substack)));
                    }
                }
                _ => {}
            }
        }

        let node = &mut self.nodes[node_id.index()];
        node.next = next;
        node.bindings = bindings;
        Ok(node_id)
    }

    fn parse_value(
        &mut self,
        el: &roxmltree::Node<'_, '_>,
        registry: &Registry,
    ) -> Result<Binding, LoadError> {
        if let Some(block) = first_element(el, "block") {
            return Ok(Binding::Expression(self.parse_block(&block, registry)?));
        }
        if let Some(shadow) = first_element(el, "shadow") {
            let field = first_element(&shadow, "field").ok_or_else(|| {
                LoadError::MalformedProgram("could not parse shadow block: no field element found".into())
            })?;
            return parse_field(&field);
        }
        Err(LoadError::MalformedProgram("could not parse value block".into()))
    }
}

fn first_element<'a, 'input>(
    el: &roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    el.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

fn parse_field(el: &roxmltree::Node<'_, '_>) -> Result<Binding, LoadError> {
    if let Some(id) = el.attribute("id") {
        let type_tag = el.attribute("variabletype").unwrap_or_default();
        return Ok(Binding::Variable(VariableRef::new(type_tag, id)));
    }
    let text = el.text().unwrap_or_default();
    if el.attribute("name").is_some_and(|n| n.eq_ignore_ascii_case("num")) {
        let num = text.trim().parse::<f64>().map_err(|_| {
            LoadError::MalformedProgram(format!("could not parse NUM field '{text}' as a number"))
        })?;
        return Ok(Binding::Literal(Value::Num(num)));
    }
    Ok(Binding::Literal(Value::Str(text.to_owned())))
}
