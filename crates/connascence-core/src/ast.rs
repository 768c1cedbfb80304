//! Language-neutral syntax tree consumed by detectors and rules.
//!
//! Nodes live in an arena owned by [`Ast`]. Children are stored as indices
//! and each node keeps its parent as an index, so walking up the tree never
//! holds a borrow on the parent and no reference cycles exist.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopKind {
    For,
    While,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    /// May be passed positionally (with or without a default).
    Regular,
    VarArgs,
    KwArgs,
    KeywordOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    List,
    Dict,
    Set,
    Tuple,
}

/// Normalized node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Module,
    Class,
    Function,
    Lambda,
    Parameter(ParamKind),
    Block,
    ExprStmt,
    Loop(LoopKind),
    Branch,
    Try,
    Except,
    With,
    Return,
    Raise,
    Assert,
    Break,
    Continue,
    Global,
    Import,
    Assignment,
    Call,
    Attribute,
    Subscript,
    Identifier,
    Comparison,
    BoolOp,
    NumberLiteral,
    StringLiteral,
    BoolLiteral,
    NoneLiteral,
    Collection(CollectionKind),
    Comprehension,
    Decorator,
    Comment,
    Other,
}

impl NodeKind {
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            NodeKind::Module | NodeKind::Class | NodeKind::Function | NodeKind::Lambda
        )
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, NodeKind::NumberLiteral | NodeKind::StringLiteral)
    }

    pub fn is_mutable_collection(&self) -> bool {
        matches!(
            self,
            NodeKind::Collection(CollectionKind::List)
                | NodeKind::Collection(CollectionKind::Dict)
                | NodeKind::Collection(CollectionKind::Set)
        )
    }
}

/// Source span. Lines and columns are 1-based, bytes are offsets into the
/// unit's text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl Span {
    pub fn contains(&self, other: &Span) -> bool {
        self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
    }

    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    pub kind: NodeKind,
    /// Grammar kind as reported by the parser.
    pub raw_kind: String,
    /// Grammar field this node occupies in its parent (e.g. `condition`).
    pub field: Option<String>,
    pub span: Span,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Symbol name: definitions, identifiers, dotted callee/attribute paths.
    pub name: Option<String>,
    /// Literal content, comment text or operator text.
    pub text: Option<String>,
    /// Docstring for modules, classes and functions.
    pub doc: Option<String>,
}

impl AstNode {
    pub fn new(kind: NodeKind, raw_kind: &str, span: Span) -> Self {
        Self {
            kind,
            raw_kind: raw_kind.to_string(),
            field: None,
            span,
            parent: None,
            children: Vec::new(),
            name: None,
            text: None,
            doc: None,
        }
    }

    pub fn with_field(mut self, field: Option<&str>) -> Self {
        self.field = field.map(str::to_string);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_doc(mut self, doc: Option<String>) -> Self {
        self.doc = doc;
        self
    }

    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn text_str(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn in_field(&self, field: &str) -> bool {
        self.field.as_deref() == Some(field)
    }
}

/// Arena-backed normalized tree. Node 0 is the root once pushed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    nodes: Vec<AstNode>,
}

impl Ast {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Append a node under `parent`, returning its id.
    pub fn push(&mut self, parent: Option<NodeId>, mut node: AstNode) -> NodeId {
        let id = self.nodes.len();
        node.parent = parent;
        self.nodes.push(node);
        if let Some(p) = parent {
            self.nodes[p].children.push(id);
        }
        id
    }

    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id].children.iter().copied()
    }

    pub fn child_in_field(&self, id: NodeId, field: &str) -> Option<NodeId> {
        self.children(id).find(|&c| self.nodes[c].in_field(field))
    }

    /// All node ids in arena order (pre-order for adapter-built trees).
    pub fn ids(&self) -> std::ops::Range<NodeId> {
        0..self.nodes.len()
    }

    /// Pre-order descendants of `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        self.walk(id, |_| true)
    }

    /// Pre-order descendants that do not cross into nested scopes
    /// (functions, lambdas, classes) below `id`.
    pub fn descendants_in_scope(&self, id: NodeId) -> Vec<NodeId> {
        self.walk(id, |n| !n.kind.is_scope())
    }

    fn walk(&self, id: NodeId, descend: impl Fn(&AstNode) -> bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            let node = &self.nodes[current];
            if descend(node) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.nodes[id].parent, move |&p| self.nodes[p].parent)
    }

    /// Nearest ancestor matching `pred`.
    pub fn enclosing(&self, id: NodeId, pred: impl Fn(&AstNode) -> bool) -> Option<NodeId> {
        self.ancestors(id).find(|&a| pred(&self.nodes[a]))
    }

    pub fn enclosing_scope(&self, id: NodeId) -> Option<NodeId> {
        self.enclosing(id, |n| n.kind.is_scope())
    }

    pub fn enclosing_function(&self, id: NodeId) -> Option<NodeId> {
        self.enclosing(id, |n| matches!(n.kind, NodeKind::Function | NodeKind::Lambda))
    }

    /// Nodes of a kind anywhere in the tree, in arena order.
    pub fn of_kind(&self, pred: impl Fn(NodeKind) -> bool) -> Vec<NodeId> {
        self.ids().filter(|&i| pred(self.nodes[i].kind)).collect()
    }

    /// True when the nearest enclosing scope of `id` is the module.
    pub fn is_module_level(&self, id: NodeId) -> bool {
        self.enclosing_scope(id)
            .map(|s| self.nodes[s].kind == NodeKind::Module)
            .unwrap_or(true)
    }

    /// Functions defined directly in a class body.
    pub fn methods_of(&self, class: NodeId) -> Vec<NodeId> {
        self.descendants_in_scope(class)
            .into_iter()
            .filter(|&d| self.nodes[d].kind == NodeKind::Function)
            .collect()
    }

    /// True when `function` is defined directly in a class body.
    pub fn is_method(&self, function: NodeId) -> bool {
        self.enclosing_scope(function)
            .map(|s| self.nodes[s].kind == NodeKind::Class)
            .unwrap_or(false)
    }

    pub fn parameters(&self, function: NodeId) -> Vec<NodeId> {
        self.children(function)
            .filter(|&c| matches!(self.nodes[c].kind, NodeKind::Parameter(_)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenClass {
    Identifier,
    Literal,
    Other,
}

/// Lexical token (comments excluded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub class: TokenClass,
    pub text: String,
    pub line: usize,
    pub start_byte: usize,
}

/// One parsed source file. Created per run and dropped once the file's
/// results are extracted.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub language: &'static str,
    pub text: String,
    pub ast: Ast,
    pub tokens: Vec<Token>,
}

impl SourceUnit {
    pub fn new(
        path: &Path,
        language: &'static str,
        text: &str,
        ast: Ast,
        tokens: Vec<Token>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            language,
            text: text.to_string(),
            ast,
            tokens,
        }
    }

    /// Effective lines of the whole unit.
    pub fn effective_loc(&self) -> usize {
        count_effective_lines(self.text.lines())
    }

    /// Effective lines within an inclusive 1-based line range.
    pub fn effective_loc_between(&self, start_line: usize, end_line: usize) -> usize {
        if start_line == 0 || end_line < start_line {
            return 0;
        }
        count_effective_lines(
            self.text
                .lines()
                .skip(start_line - 1)
                .take(end_line - start_line + 1),
        )
    }

    pub fn node_loc(&self, id: NodeId) -> usize {
        let span = self.ast.node(id).span;
        self.effective_loc_between(span.start_line, span.end_line)
    }

    pub fn location_of(&self, id: NodeId) -> crate::types::SourceLocation {
        let span = self.ast.node(id).span;
        crate::types::SourceLocation::new(&self.path, span.start_line, span.start_col)
    }

    /// Tokens whose start lies inside `span`.
    pub fn tokens_in(&self, span: &Span) -> &[Token] {
        let start = self
            .tokens
            .partition_point(|t| t.start_byte < span.start_byte);
        let end = self.tokens.partition_point(|t| t.start_byte < span.end_byte);
        &self.tokens[start..end.max(start)]
    }
}

/// Non-blank lines that are not comment-only.
pub fn count_effective_lines<'a>(lines: impl Iterator<Item = &'a str>) -> usize {
    lines
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start_line: usize, end_line: usize, start_byte: usize, end_byte: usize) -> Span {
        Span {
            start_line,
            start_col: 1,
            end_line,
            end_col: 1,
            start_byte,
            end_byte,
        }
    }

    fn sample() -> Ast {
        let mut ast = Ast::new();
        let module = ast.push(None, AstNode::new(NodeKind::Module, "module", span(1, 9, 0, 90)));
        let class = ast.push(
            Some(module),
            AstNode::new(NodeKind::Class, "class_definition", span(1, 8, 0, 80)).with_name("A"),
        );
        let method = ast.push(
            Some(class),
            AstNode::new(NodeKind::Function, "function_definition", span(2, 4, 10, 40))
                .with_name("run"),
        );
        ast.push(
            Some(method),
            AstNode::new(NodeKind::Parameter(ParamKind::Regular), "identifier", span(2, 2, 18, 22))
                .with_name("self"),
        );
        let inner = ast.push(
            Some(method),
            AstNode::new(NodeKind::Function, "function_definition", span(3, 4, 25, 40))
                .with_name("inner"),
        );
        ast.push(
            Some(inner),
            AstNode::new(NodeKind::Return, "return_statement", span(4, 4, 30, 40)),
        );
        ast
    }

    #[test]
    fn test_parent_links_and_ancestors() {
        let ast = sample();
        assert_eq!(ast.root(), Some(0));
        assert_eq!(ast.parent(2), Some(1));
        let chain: Vec<_> = ast.ancestors(5).collect();
        assert_eq!(chain, vec![4, 2, 1, 0]);
        assert_eq!(ast.enclosing_function(5), Some(4));
    }

    #[test]
    fn test_scope_bounded_walk_stops_at_nested_functions() {
        let ast = sample();
        let in_scope = ast.descendants_in_scope(2);
        assert!(in_scope.contains(&4), "nested def itself is visible");
        assert!(!in_scope.contains(&5), "but not its body");
        assert_eq!(ast.descendants(2), vec![3, 4, 5]);
    }

    #[test]
    fn test_method_detection() {
        let ast = sample();
        assert!(ast.is_method(2));
        assert!(!ast.is_method(4));
        assert_eq!(ast.methods_of(1), vec![2]);
        assert_eq!(ast.parameters(2), vec![3]);
    }

    #[test]
    fn test_effective_loc_skips_blank_and_comment_lines() {
        let text = "x = 1\n\n# note\n  y = 2  # trailing\n";
        let unit = SourceUnit::new(Path::new("a.py"), "python", text, Ast::new(), vec![]);
        assert_eq!(unit.effective_loc(), 2);
        assert_eq!(unit.effective_loc_between(2, 4), 1);
        assert_eq!(unit.effective_loc_between(0, 4), 0);
    }

    #[test]
    fn test_tokens_in_span() {
        let tokens = (0..5)
            .map(|i| Token {
                class: TokenClass::Identifier,
                text: format!("t{i}"),
                line: 1,
                start_byte: i * 10,
            })
            .collect();
        let unit = SourceUnit::new(Path::new("a.py"), "python", "", Ast::new(), tokens);
        let picked = unit.tokens_in(&span(1, 1, 10, 35));
        let texts: Vec<_> = picked.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["t1", "t2", "t3"]);
    }
}
