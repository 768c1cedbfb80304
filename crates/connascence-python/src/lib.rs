use std::path::Path;

use anyhow::{Context, Result};
use connascence_core::analyzer::LanguageAdapter;
use connascence_core::ast::{
    Ast, AstNode, CollectionKind, LoopKind, NodeId, NodeKind, ParamKind, SourceUnit, Span, Token,
    TokenClass,
};
use connascence_core::error::AnalysisError;
use tree_sitter::{Language, Node, Parser};

/// Python adapter built on tree-sitter-python.
pub struct PythonAdapter {
    language: Language,
}

impl PythonAdapter {
    pub fn new() -> Result<Self> {
        let language: Language = tree_sitter_python::LANGUAGE.into();
        // Fail at construction rather than on the first file.
        let mut parser = Parser::new();
        parser
            .set_language(&language)
            .context("failed to set Python language")?;
        Ok(Self { language })
    }

    fn parser(&self) -> std::result::Result<Parser, String> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| format!("failed to set Python language: {e}"))?;
        Ok(parser)
    }
}

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> &'static str {
        "python"
    }

    fn file_extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn parse(&self, path: &Path, content: &str) -> std::result::Result<SourceUnit, AnalysisError> {
        let parse_error = |message: String| AnalysisError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let mut parser = self.parser().map_err(parse_error)?;
        let tree = parser
            .parse(content, None)
            .ok_or_else(|| parse_error("parser returned no tree".to_string()))?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(parse_error(describe_error(root)));
        }

        let mut builder = Builder {
            src: content,
            ast: Ast::new(),
        };
        builder.convert(root, None, None);

        let mut tokens = Vec::new();
        collect_tokens(root, content, &mut tokens);
        tokens.sort_by_key(|t| t.start_byte);

        Ok(SourceUnit::new(path, "python", content, builder.ast, tokens))
    }
}

fn describe_error(root: Node) -> String {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            let what = if node.is_missing() {
                format!("missing {}", node.kind())
            } else {
                "syntax error".to_string()
            };
            return format!("{what} at line {}, column {}", pos.row + 1, pos.column + 1);
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    "syntax error".to_string()
}

fn node_text<'s>(node: Node, src: &'s str) -> &'s str {
    src.get(node.byte_range()).unwrap_or("")
}

/// Text with all whitespace removed, for dotted paths like `a . b`.
fn compact(node: Node, src: &str) -> String {
    node_text(node, src).split_whitespace().collect()
}

fn span_of(node: Node) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    Span {
        start_line: start.row + 1,
        start_col: start.column + 1,
        end_line: end.row + 1,
        end_col: end.column + 1,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    }
}

/// Named children paired with the grammar field each occupies.
fn named_children<'t>(node: Node<'t>) -> Vec<(Node<'t>, Option<&'static str>)> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            let child = cursor.node();
            if child.is_named() {
                out.push((child, cursor.field_name()));
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    out
}

/// Content of a plain string literal, without quotes or prefix.
/// `None` for f-strings with interpolations.
fn string_content(node: Node, src: &str) -> Option<String> {
    let mut content = String::new();
    for (child, _) in named_children(node) {
        match child.kind() {
            "interpolation" => return None,
            "string_content" | "escape_sequence" => content.push_str(node_text(child, src)),
            _ => {}
        }
    }
    Some(content)
}

/// Docstring of a module node or of a definition's body block.
fn docstring(body: Node, src: &str) -> Option<String> {
    let first = named_children(body)
        .into_iter()
        .map(|(c, _)| c)
        .find(|c| c.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = named_children(first).into_iter().next()?.0;
    match expr.kind() {
        "string" => string_content(expr, src),
        "concatenated_string" => {
            let mut doc = String::new();
            for (part, _) in named_children(expr) {
                doc.push_str(&string_content(part, src)?);
            }
            Some(doc)
        }
        _ => None,
    }
}

struct Builder<'s> {
    src: &'s str,
    ast: Ast,
}

impl Builder<'_> {
    fn push(&mut self, parent: Option<NodeId>, node: AstNode) -> NodeId {
        self.ast.push(parent, node)
    }

    fn children(&mut self, node: Node, id: NodeId) {
        for (child, field) in named_children(node) {
            self.convert(child, Some(id), field);
        }
    }

    fn convert(&mut self, node: Node, parent: Option<NodeId>, field: Option<&str>) {
        let src = self.src;
        let raw = node.kind();
        let base = |kind: NodeKind| AstNode::new(kind, raw, span_of(node)).with_field(field);

        match raw {
            "module" => {
                let id = self.push(parent, base(NodeKind::Module).with_doc(docstring(node, src)));
                self.children(node, id);
            }
            "decorated_definition" => {
                let decorators: Vec<Node> = named_children(node)
                    .into_iter()
                    .filter(|(c, _)| c.kind() == "decorator")
                    .map(|(c, _)| c)
                    .collect();
                if let Some(def) = node.child_by_field_name("definition") {
                    self.definition(def, parent, field, &decorators);
                }
            }
            "function_definition" | "class_definition" => {
                self.definition(node, parent, field, &[]);
            }
            "lambda" => {
                let id = self.push(parent, base(NodeKind::Lambda));
                if let Some(params) = node.child_by_field_name("parameters") {
                    self.parameters(params, id);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.convert(body, Some(id), Some("body"));
                }
            }
            "parenthesized_expression" => {
                // Transparent: `while (True):` tests the same as `while True:`.
                if let Some((inner, _)) = named_children(node)
                    .into_iter()
                    .find(|(c, _)| c.kind() != "comment")
                {
                    self.convert(inner, parent, field);
                }
            }
            "block" => self.nested(node, parent, base(NodeKind::Block)),
            "expression_statement" => self.nested(node, parent, base(NodeKind::ExprStmt)),
            "for_statement" => self.nested(node, parent, base(NodeKind::Loop(LoopKind::For))),
            "while_statement" => self.nested(node, parent, base(NodeKind::Loop(LoopKind::While))),
            "if_statement" | "elif_clause" => self.nested(node, parent, base(NodeKind::Branch)),
            "try_statement" => self.nested(node, parent, base(NodeKind::Try)),
            "with_statement" => self.nested(node, parent, base(NodeKind::With)),
            "return_statement" => self.nested(node, parent, base(NodeKind::Return)),
            "raise_statement" => self.nested(node, parent, base(NodeKind::Raise)),
            "assert_statement" => self.nested(node, parent, base(NodeKind::Assert)),
            "break_statement" => self.nested(node, parent, base(NodeKind::Break)),
            "continue_statement" => self.nested(node, parent, base(NodeKind::Continue)),
            "assignment" | "augmented_assignment" => {
                let id = self.push(parent, base(NodeKind::Assignment));
                for (child, child_field) in named_children(node) {
                    if child_field != Some("type") {
                        self.convert(child, Some(id), child_field);
                    }
                }
            }
            "except_clause" | "except_group_clause" => {
                let caught = named_children(node)
                    .into_iter()
                    .map(|(c, _)| c)
                    .find(|c| c.kind() != "block" && c.kind() != "comment");
                let mut n = base(NodeKind::Except);
                if let Some(t) = caught {
                    // `except E as e` wraps the type in an as_pattern.
                    let caught_type = match t.kind() {
                        "as_pattern" => named_children(t).into_iter().next().map(|(c, _)| c),
                        _ => Some(t),
                    };
                    if let Some(ty) = caught_type {
                        n = n.with_name(compact(ty, src));
                    }
                }
                let id = self.push(parent, n);
                for (child, child_field) in named_children(node) {
                    if child.kind() == "block" {
                        self.convert(child, Some(id), Some("body"));
                    } else {
                        self.convert(child, Some(id), child_field);
                    }
                }
            }
            "global_statement" | "nonlocal_statement" => {
                let names: Vec<&str> = named_children(node)
                    .into_iter()
                    .filter(|(c, _)| c.kind() == "identifier")
                    .map(|(c, _)| node_text(c, src))
                    .collect();
                self.push(parent, base(NodeKind::Global).with_name(names.join(", ")));
            }
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                let n = self.import(node, base(NodeKind::Import));
                self.push(parent, n);
            }
            "call" => {
                let name = node
                    .child_by_field_name("function")
                    .map(|f| compact(f, src))
                    .unwrap_or_default();
                self.nested(node, parent, base(NodeKind::Call).with_name(name));
            }
            "attribute" => {
                let name = compact(node, src);
                self.nested(node, parent, base(NodeKind::Attribute).with_name(name));
            }
            "subscript" => {
                let name = node
                    .child_by_field_name("value")
                    .map(|v| compact(v, src))
                    .unwrap_or_default();
                self.nested(node, parent, base(NodeKind::Subscript).with_name(name));
            }
            "identifier" => {
                self.push(parent, base(NodeKind::Identifier).with_name(node_text(node, src)));
            }
            "comparison_operator" => {
                let ops = operator_text(node, src);
                self.nested(node, parent, base(NodeKind::Comparison).with_text(ops));
            }
            "boolean_operator" | "not_operator" => {
                let ops = operator_text(node, src);
                self.nested(node, parent, base(NodeKind::BoolOp).with_text(ops));
            }
            "integer" | "float" => {
                self.push(parent, base(NodeKind::NumberLiteral).with_text(node_text(node, src)));
            }
            "unary_operator" => {
                let argument = node.child_by_field_name("argument");
                let negated_number = operator_text(node, src) == "-"
                    && argument.is_some_and(|a| matches!(a.kind(), "integer" | "float"));
                match argument {
                    Some(arg) if negated_number => {
                        let text = format!("-{}", node_text(arg, src));
                        self.push(parent, base(NodeKind::NumberLiteral).with_text(text));
                    }
                    _ => self.nested(node, parent, base(NodeKind::Other)),
                }
            }
            "string" => match string_content(node, src) {
                Some(content) => {
                    self.push(parent, base(NodeKind::StringLiteral).with_text(content));
                }
                None => self.interpolated(node, parent, base(NodeKind::Other)),
            },
            "concatenated_string" => {
                let mut joined = Some(String::new());
                for (part, _) in named_children(node) {
                    joined = joined.and_then(|mut acc| {
                        acc.push_str(&string_content(part, src)?);
                        Some(acc)
                    });
                }
                match joined {
                    Some(content) => {
                        self.push(parent, base(NodeKind::StringLiteral).with_text(content));
                    }
                    None => self.nested(node, parent, base(NodeKind::Other)),
                }
            }
            "true" => {
                self.push(parent, base(NodeKind::BoolLiteral).with_text("True"));
            }
            "false" => {
                self.push(parent, base(NodeKind::BoolLiteral).with_text("False"));
            }
            "none" => {
                self.push(parent, base(NodeKind::NoneLiteral));
            }
            "list" => self.nested(node, parent, base(NodeKind::Collection(CollectionKind::List))),
            "dictionary" => {
                self.nested(node, parent, base(NodeKind::Collection(CollectionKind::Dict)))
            }
            "set" => self.nested(node, parent, base(NodeKind::Collection(CollectionKind::Set))),
            "tuple" => self.nested(node, parent, base(NodeKind::Collection(CollectionKind::Tuple))),
            "list_comprehension"
            | "dictionary_comprehension"
            | "set_comprehension"
            | "generator_expression" => self.nested(node, parent, base(NodeKind::Comprehension)),
            "comment" => {
                self.push(parent, base(NodeKind::Comment).with_text(node_text(node, src)));
            }
            _ => self.nested(node, parent, base(NodeKind::Other)),
        }
    }

    fn nested(&mut self, node: Node, parent: Option<NodeId>, ast_node: AstNode) {
        let id = self.push(parent, ast_node);
        self.children(node, id);
    }

    /// f-string: only the interpolated expressions are kept.
    fn interpolated(&mut self, node: Node, parent: Option<NodeId>, ast_node: AstNode) {
        let id = self.push(parent, ast_node);
        for (child, _) in named_children(node) {
            if child.kind() == "interpolation" {
                if let Some(expr) = child.child_by_field_name("expression") {
                    self.convert(expr, Some(id), Some("interpolation"));
                }
            }
        }
    }

    fn definition(
        &mut self,
        node: Node,
        parent: Option<NodeId>,
        field: Option<&str>,
        decorators: &[Node],
    ) {
        let src = self.src;
        let is_class = node.kind() == "class_definition";
        let kind = if is_class {
            NodeKind::Class
        } else {
            NodeKind::Function
        };
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, src).to_string())
            .unwrap_or_default();
        let body = node.child_by_field_name("body");
        let doc = body.and_then(|b| docstring(b, src));
        let id = self.push(
            parent,
            AstNode::new(kind, node.kind(), span_of(node))
                .with_field(field)
                .with_name(name)
                .with_doc(doc),
        );

        for decorator in decorators {
            let text = decorator_name(*decorator, src);
            self.push(
                Some(id),
                AstNode::new(NodeKind::Decorator, "decorator", span_of(*decorator))
                    .with_field(Some("decorator"))
                    .with_name(text),
            );
        }

        if is_class {
            if let Some(supers) = node.child_by_field_name("superclasses") {
                self.convert(supers, Some(id), Some("superclasses"));
            }
        } else if let Some(params) = node.child_by_field_name("parameters") {
            self.parameters(params, id);
        }

        if let Some(body) = body {
            self.convert(body, Some(id), Some("body"));
        }
    }

    /// Flatten a parameter list onto its function as `Parameter` nodes.
    fn parameters(&mut self, params: Node, function: NodeId) {
        let src = self.src;
        let mut keyword_only = false;
        for (param, _) in named_children(params) {
            let regular = if keyword_only {
                ParamKind::KeywordOnly
            } else {
                ParamKind::Regular
            };
            match param.kind() {
                "identifier" => {
                    self.parameter(param, function, regular, node_text(param, src), None);
                }
                "typed_parameter" => {
                    let Some((inner, _)) = named_children(param).into_iter().next() else {
                        continue;
                    };
                    match inner.kind() {
                        "list_splat_pattern" => {
                            keyword_only = true;
                            let name = splat_name(inner, src);
                            self.parameter(param, function, ParamKind::VarArgs, &name, None);
                        }
                        "dictionary_splat_pattern" => {
                            let name = splat_name(inner, src);
                            self.parameter(param, function, ParamKind::KwArgs, &name, None);
                        }
                        _ => {
                            self.parameter(param, function, regular, node_text(inner, src), None);
                        }
                    }
                }
                "default_parameter" | "typed_default_parameter" => {
                    let name = param
                        .child_by_field_name("name")
                        .map(|n| node_text(n, src))
                        .unwrap_or("");
                    let value = param.child_by_field_name("value");
                    self.parameter(param, function, regular, name, value);
                }
                "list_splat_pattern" => {
                    keyword_only = true;
                    let name = splat_name(param, src);
                    self.parameter(param, function, ParamKind::VarArgs, &name, None);
                }
                "dictionary_splat_pattern" => {
                    let name = splat_name(param, src);
                    self.parameter(param, function, ParamKind::KwArgs, &name, None);
                }
                "keyword_separator" => keyword_only = true,
                "positional_separator" | "comment" => {}
                _ => {
                    self.parameter(param, function, regular, &compact(param, src), None);
                }
            }
        }
    }

    fn parameter(
        &mut self,
        node: Node,
        function: NodeId,
        kind: ParamKind,
        name: &str,
        default: Option<Node>,
    ) {
        let id = self.push(
            Some(function),
            AstNode::new(NodeKind::Parameter(kind), node.kind(), span_of(node))
                .with_field(Some("parameter"))
                .with_name(name),
        );
        if let Some(value) = default {
            self.convert(value, Some(id), Some("default"));
        }
    }

    fn import(&self, node: Node, mut ast_node: AstNode) -> AstNode {
        let src = self.src;
        let mut bound = Vec::new();
        let mut module = String::new();
        match node.kind() {
            "import_statement" => {
                for (child, _) in named_children(node) {
                    match child.kind() {
                        "dotted_name" => {
                            let path = compact(child, src);
                            if module.is_empty() {
                                module = path.clone();
                            }
                            let head = path.split('.').next().unwrap_or("").to_string();
                            bound.push(head);
                        }
                        "aliased_import" => {
                            if let Some(name) = child.child_by_field_name("name") {
                                if module.is_empty() {
                                    module = compact(name, src);
                                }
                            }
                            if let Some(alias) = child.child_by_field_name("alias") {
                                bound.push(node_text(alias, src).to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            "import_from_statement" => {
                if let Some(m) = node.child_by_field_name("module_name") {
                    module = compact(m, src);
                }
                for (child, field) in named_children(node) {
                    match (child.kind(), field) {
                        ("wildcard_import", _) => bound.push("*".to_string()),
                        ("dotted_name", Some("name")) => bound.push(compact(child, src)),
                        ("aliased_import", _) => {
                            if let Some(alias) = child.child_by_field_name("alias") {
                                bound.push(node_text(alias, src).to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => module = "__future__".to_string(),
        }
        ast_node = ast_node.with_name(module);
        ast_node.with_text(bound.join(", "))
    }
}

/// Anonymous operator tokens of an expression, e.g. `==` or `not in`.
fn operator_text(node: Node, src: &str) -> String {
    let mut ops = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if !child.is_named() {
            let text = node_text(child, src);
            if !matches!(text, "(" | ")") {
                ops.push(text);
            }
        }
    }
    ops.join(" ")
}

fn splat_name(node: Node, src: &str) -> String {
    named_children(node)
        .into_iter()
        .next()
        .map(|(c, _)| node_text(c, src).to_string())
        .unwrap_or_default()
}

/// `@app.route("/x")` names the decorator `app.route`.
fn decorator_name(decorator: Node, src: &str) -> String {
    let Some((expr, _)) = named_children(decorator).into_iter().next() else {
        return String::new();
    };
    if expr.kind() == "call" {
        if let Some(function) = expr.child_by_field_name("function") {
            return compact(function, src);
        }
    }
    compact(expr, src)
}

fn collect_tokens(root: Node, src: &str, out: &mut Vec<Token>) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let kind = node.kind();
        if kind == "comment" {
            continue;
        }
        let class = match kind {
            "string" => Some(TokenClass::Literal),
            _ if node.child_count() == 0 => Some(match kind {
                "identifier" => TokenClass::Identifier,
                "integer" | "float" | "true" | "false" | "none" => TokenClass::Literal,
                _ => TokenClass::Other,
            }),
            _ => None,
        };
        match class {
            Some(class) => {
                let text = node_text(node, src);
                if !text.is_empty() {
                    out.push(Token {
                        class,
                        text: text.to_string(),
                        line: node.start_position().row + 1,
                        start_byte: node.start_byte(),
                    });
                }
            }
            None => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.children(&mut cursor).collect();
                stack.extend(children.into_iter().rev());
            }
        }
    }
}
