//! Analyzer adapter
//!
//! Wraps the syntactic checker behind a small trait: source text in,
//! `DefectSet` out. The contract is infallible - an analyzer that cannot run
//! at all reports a single synthetic defect instead of erroring, so the
//! repair loop always receives a set it can act on. Analysis must be
//! deterministic for identical input; the loop's progress test depends on it.

use crate::defect::{Defect, DefectKind, DefectSet};
use crate::util::{collapse_whitespace, truncate};
use async_trait::async_trait;
use std::cell::RefCell;
use std::collections::HashSet;
use tree_sitter::{Node, Parser};

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, source: &str) -> DefectSet;
}

// Tree-sitter parsers are expensive to create but reusable, so each worker
// thread keeps its own pre-configured instance.
thread_local! {
    static PYTHON_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        // Ignore error here - will be caught at parse time if language fails
        let _ = p.set_language(&tree_sitter_python::LANGUAGE.into());
        p
    });
}

/// Names the name-resolution pass treats as always defined.
const PYTHON_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "callable", "chr", "dict", "dir",
    "divmod", "enumerate", "filter", "float", "format", "frozenset", "getattr",
    "hasattr", "hash", "hex", "id", "input", "int", "isinstance", "issubclass",
    "iter", "len", "list", "map", "max", "min", "next", "object", "open",
    "ord", "pow", "print", "range", "repr", "reversed", "round", "set",
    "setattr", "sorted", "staticmethod", "classmethod", "property", "str",
    "sum", "super", "tuple", "type", "vars", "zip", "Exception", "ValueError",
    "TypeError", "KeyError", "IndexError", "AttributeError", "RuntimeError",
    "StopIteration", "NotImplementedError", "OSError", "IOError", "None",
    "True", "False", "NotImplemented", "Ellipsis", "__name__", "__file__",
    "__doc__", "self", "cls",
];

/// Syntactic + scope-naive name checker for Python sources.
pub struct PythonAnalyzer;

impl PythonAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyzer for PythonAnalyzer {
    async fn analyze(&self, source: &str) -> DefectSet {
        let tree = PYTHON_PARSER.with(|p| p.borrow_mut().parse(source, None));

        let tree = match tree {
            Some(t) => t,
            None => {
                return DefectSet::new(vec![Defect::new(
                    DefectKind::Other,
                    "analyzer could not parse input",
                )]);
            }
        };

        let root = tree.root_node();
        let syntax = collect_syntax_defects(&root, source);

        // Name resolution only runs on a syntactically valid tree; a broken
        // tree makes identifier positions unreliable.
        if !syntax.is_empty() {
            return DefectSet::new(syntax);
        }

        DefectSet::new(collect_name_defects(&root, source))
    }
}

fn collect_syntax_defects(root: &Node, source: &str) -> Vec<Defect> {
    let mut defects = Vec::new();
    let mut cursor = root.walk();

    loop {
        let node = cursor.node();

        if node.is_error() {
            let snippet = node_text(&node, source);
            let message = if snippet.is_empty() {
                "invalid syntax".to_string()
            } else {
                format!("invalid syntax near '{}'", truncate(&collapse_whitespace(&snippet), 40))
            };
            defects.push(located(DefectKind::Syntax, message, &node));
            // Children of an ERROR node are fragments of the same problem
            if !goto_next(&mut cursor, false) {
                break;
            }
            continue;
        }

        if node.is_missing() {
            let message = if node.kind().is_empty() {
                "unexpected EOF while parsing".to_string()
            } else {
                format!("unexpected EOF while parsing, expected '{}'", node.kind())
            };
            defects.push(located(DefectKind::Syntax, message, &node));
        }

        if !goto_next(&mut cursor, true) {
            break;
        }
    }

    defects
}

/// Flag identifiers used without any binding in the module. Scope-naive by
/// design: one namespace per file, which matches how the repair prompts
/// describe the problem to the model.
fn collect_name_defects(root: &Node, source: &str) -> Vec<Defect> {
    let mut bound: HashSet<String> = PYTHON_BUILTINS.iter().map(|s| s.to_string()).collect();
    let mut binding_nodes: HashSet<usize> = HashSet::new();
    collect_bindings(root, source, &mut bound, &mut binding_nodes);

    let mut defects = Vec::new();
    let mut reported: HashSet<String> = HashSet::new();
    let mut cursor = root.walk();

    loop {
        let node = cursor.node();

        if node.kind() == "identifier" && !binding_nodes.contains(&node.id()) {
            let name = node_text(&node, source);
            if !name.is_empty()
                && !bound.contains(&name)
                && !is_non_lookup_position(&node)
                && reported.insert(name.clone())
            {
                defects.push(located(
                    DefectKind::Name,
                    format!("name '{}' is not defined", name),
                    &node,
                ));
            }
        }

        if !goto_next(&mut cursor, true) {
            break;
        }
    }

    defects
}

/// Record every name-binding construct: assignments, def/class names and
/// parameters, imports, loop targets, `as` aliases, comprehension variables.
fn collect_bindings(
    root: &Node,
    source: &str,
    bound: &mut HashSet<String>,
    binding_nodes: &mut HashSet<usize>,
) {
    let mut cursor = root.walk();

    loop {
        let node = cursor.node();

        match node.kind() {
            "function_definition" | "class_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    bind_identifiers(&name, source, bound, binding_nodes);
                }
                if let Some(params) = node.child_by_field_name("parameters") {
                    bind_identifiers(&params, source, bound, binding_nodes);
                }
            }
            "assignment" | "named_expression" => {
                if let Some(left) = node.child_by_field_name("left")
                    .or_else(|| node.child_by_field_name("name"))
                {
                    bind_identifiers(&left, source, bound, binding_nodes);
                }
            }
            "for_statement" | "for_in_clause" => {
                if let Some(left) = node.child_by_field_name("left") {
                    bind_identifiers(&left, source, bound, binding_nodes);
                }
            }
            "import_statement" | "import_from_statement" => {
                bind_identifiers(&node, source, bound, binding_nodes);
            }
            "as_pattern" => {
                if let Some(alias) = node.child_by_field_name("alias") {
                    bind_identifiers(&alias, source, bound, binding_nodes);
                }
            }
            "lambda" => {
                if let Some(params) = node.child_by_field_name("parameters") {
                    bind_identifiers(&params, source, bound, binding_nodes);
                }
            }
            "global_statement" | "nonlocal_statement" | "except_clause" => {
                for i in 0..node.named_child_count() {
                    if let Some(child) = node.named_child(i) {
                        if child.kind() == "identifier" {
                            bind_identifiers(&child, source, bound, binding_nodes);
                        }
                    }
                }
            }
            _ => {}
        }

        if !goto_next(&mut cursor, true) {
            break;
        }
    }
}

/// Bind every identifier in the subtree rooted at `node`.
fn bind_identifiers(
    node: &Node,
    source: &str,
    bound: &mut HashSet<String>,
    binding_nodes: &mut HashSet<usize>,
) {
    let mut cursor = node.walk();
    loop {
        let n = cursor.node();
        if n.kind() == "identifier" {
            bound.insert(node_text(&n, source));
            binding_nodes.insert(n.id());
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.node().id() == node.id() {
                return;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Attribute names and keyword-argument names are not module-level lookups.
fn is_non_lookup_position(node: &Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "attribute" => parent
            .child_by_field_name("attribute")
            .map(|a| a.id() == node.id())
            .unwrap_or(false),
        "keyword_argument" => parent
            .child_by_field_name("name")
            .map(|a| a.id() == node.id())
            .unwrap_or(false),
        "dotted_name" => true,
        _ => false,
    }
}

fn located(kind: DefectKind, message: String, node: &Node) -> Defect {
    let pos = node.start_position();
    Defect::new(kind, message).at(pos.row + 1, pos.column + 1)
}

fn node_text(node: &Node, source: &str) -> String {
    node.utf8_text(source.as_bytes()).unwrap_or_default().to_string()
}

/// Advance a cursor in document order. With `descend` false the current
/// node's subtree is skipped. Returns false when the walk is complete.
fn goto_next(cursor: &mut tree_sitter::TreeCursor, descend: bool) -> bool {
    if descend && cursor.goto_first_child() {
        return true;
    }
    loop {
        if cursor.goto_next_sibling() {
            return true;
        }
        if !cursor.goto_parent() {
            return false;
        }
    }
}
