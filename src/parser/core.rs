use std::ops::Range;

use anyhow::anyhow;
use tree_sitter::{Language, Node, Parser, Tree};

use crate::error::{PysliceError, Result};

/// Python 2 statements tree-sitter accepts but a Python 3 compiler rejects.
const PY2_ONLY_KINDS: &[&str] = &["print_statement", "exec_statement"];

pub(crate) fn python_language() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

/// Immutable source text together with its parsed tree.
pub struct SourceUnit {
    text: String,
    tree: Tree,
}

impl std::fmt::Debug for SourceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceUnit")
            .field("bytes", &self.text.len())
            .field("root", &self.tree.root_node().kind())
            .finish()
    }
}

impl SourceUnit {
    /// Parse Python source. Fails with `SyntaxInvalid` pointing at the first
    /// error/missing node, never returns a partially recovered tree.
    pub fn parse(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let mut parser = Parser::new();
        parser
            .set_language(&python_language())
            .map_err(|e| PysliceError::UnsupportedLanguage(e.to_string()))?;

        let tree = parser
            .parse(&text, None)
            .ok_or_else(|| PysliceError::Internal(anyhow!("parser produced no tree")))?;

        if let Some((line, column)) = first_syntax_error(tree.root_node()) {
            return Err(PysliceError::SyntaxInvalid { line, column });
        }

        Ok(Self { text, tree })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Source text covered by `node`.
    pub fn slice(&self, node: Node<'_>) -> &str {
        &self.text[node.byte_range()]
    }

    pub fn span(&self, range: Range<usize>) -> &str {
        &self.text[range]
    }
}

/// 1-based line of a node.
pub(crate) fn line_of(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

pub(crate) fn children<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    (0..node.child_count()).filter_map(move |i| node.child(i))
}

pub(crate) fn named_children<'t>(node: Node<'t>) -> impl Iterator<Item = Node<'t>> {
    (0..node.named_child_count()).filter_map(move |i| node.named_child(i))
}

/// Unwraps `decorated_definition` to the class/function it decorates.
pub(crate) fn definition_of(node: Node<'_>) -> Node<'_> {
    if node.kind() == "decorated_definition" {
        if let Some(def) = node.child_by_field_name("definition") {
            return def;
        }
    }
    node
}

pub(crate) fn is_async_function(node: Node<'_>) -> bool {
    node.kind() == "function_definition" && children(node).any(|c| c.kind() == "async")
}

fn first_syntax_error(root: Node<'_>) -> Option<(usize, usize)> {
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() || PY2_ONLY_KINDS.contains(&node.kind()) {
            let pos = node.start_position();
            return Some((pos.row + 1, pos.column + 1));
        }
        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }

    // has_error без конкретного узла: указываем на начало файла
    root.has_error().then_some((1, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_source() {
        let unit = SourceUnit::parse("import os\n\nclass A:\n    pass\n").unwrap();
        assert_eq!(unit.root().kind(), "module");
        assert_eq!(unit.root().named_child_count(), 2);
    }

    #[test]
    fn test_parse_empty_source() {
        let unit = SourceUnit::parse("").unwrap();
        assert_eq!(unit.root().named_child_count(), 0);
    }

    #[test]
    fn test_syntax_error_is_reported_with_position() {
        let err = SourceUnit::parse("class A:\n    def f(self:\n        pass\n").unwrap_err();
        assert!(matches!(err, PysliceError::SyntaxInvalid { .. }));
    }

    #[test]
    fn test_python2_print_is_rejected() {
        let err =
            SourceUnit::parse("class A:\n    def f(self):\n        print \"hi\"\n").unwrap_err();
        match err {
            PysliceError::SyntaxInvalid { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_slice_and_line() {
        let unit = SourceUnit::parse("x = 1\nclass Foo(Base):\n    pass\n").unwrap();
        let class = unit.root().named_child(1).unwrap();
        assert_eq!(class.kind(), "class_definition");
        assert_eq!(line_of(class), 2);
        assert!(unit.slice(class).starts_with("class Foo(Base):"));
    }

    #[test]
    fn test_async_function_detection() {
        let unit = SourceUnit::parse("async def f():\n    pass\n\ndef g():\n    pass\n").unwrap();
        let f = unit.root().named_child(0).unwrap();
        let g = unit.root().named_child(1).unwrap();
        assert!(is_async_function(f));
        assert!(!is_async_function(g));
    }
}
