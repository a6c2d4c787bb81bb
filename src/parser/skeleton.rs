use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::core::{children, definition_of, is_async_function, line_of, named_children, SourceUnit};
use crate::error::{PysliceError, Result};
use crate::models::{ClassUnit, Decorator, ProgramUnit, Skeleton, UnitKind};

// === Class Skeletonization ===

const INDENT: &str = "    ";

/// Docstrings are plain or raw/unicode literals; bytes and f-strings are not.
static DOCSTRING_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^(?i)[ru]?['"]"#).unwrap());

/// Генерирует скелет: сигнатуры, декораторы и docstring'и каждого class/def,
/// тела заменены на `pass`. Заголовки вырезаются прямо из исходника по байтовым
/// диапазонам узлов, так что многострочные сигнатуры сохраняют форматирование.
pub fn skeletonize(source: &str) -> Result<Skeleton> {
    let unit = SourceUnit::parse(source)?;

    let mut units = Vec::new();
    for child in named_children(unit.root()) {
        collect_units(&unit, child, 0, &mut units);
    }

    if units.is_empty() {
        return Err(PysliceError::NoProgramUnits);
    }

    let skeleton = render(&units);
    tracing::debug!(
        units = skeleton.unit_count,
        docstrings = skeleton.docstring_count,
        "skeleton generated"
    );
    Ok(skeleton)
}

/// Top-level classes of a source file, each with the program units inside it.
pub fn outline(source: &str) -> Result<Vec<ClassUnit>> {
    let unit = SourceUnit::parse(source)?;

    let mut classes = Vec::new();
    for child in named_children(unit.root()) {
        if definition_of(child).kind() != "class_definition" {
            continue;
        }
        let mut units = Vec::new();
        collect_units(&unit, child, 0, &mut units);
        if let Some(head) = units.first() {
            classes.push(ClassUnit {
                name: head.name.clone(),
                line: head.anchor_line,
                units,
            });
        }
    }

    Ok(classes)
}

/// Рекурсивный обход: каждый class/def (на любой глубине, включая вложенные в
/// if/try/тела функций) становится одним ProgramUnit, в порядке исходника.
fn collect_units(unit: &SourceUnit, node: Node<'_>, depth: usize, out: &mut Vec<ProgramUnit>) {
    match node.kind() {
        "class_definition" | "function_definition" => push_unit(unit, node, None, depth, out),
        "decorated_definition" => {
            let def = definition_of(node);
            if def.id() != node.id() {
                push_unit(unit, def, Some(node), depth, out);
            }
        }
        _ => {
            for child in named_children(node) {
                collect_units(unit, child, depth, out);
            }
        }
    }
}

fn push_unit(
    unit: &SourceUnit,
    def: Node<'_>,
    decorated: Option<Node<'_>>,
    depth: usize,
    out: &mut Vec<ProgramUnit>,
) {
    let index = out.len();
    out.push(program_unit(unit, def, decorated, depth));

    if let Some(body) = def.child_by_field_name("body") {
        for child in named_children(body) {
            collect_units(unit, child, depth + 1, out);
        }
    }

    out[index].nested = out[index + 1..]
        .iter()
        .filter(|u| u.depth == depth + 1)
        .count();
}

fn program_unit(
    unit: &SourceUnit,
    def: Node<'_>,
    decorated: Option<Node<'_>>,
    depth: usize,
) -> ProgramUnit {
    let kind = if def.kind() == "class_definition" {
        UnitKind::Class
    } else if is_async_function(def) {
        UnitKind::AsyncFunction
    } else {
        UnitKind::Function
    };

    let name = def
        .child_by_field_name("name")
        .map(|n| unit.slice(n).to_string())
        .unwrap_or_default();

    let decorators: Vec<Decorator> = decorated
        .map(|d| {
            named_children(d)
                .filter(|c| c.kind() == "decorator")
                .map(|c| Decorator {
                    line: line_of(c),
                    text: unit.slice(c).trim_end().to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let header_line = line_of(def);
    let anchor_line = decorators.first().map(|d| d.line).unwrap_or(header_line);

    ProgramUnit {
        kind,
        name,
        anchor_line,
        header_line,
        depth,
        header: header_text(unit, def),
        decorators,
        docstring: def
            .child_by_field_name("body")
            .and_then(|body| docstring_of(unit, body)),
        nested: 0,
    }
}

/// `class`/`def`/`async def` through the `:` that opens the body.
fn header_text(unit: &SourceUnit, def: Node<'_>) -> String {
    let body_start = def
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or_else(|| def.end_byte());

    let colon_end = children(def)
        .filter(|c| c.kind() == ":" && c.end_byte() <= body_start)
        .last()
        .map(|c| c.end_byte())
        .unwrap_or(body_start);

    unit.span(def.start_byte()..colon_end).trim_end().to_string()
}

/// Raw docstring literal: first statement of the body (comments skipped) that is
/// a lone string expression.
fn docstring_of(unit: &SourceUnit, body: Node<'_>) -> Option<String> {
    let first = named_children(body).find(|c| c.kind() != "comment")?;
    if first.kind() != "expression_statement" || first.named_child_count() != 1 {
        return None;
    }

    let expr = first.named_child(0)?;
    let mut literal = expr;
    // ("implicit"
    //  " concat") тоже docstring
    while literal.kind() == "parenthesized_expression" {
        let mut inner = named_children(literal).filter(|c| c.kind() != "comment");
        match (inner.next(), inner.next()) {
            (Some(only), None) => literal = only,
            _ => return None,
        }
    }
    let is_doc = match literal.kind() {
        "string" => is_doc_literal(unit, literal),
        "concatenated_string" => named_children(literal)
            .all(|part| part.kind() == "string" && is_doc_literal(unit, part)),
        _ => false,
    };

    is_doc.then(|| unit.slice(expr).to_string())
}

fn is_doc_literal(unit: &SourceUnit, string: Node<'_>) -> bool {
    DOCSTRING_PREFIX.is_match(unit.slice(string))
}

fn render(units: &[ProgramUnit]) -> Skeleton {
    let mut fragments: BTreeMap<usize, String> = BTreeMap::new();
    let mut docstring_count = 0;

    for u in units {
        let indent = INDENT.repeat(u.depth);
        let body_indent = INDENT.repeat(u.depth + 1);

        for d in &u.decorators {
            insert_fragment(&mut fragments, d.line, format!("{indent}{}", d.text));
        }

        let mut text = format!("{indent}{}", u.header);
        if let Some(doc) = &u.docstring {
            text.push('\n');
            text.push_str(&body_indent);
            text.push_str(doc);
            docstring_count += 1;
        }
        // Функции всегда pass, классы только если внутри нет юнитов
        if u.kind.is_function() || u.nested == 0 {
            text.push('\n');
            text.push_str(&body_indent);
            text.push_str("pass");
        }

        insert_fragment(&mut fragments, u.header_line, text);
    }

    // декоратор от своего def тоже отделяется пустой строкой, это валидный Python
    let mut out = fragments.into_values().collect::<Vec<_>>().join("\n\n");
    out.push('\n');

    Skeleton {
        text: out,
        unit_count: units.len(),
        docstring_count,
    }
}

/// A later fragment on the same line replaces the earlier one.
fn insert_fragment(fragments: &mut BTreeMap<usize, String>, line: usize, fragment: String) {
    if let Some(replaced) = fragments.insert(line, fragment) {
        tracing::debug!(line, %replaced, "skeleton fragment overwritten");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_parses(text: &str) {
        assert!(SourceUnit::parse(text).is_ok(), "skeleton does not parse:\n{text}");
    }

    #[test]
    fn test_skeleton_keeps_signatures_docstrings_and_decorators() {
        let code = r#"import functools


class Cache(object):
    """In-memory cache."""

    size = 10

    def __init__(self, size=10):
        self.size = size

    @functools.lru_cache(maxsize=None)
    def get(self, key):
        """Return cached value."""
        return self._data[key]

    async def refresh(self):
        await self._reload()
"#;
        let skeleton = skeletonize(code).unwrap();
        let expected = r#"class Cache(object):
    """In-memory cache."""

    def __init__(self, size=10):
        pass

    @functools.lru_cache(maxsize=None)

    def get(self, key):
        """Return cached value."""
        pass

    async def refresh(self):
        pass
"#;
        assert_eq!(skeleton.text, expected);
        assert_eq!(skeleton.unit_count, 4);
        assert_eq!(skeleton.docstring_count, 2);
        assert_parses(&skeleton.text);
    }

    #[test]
    fn test_multiline_header_is_preserved() {
        let code = "class Service(\n    Base,\n    Mixin,\n):\n    def call(\n        self,\n        payload: dict,\n    ) -> dict:\n        return payload\n";
        let skeleton = skeletonize(code).unwrap();
        assert!(skeleton
            .text
            .contains("class Service(\n    Base,\n    Mixin,\n):"));
        assert!(skeleton.text.contains(
            "    def call(\n        self,\n        payload: dict,\n    ) -> dict:\n        pass"
        ));
        assert_parses(&skeleton.text);
    }

    #[test]
    fn test_class_without_units_gets_pass() {
        let skeleton =
            skeletonize("class Empty:\n    \"\"\"Nothing here.\"\"\"\n    x = 1\n").unwrap();
        assert_eq!(skeleton.text, "class Empty:\n    \"\"\"Nothing here.\"\"\"\n    pass\n");
        assert_eq!(skeleton.unit_count, 1);
        assert_eq!(skeleton.docstring_count, 1);
    }

    #[test]
    fn test_same_named_siblings_get_their_own_headers() {
        let code = r#"class Temperature:
    @property
    def celsius(self) -> float:
        return self._c

    @celsius.setter
    def celsius(self, value: float) -> None:
        self._c = value
"#;
        let skeleton = skeletonize(code).unwrap();
        assert!(skeleton
            .text
            .contains("    @property\n\n    def celsius(self) -> float:\n        pass"));
        assert!(skeleton.text.contains(
            "    @celsius.setter\n\n    def celsius(self, value: float) -> None:\n        pass"
        ));
        assert_eq!(skeleton.unit_count, 3);
    }

    #[test]
    fn test_definitions_inside_compound_statements_are_normalised() {
        let code = r#"class Compat:
    if PY2:
        def text(self):
            return unicode(self)
    else:
        def text(self):
            return str(self)

    def run(self):
        def helper():
            return 1
        return helper()
"#;
        let skeleton = skeletonize(code).unwrap();
        assert_eq!(skeleton.unit_count, 5);
        assert!(skeleton.text.contains("\n    def text(self):\n        pass"));
        assert!(skeleton.text.contains("\n        def helper():\n            pass"));
        assert_parses(&skeleton.text);
    }

    #[test]
    fn test_docstring_detection_rules() {
        let code = r#"class A:
    # leading comment
    '''Raw docstring.'''

    def f(self):
        f"not {self} a docstring"

    def g(self):
        b"bytes are not docstrings"

    def h(self): r"one-liner"
"#;
        let skeleton = skeletonize(code).unwrap();
        assert_eq!(skeleton.docstring_count, 2);
        assert!(skeleton.text.contains("class A:\n    '''Raw docstring.'''"));
        assert!(skeleton.text.contains("    def h(self):\n        r\"one-liner\"\n        pass"));
        assert!(!skeleton.text.contains("not {self}"));
        assert_parses(&skeleton.text);
    }

    #[test]
    fn test_parenthesized_docstring() {
        let code = "class A:\n    (\"implicit\"\n     \" concat\")\n\n    def f(self):\n        (\"single\")\n\n    def g(self):\n        (\"not\", \"a docstring\")\n";
        let skeleton = skeletonize(code).unwrap();
        assert_eq!(skeleton.docstring_count, 2);
        assert!(skeleton.text.contains("class A:\n    (\"implicit\"\n     \" concat\")\n"));
        assert!(skeleton.text.contains("    def f(self):\n        (\"single\")\n        pass"));
        assert!(!skeleton.text.contains("a docstring"));
        assert_parses(&skeleton.text);
    }

    #[test]
    fn test_decorator_fragment_separated_by_blank_line() {
        let code = "class A:\n    @staticmethod\n    @cache\n    def f():\n        return 1\n";
        let skeleton = skeletonize(code).unwrap();
        assert_eq!(
            skeleton.text,
            "class A:\n\n    @staticmethod\n\n    @cache\n\n    def f():\n        pass\n"
        );
        assert_parses(&skeleton.text);
    }

    #[test]
    fn test_no_program_units() {
        let err = skeletonize("import os\nx = 1\n").unwrap_err();
        assert!(matches!(err, PysliceError::NoProgramUnits));
    }

    #[test]
    fn test_syntax_error_propagates() {
        let err = skeletonize("class A(:\n    pass\n").unwrap_err();
        assert!(matches!(err, PysliceError::SyntaxInvalid { .. }));
    }

    #[test]
    fn test_outline_lists_top_level_classes() {
        let code = "@dataclass\nclass Point:\n    x: int\n\ndef helper():\n    pass\n\nclass Line:\n    def length(self):\n        pass\n";
        let classes = outline(code).unwrap();
        let names: Vec<&str> = classes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Point", "Line"]);
        assert_eq!(classes[0].line, 1);
        assert_eq!(classes[0].units[0].decorators[0].text, "@dataclass");
        assert_eq!(classes[1].units.len(), 2);
        assert_eq!(classes[1].units[0].nested, 1);
        assert_eq!(classes[1].units[1].kind, UnitKind::Function);
    }
}
