//! Class extraction: one top-level class plus only the imports it uses.

pub mod select;
pub mod usage;

use std::collections::BTreeSet;

use tree_sitter::Node;

use crate::error::{PysliceError, Result};
use crate::models::ImportStatement;
use crate::parser::core::{definition_of, named_children};
use crate::parser::{module_imports, SourceUnit};

/// Result of extracting one class.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Self-contained source: selected imports, blank line, class
    pub source: String,
    /// Root identifiers referenced by the class
    pub used: BTreeSet<String>,
    /// Selected import statements in original order
    pub imports: Vec<ImportStatement>,
}

/// Extract `class_name` from `source` into a standalone unit.
///
/// `class_name` may be qualified (`pkg.module.Widget`); only the last segment is
/// matched, and only against top-level classes.
pub fn extract(source: &str, class_name: &str) -> Result<String> {
    extract_detailed(source, class_name).map(|e| e.source)
}

pub fn extract_detailed(source: &str, class_name: &str) -> Result<Extraction> {
    let unit = SourceUnit::parse(source)?;
    let leaf = class_name.rsplit('.').next().unwrap_or(class_name);

    let class_node = find_class(&unit, leaf)
        .ok_or_else(|| PysliceError::ClassNotFound(class_name.to_string()))?;

    let used = usage::collect_usage(&unit, class_node);
    let imports = module_imports(&unit);
    let selected: Vec<ImportStatement> = select::select_imports(&imports, &used)
        .into_iter()
        .cloned()
        .collect();

    let mut out = String::new();
    for stmt in &selected {
        out.push_str(&stmt.text);
        out.push('\n');
    }
    if !selected.is_empty() {
        out.push('\n');
    }
    out.push_str(unit.slice(class_node).trim_end());
    out.push('\n');

    tracing::debug!(
        class = leaf,
        used = used.len(),
        imports = imports.len(),
        selected = selected.len(),
        "class extracted"
    );

    Ok(Extraction {
        source: out,
        used,
        imports: selected,
    })
}

/// Names of all top-level classes (plain or decorated), in source order.
pub fn list_classes(source: &str) -> Result<Vec<String>> {
    let unit = SourceUnit::parse(source)?;
    let names = named_children(unit.root())
        .map(definition_of)
        .filter(|def| def.kind() == "class_definition")
        .filter_map(|def| def.child_by_field_name("name"))
        .map(|name| unit.slice(name).to_string())
        .collect();
    Ok(names)
}

/// First top-level class named `name`; the decorated wrapper is returned when
/// the class is decorated so its decorators travel with it.
pub(crate) fn find_class<'t>(unit: &'t SourceUnit, name: &str) -> Option<Node<'t>> {
    named_children(unit.root()).find(|node| {
        let def = definition_of(*node);
        def.kind() == "class_definition"
            && def
                .child_by_field_name("name")
                .map(|n| unit.slice(n) == name)
                .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_classes() {
        let code = "import os\n\nclass A:\n    class Inner:\n        pass\n\n@decorate\nclass B(A):\n    pass\n\ndef helper():\n    class Local:\n        pass\n";
        assert_eq!(list_classes(code).unwrap(), vec!["A", "B"]);
        assert!(list_classes("x = 1\n").unwrap().is_empty());
    }

    const MODULE: &str = r#""""Widgets."""
from __future__ import annotations

import os
import sys, json
import numpy as np
from typing import Any, Dict
from .models import Record
from collections import OrderedDict

LIMIT = 10


def helper():
    return sys.argv


@dataclasses.dataclass
class Unrelated:
    pass


class Widget(Base):
    """A widget."""

    def __init__(self, data: Dict[str, Any]):
        self.data = OrderedDict(data)

    def dump(self):
        return json.dumps(self.data, indent=os.sep)

    class Inner:
        pass
"#;

    #[test]
    fn test_extract_selects_only_used_imports() {
        let out = extract(MODULE, "Widget").unwrap();
        let expected = r#"import os
import sys, json
from typing import Any, Dict
from collections import OrderedDict

class Widget(Base):
    """A widget."""

    def __init__(self, data: Dict[str, Any]):
        self.data = OrderedDict(data)

    def dump(self):
        return json.dumps(self.data, indent=os.sep)

    class Inner:
        pass
"#;
        assert_eq!(out, expected);
    }

    #[test]
    fn test_extract_matches_last_dotted_segment() {
        let direct = extract(MODULE, "Widget").unwrap();
        let qualified = extract(MODULE, "acme.widgets.Widget").unwrap();
        assert_eq!(direct, qualified);
    }

    #[test]
    fn test_extract_is_idempotent() {
        let once = extract(MODULE, "Widget").unwrap();
        let twice = extract(&once, "Widget").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_extract_keeps_decorators() {
        let out = extract(MODULE, "Unrelated").unwrap();
        assert_eq!(out, "@dataclasses.dataclass\nclass Unrelated:\n    pass\n");
    }

    #[test]
    fn test_nested_class_is_not_matched() {
        let err = extract(MODULE, "Inner").unwrap_err();
        assert!(matches!(err, PysliceError::ClassNotFound(ref name) if name == "Inner"));
    }

    #[test]
    fn test_missing_class() {
        let err = extract(MODULE, "helper").unwrap_err();
        assert!(matches!(err, PysliceError::ClassNotFound(_)));
    }

    #[test]
    fn test_syntax_error_is_propagated() {
        let err = extract("class A(:\n    pass\n", "A").unwrap_err();
        assert!(matches!(err, PysliceError::SyntaxInvalid { .. }));
    }

    #[test]
    fn test_output_contains_one_class_and_verbatim_imports() {
        let out = extract_detailed(MODULE, "Widget").unwrap();
        let unit = SourceUnit::parse(out.source.as_str()).unwrap();

        let classes: Vec<_> = named_children(unit.root())
            .filter(|n| definition_of(*n).kind() == "class_definition")
            .collect();
        assert_eq!(classes.len(), 1);

        let original = module_imports(&SourceUnit::parse(MODULE).unwrap());
        for stmt in module_imports(&unit) {
            assert!(original.iter().any(|o| o.text == stmt.text));
            // минимальность: каждый импорт связывает используемое имя
            assert!(stmt.bound_names().any(|n| out.used.contains(n)));
        }
    }

    #[test]
    fn test_class_without_imports() {
        let out = extract("import os\n\nclass A:\n    x = 1\n", "A").unwrap();
        assert_eq!(out, "class A:\n    x = 1\n");
    }
}
