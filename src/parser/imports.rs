use tree_sitter::Node;

use super::core::{line_of, named_children, SourceUnit};
use crate::models::{ImportKind, ImportStatement, ImportedName};

// -- Python: import_statement / import_from_statement / future_import_statement --

/// Module-level import statements in source order. Imports nested in
/// `if`/`try`/function bodies are not part of the module body and are skipped.
pub fn module_imports(unit: &SourceUnit) -> Vec<ImportStatement> {
    named_children(unit.root())
        .filter_map(|node| parse_import(unit, node))
        .collect()
}

/// Parse a single import node; `None` for anything that is not an import.
pub fn parse_import(unit: &SourceUnit, node: Node<'_>) -> Option<ImportStatement> {
    match node.kind() {
        "import_statement" => Some(plain_import(unit, node)),
        "import_from_statement" => Some(from_import(unit, node)),
        "future_import_statement" => Some(future_import(unit, node)),
        _ => None,
    }
}

/// `import a.b.c` binds `a`; `import a.b as c` binds `c`.
fn plain_import(unit: &SourceUnit, node: Node<'_>) -> ImportStatement {
    let names = named_children(node)
        .filter_map(|child| imported_name(unit, child, true))
        .collect();

    ImportStatement {
        kind: ImportKind::Plain,
        module: String::new(),
        level: 0,
        names,
        wildcard: false,
        line: line_of(node),
        text: unit.slice(node).to_string(),
        span: node.byte_range(),
    }
}

/// `from a import b` / `from .a import b as c` / `from a import *`
fn from_import(unit: &SourceUnit, node: Node<'_>) -> ImportStatement {
    let module_node = node.child_by_field_name("module_name");
    let module_end = module_node.map(|m| m.end_byte()).unwrap_or(0);

    let (module, level) = match module_node {
        Some(m) if m.kind() == "relative_import" => {
            let raw = normalize_dotted(unit.slice(m));
            let level = raw.chars().take_while(|c| *c == '.').count();
            (raw[level..].to_string(), level)
        }
        Some(m) => (normalize_dotted(unit.slice(m)), 0),
        None => (String::new(), 0),
    };

    let mut names = Vec::new();
    let mut wildcard = false;
    for child in named_children(node) {
        // module_name тоже dotted_name, пропускаем всё, что до `import`
        if child.start_byte() < module_end {
            continue;
        }
        if child.kind() == "wildcard_import" {
            wildcard = true;
            continue;
        }
        if let Some(name) = imported_name(unit, child, false) {
            names.push(name);
        }
    }

    ImportStatement {
        kind: ImportKind::From,
        module,
        level,
        names,
        wildcard,
        line: line_of(node),
        text: unit.slice(node).to_string(),
        span: node.byte_range(),
    }
}

fn future_import(unit: &SourceUnit, node: Node<'_>) -> ImportStatement {
    let names = named_children(node)
        .filter_map(|child| imported_name(unit, child, false))
        .collect();

    ImportStatement {
        kind: ImportKind::Future,
        module: "__future__".to_string(),
        level: 0,
        names,
        wildcard: false,
        line: line_of(node),
        text: unit.slice(node).to_string(),
        span: node.byte_range(),
    }
}

fn imported_name(unit: &SourceUnit, node: Node<'_>, plain: bool) -> Option<ImportedName> {
    match node.kind() {
        "dotted_name" | "identifier" => {
            let name = normalize_dotted(unit.slice(node));
            let bound = if plain {
                name.split('.').next().unwrap_or(&name).to_string()
            } else {
                name.clone()
            };
            Some(ImportedName { name, bound })
        }
        "aliased_import" => {
            let name = node
                .child_by_field_name("name")
                .map(|n| normalize_dotted(unit.slice(n)))?;
            let bound = node
                .child_by_field_name("alias")
                .map(|n| unit.slice(n).to_string())?;
            Some(ImportedName { name, bound })
        }
        _ => None,
    }
}

/// `a . b` and `a.\\\n b` spell the same dotted path.
fn normalize_dotted(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '\\')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imports(code: &str) -> Vec<ImportStatement> {
        let unit = SourceUnit::parse(code).unwrap();
        module_imports(&unit)
    }

    #[test]
    fn test_plain_import_binds_root() {
        let found = imports("import os.path\nimport numpy as np, sys\n");
        assert_eq!(found.len(), 2);

        assert_eq!(found[0].kind, ImportKind::Plain);
        assert_eq!(found[0].names[0].name, "os.path");
        assert_eq!(found[0].names[0].bound, "os");

        let bound: Vec<&str> = found[1].bound_names().collect();
        assert_eq!(bound, vec!["np", "sys"]);
        assert_eq!(found[1].line, 2);
        assert_eq!(found[1].text, "import numpy as np, sys");
    }

    #[test]
    fn test_from_import_names_and_aliases() {
        let found = imports("from typing import (\n    List,\n    Optional as Opt,\n)\n");
        assert_eq!(found.len(), 1);
        let stmt = &found[0];
        assert_eq!(stmt.kind, ImportKind::From);
        assert_eq!(stmt.module, "typing");
        assert_eq!(stmt.level, 0);
        let bound: Vec<&str> = stmt.bound_names().collect();
        assert_eq!(bound, vec!["List", "Opt"]);
        assert_eq!(stmt.names[1].name, "Optional");
    }

    #[test]
    fn test_relative_and_wildcard_imports() {
        let found =
            imports("from . import sibling\nfrom ..pkg.mod import thing\nfrom os import *\n");
        assert_eq!(found[0].level, 1);
        assert_eq!(found[0].module, "");
        assert!(found[0].is_relative());
        assert_eq!(found[0].names[0].bound, "sibling");

        assert_eq!(found[1].level, 2);
        assert_eq!(found[1].module, "pkg.mod");

        assert!(found[2].wildcard);
        assert!(found[2].names.is_empty());
    }

    #[test]
    fn test_future_import() {
        let found = imports("from __future__ import annotations\n");
        assert_eq!(found[0].kind, ImportKind::Future);
        assert_eq!(found[0].module, "__future__");
        assert_eq!(found[0].names[0].bound, "annotations");
    }

    #[test]
    fn test_nested_imports_are_not_module_level() {
        let found =
            imports("try:\n    import ujson as json\nexcept ImportError:\n    import json\n");
        assert!(found.is_empty());
    }
}
