use std::collections::BTreeSet;

use tree_sitter::Node;

use crate::parser::core::{named_children, SourceUnit};

/// Root identifiers referenced anywhere under `node` (a class, decorators included).
///
/// `a.b.c` contributes only `a`. Definition names, keyword-argument names and
/// the module paths of nested imports are not names in Python's AST and are
/// skipped. Local bindings (parameters, `self`, comprehension targets) are kept:
/// over-collection can only pull in an extra import, never drop a needed one.
pub fn collect_usage(unit: &SourceUnit, node: Node<'_>) -> BTreeSet<String> {
    let mut used = BTreeSet::new();
    let mut stack = vec![node];

    while let Some(current) = stack.pop() {
        match current.kind() {
            "identifier" => {
                used.insert(unit.slice(current).to_string());
            }
            "attribute" => {
                if let Some(object) = current.child_by_field_name("object") {
                    stack.push(object);
                }
            }
            "dotted_name" => {
                if let Some(head) = current.named_child(0) {
                    stack.push(head);
                }
            }
            "class_definition" | "function_definition" | "keyword_argument" => {
                let skipped = current.child_by_field_name("name").map(|n| n.id());
                stack.extend(named_children(current).filter(|c| Some(c.id()) != skipped));
            }
            "import_statement"
            | "import_from_statement"
            | "future_import_statement"
            | "global_statement"
            | "nonlocal_statement" => {}
            _ => stack.extend(named_children(current)),
        }
    }

    used
}
