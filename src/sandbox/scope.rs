//! Static name resolution for function-like scopes.
//!
//! Bodies of `def`, `lambda` and comprehensions are not run by the executor.
//! Instead each one is scanned into a [`Scope`] tree, and every name it loads
//! must resolve to a local binding, an enclosing function scope, a module
//! global or a builtin.

use std::collections::HashSet;

use tree_sitter::Node;

use crate::parser::core::{line_of, named_children, SourceUnit};
use crate::parser::parse_import;

const COMPREHENSION_KINDS: &[&str] = &[
    "list_comprehension",
    "set_comprehension",
    "dictionary_comprehension",
    "generator_expression",
];

const SEQUENCE_TARGETS: &[&str] = &[
    "pattern_list",
    "tuple_pattern",
    "list_pattern",
    "tuple",
    "list",
    "parenthesized_expression",
    "expression_list",
    "as_pattern_target",
    "list_splat_pattern",
    "dictionary_splat_pattern",
    "list_splat",
    "parenthesized_list_splat",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Function,
    Lambda,
    Comprehension,
    Class,
}

/// A name loaded somewhere in a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NameRef {
    pub name: String,
    pub line: usize,
}

#[derive(Debug)]
pub(crate) struct Scope {
    pub kind: ScopeKind,
    bindings: HashSet<String>,
    globals: HashSet<String>,
    nonlocals: HashSet<String>,
    /// `:=` targets of a comprehension, bound in the enclosing scope
    escaping: HashSet<String>,
    loads: Vec<NameRef>,
    children: Vec<Scope>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            bindings: HashSet::new(),
            globals: HashSet::new(),
            nonlocals: HashSet::new(),
            escaping: HashSet::new(),
            loads: Vec::new(),
            children: Vec::new(),
        }
    }

    fn bind(&mut self, name: &str) {
        self.bindings.insert(name.to_string());
    }

    fn bind_walrus(&mut self, name: &str) {
        if self.kind == ScopeKind::Comprehension {
            self.escaping.insert(name.to_string());
        } else {
            self.bind(name);
        }
    }

    fn load(&mut self, name: &str, line: usize) {
        self.loads.push(NameRef {
            name: name.to_string(),
            line,
        });
    }

    /// `:=` targets that leave this comprehension.
    pub(crate) fn escaping(&self) -> impl Iterator<Item = &str> {
        self.escaping.iter().map(String::as_str)
    }

    /// Module globals assigned through `global` declarations in this scope tree.
    pub(crate) fn global_stores(&self, out: &mut HashSet<String>) {
        out.extend(self.globals.intersection(&self.bindings).cloned());
        for child in &self.children {
            child.global_stores(out);
        }
    }

    /// Loads in this scope tree that resolve neither locally nor through
    /// `is_module_name`, in traversal order.
    pub(crate) fn unresolved(&self, is_module_name: &dyn Fn(&str) -> bool) -> Vec<NameRef> {
        let mut misses = Vec::new();
        let mut chain = Vec::new();
        self.collect_unresolved(&mut chain, is_module_name, &mut misses);
        misses
    }

    fn collect_unresolved<'s>(
        &'s self,
        chain: &mut Vec<&'s Scope>,
        is_module_name: &dyn Fn(&str) -> bool,
        misses: &mut Vec<NameRef>,
    ) {
        for load in &self.loads {
            if !self.resolves(&load.name, chain, is_module_name) {
                misses.push(load.clone());
            }
        }
        chain.push(self);
        for child in &self.children {
            child.collect_unresolved(chain, is_module_name, misses);
        }
        chain.pop();
    }

    fn resolves(
        &self,
        name: &str,
        chain: &[&Scope],
        is_module_name: &dyn Fn(&str) -> bool,
    ) -> bool {
        if self.globals.contains(name) {
            return is_module_name(name);
        }
        if self.bindings.contains(name) || self.nonlocals.contains(name) || self.implicit(name) {
            return true;
        }
        // тела классов не видны из вложенных функций
        for scope in chain.iter().rev().filter(|s| s.kind != ScopeKind::Class) {
            if scope.globals.contains(name) {
                break;
            }
            if scope.bindings.contains(name) || scope.nonlocals.contains(name) {
                return true;
            }
        }
        is_module_name(name)
    }

    fn implicit(&self, name: &str) -> bool {
        match self.kind {
            ScopeKind::Function => name == "__class__",
            ScopeKind::Class => matches!(name, "__module__" | "__qualname__" | "__annotations__"),
            _ => false,
        }
    }
}

/// Expressions a `def` or `lambda` evaluates when the definition runs:
/// parameter defaults and, unless annotations are lazy, annotations.
pub(crate) fn definition_time_exprs(def: Node<'_>, lazy_annotations: bool) -> Vec<Node<'_>> {
    let mut exprs = Vec::new();
    if let Some(params) = def.child_by_field_name("parameters") {
        for param in named_children(params) {
            match param.kind() {
                "default_parameter" => exprs.extend(param.child_by_field_name("value")),
                "typed_default_parameter" => {
                    if !lazy_annotations {
                        exprs.extend(param.child_by_field_name("type"));
                    }
                    exprs.extend(param.child_by_field_name("value"));
                }
                "typed_parameter" if !lazy_annotations => {
                    exprs.extend(param.child_by_field_name("type"))
                }
                _ => {}
            }
        }
    }
    if !lazy_annotations {
        exprs.extend(def.child_by_field_name("return_type"));
    }
    exprs
}

/// Iterable of the first `for` clause, evaluated in the enclosing scope.
pub(crate) fn first_iterables(comprehension: Node<'_>) -> Vec<Node<'_>> {
    named_children(comprehension)
        .find(|c| c.kind() == "for_in_clause")
        .map(|clause| field_children(clause, "right"))
        .unwrap_or_default()
}

pub(crate) fn is_comprehension(node: Node<'_>) -> bool {
    COMPREHENSION_KINDS.contains(&node.kind())
}

/// Tuple/list/starred targets that unpack into their elements.
pub(crate) fn is_sequence_target(node: Node<'_>) -> bool {
    SEQUENCE_TARGETS.contains(&node.kind())
}

fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

/// Children of `node` paired with their field names.
fn with_fields<'t>(node: Node<'t>) -> impl Iterator<Item = (Option<&'static str>, Node<'t>)> {
    (0..node.child_count()).filter_map(move |i| {
        node.child(i)
            .map(|child| (node.field_name_for_child(i as u32), child))
    })
}

pub(crate) struct ScopeScanner<'u> {
    unit: &'u SourceUnit,
    lazy_annotations: bool,
}

impl<'u> ScopeScanner<'u> {
    pub(crate) fn new(unit: &'u SourceUnit, lazy_annotations: bool) -> Self {
        Self {
            unit,
            lazy_annotations,
        }
    }

    pub(crate) fn function(&self, def: Node<'_>) -> Scope {
        let mut scope = Scope::new(ScopeKind::Function);
        if let Some(params) = def.child_by_field_name("parameters") {
            self.bind_parameters(params, &mut scope);
        }
        if let Some(body) = def.child_by_field_name("body") {
            self.visit(body, &mut scope);
        }
        scope
    }

    pub(crate) fn lambda(&self, node: Node<'_>) -> Scope {
        let mut scope = Scope::new(ScopeKind::Lambda);
        if let Some(params) = node.child_by_field_name("parameters") {
            self.bind_parameters(params, &mut scope);
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body, &mut scope);
        }
        scope
    }

    /// Comprehension scope, without its first iterable.
    pub(crate) fn comprehension(&self, node: Node<'_>) -> Scope {
        let mut scope = Scope::new(ScopeKind::Comprehension);
        let outer: Vec<usize> = first_iterables(node).iter().map(|n| n.id()).collect();

        for child in named_children(node) {
            if child.kind() != "for_in_clause" {
                self.visit(child, &mut scope);
                continue;
            }
            for (field, part) in with_fields(child) {
                match field {
                    Some("left") => self.bind_target(part, &mut scope),
                    Some("right") if outer.contains(&part.id()) => {}
                    _ if part.is_named() => self.visit(part, &mut scope),
                    _ => {}
                }
            }
        }
        scope
    }

    /// Names captured by a `case` pattern.
    pub(crate) fn captures(&self, pattern: Node<'_>) -> Vec<String> {
        let mut scope = Scope::new(ScopeKind::Function);
        self.bind_pattern(pattern, &mut scope);
        let mut names: Vec<String> = scope.bindings.into_iter().collect();
        names.sort();
        names
    }

    fn class(&self, node: Node<'_>) -> Scope {
        let mut scope = Scope::new(ScopeKind::Class);
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body, &mut scope);
        }
        scope
    }

    fn name_of(&self, node: Node<'_>) -> Option<&str> {
        node.child_by_field_name("name").map(|n| self.unit.slice(n))
    }

    fn visit(&self, node: Node<'_>, scope: &mut Scope) {
        match node.kind() {
            "identifier" => scope.load(self.unit.slice(node), line_of(node)),
            "comment" | "string_content" | "escape_sequence" | "integer" | "float" => {}
            "attribute" => {
                if let Some(object) = node.child_by_field_name("object") {
                    self.visit(object, scope);
                }
            }
            "keyword_argument" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.visit(value, scope);
                }
            }
            "dotted_name" => {
                if let Some(first) = node.named_child(0) {
                    self.visit(first, scope);
                }
            }
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                if let Some(stmt) = parse_import(self.unit, node) {
                    for name in stmt.bound_names() {
                        scope.bind(name);
                    }
                }
            }
            "global_statement" => {
                for name in named_children(node) {
                    scope.globals.insert(self.unit.slice(name).to_string());
                }
            }
            "nonlocal_statement" => {
                for name in named_children(node) {
                    scope.nonlocals.insert(self.unit.slice(name).to_string());
                }
            }
            "decorated_definition" => {
                for decorator in named_children(node).filter(|c| c.kind() == "decorator") {
                    for expr in named_children(decorator) {
                        self.visit(expr, scope);
                    }
                }
                if let Some(def) = node.child_by_field_name("definition") {
                    self.visit(def, scope);
                }
            }
            "function_definition" => {
                for expr in definition_time_exprs(node, self.lazy_annotations) {
                    self.visit(expr, scope);
                }
                if let Some(name) = self.name_of(node) {
                    scope.bind(name);
                }
                let child = self.function(node);
                scope.children.push(child);
            }
            "class_definition" => {
                if let Some(bases) = node.child_by_field_name("superclasses") {
                    self.visit(bases, scope);
                }
                if let Some(name) = self.name_of(node) {
                    scope.bind(name);
                }
                let child = self.class(node);
                scope.children.push(child);
            }
            "lambda" => {
                for expr in definition_time_exprs(node, true) {
                    self.visit(expr, scope);
                }
                let child = self.lambda(node);
                scope.children.push(child);
            }
            kind if COMPREHENSION_KINDS.contains(&kind) => {
                for expr in first_iterables(node) {
                    self.visit(expr, scope);
                }
                let child = self.comprehension(node);
                for name in child.escaping.iter() {
                    scope.bind_walrus(name);
                }
                scope.children.push(child);
            }
            "assignment" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.bind_target(left, scope);
                }
                // аннотации локальных переменных не вычисляются
                if let Some(annotation) = node.child_by_field_name("type") {
                    if scope.kind == ScopeKind::Class && !self.lazy_annotations {
                        self.visit(annotation, scope);
                    }
                }
                if let Some(right) = node.child_by_field_name("right") {
                    self.visit(right, scope);
                }
            }
            "augmented_assignment" => {
                if let Some(left) = node.child_by_field_name("left") {
                    self.bind_target(left, scope);
                    self.visit(left, scope);
                }
                if let Some(right) = node.child_by_field_name("right") {
                    self.visit(right, scope);
                }
            }
            "named_expression" => {
                if let Some(name) = self.name_of(node) {
                    scope.bind_walrus(name);
                }
                if let Some(value) = node.child_by_field_name("value") {
                    self.visit(value, scope);
                }
            }
            "for_statement" => {
                for (field, part) in with_fields(node) {
                    match field {
                        Some("left") => self.bind_target(part, scope),
                        _ if part.is_named() => self.visit(part, scope),
                        _ => {}
                    }
                }
            }
            "as_pattern" => {
                for (field, part) in with_fields(node) {
                    match field {
                        Some("alias") => self.bind_target(part, scope),
                        _ if part.is_named() => self.visit(part, scope),
                        _ => {}
                    }
                }
            }
            "except_clause" | "except_group_clause" => {
                let mut after_as = false;
                for (_, part) in with_fields(node) {
                    if part.kind() == "as" {
                        after_as = true;
                    } else if part.is_named() && after_as {
                        self.bind_target(part, scope);
                        after_as = false;
                    } else if part.is_named() {
                        self.visit(part, scope);
                    }
                }
            }
            "delete_statement" => {
                for target in named_children(node) {
                    self.bind_target(target, scope);
                }
            }
            "type_alias_statement" => {
                if let Some(name) = node.named_child(0) {
                    self.bind_target(name, scope);
                }
                if let Some(value) = node.child_by_field_name("right") {
                    self.visit(value, scope);
                }
            }
            "case_clause" => {
                for part in named_children(node) {
                    if part.kind() == "case_pattern" {
                        self.bind_pattern(part, scope);
                    } else {
                        self.visit(part, scope);
                    }
                }
            }
            _ => {
                for child in named_children(node) {
                    self.visit(child, scope);
                }
            }
        }
    }

    fn bind_target(&self, node: Node<'_>, scope: &mut Scope) {
        match node.kind() {
            "identifier" => scope.bind(self.unit.slice(node)),
            _ if is_sequence_target(node) => {
                for child in named_children(node) {
                    self.bind_target(child, scope);
                }
            }
            // `type X = ...`: имя обёрнуто в type
            "type" => {
                if let Some(inner) = node.named_child(0) {
                    self.bind_target(inner, scope);
                }
            }
            _ => self.visit(node, scope),
        }
    }

    fn bind_parameters(&self, params: Node<'_>, scope: &mut Scope) {
        for param in named_children(params) {
            match param.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" | "tuple_pattern" => {
                    self.bind_target(param, scope)
                }
                "default_parameter" | "typed_default_parameter" => {
                    if let Some(name) = param.child_by_field_name("name") {
                        self.bind_target(name, scope);
                    }
                }
                "typed_parameter" => {
                    if let Some(name) = param.named_child(0) {
                        self.bind_target(name, scope);
                    }
                }
                _ => {}
            }
        }
    }

    /// Capture patterns bind, value patterns load.
    fn bind_pattern(&self, node: Node<'_>, scope: &mut Scope) {
        match node.kind() {
            "dotted_name" if node.named_child_count() == 1 => {
                let name = self.unit.slice(node);
                if name != "_" {
                    scope.bind(name);
                }
            }
            "dotted_name" => self.visit(node, scope),
            "identifier" => scope.bind(self.unit.slice(node)),
            "class_pattern" => {
                for (i, part) in named_children(node).enumerate() {
                    if i == 0 {
                        self.visit(part, scope);
                    } else {
                        self.bind_pattern(part, scope);
                    }
                }
            }
            "keyword_pattern" => {
                for part in named_children(node).skip(1) {
                    self.bind_pattern(part, scope);
                }
            }
            "string" | "concatenated_string" | "integer" | "float" => {}
            _ => {
                for child in named_children(node) {
                    self.bind_pattern(child, scope);
                }
            }
        }
    }
}
