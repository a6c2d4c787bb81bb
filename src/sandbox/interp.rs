//! In-process abstract execution of a unit.
//!
//! Module statements and class bodies run in order, the way an interpreter
//! would import the unit. Values are tracked only as far as needed to tell a
//! module object and a placeholder `None` apart from everything else.
//! Function, lambda and comprehension bodies are checked statically once the
//! module namespace is complete.

use std::collections::{HashMap, HashSet};

use tree_sitter::Node;

use super::names::is_builtin;
use super::resolver::{ModuleResolver, Value};
use super::scope::{
    definition_time_exprs, first_iterables, is_comprehension, is_sequence_target, Scope,
    ScopeScanner,
};
use super::{Raised, Sandbox, Verdict};
use crate::models::ImportKind;
use crate::parser::core::{children, definition_of, line_of, named_children, SourceUnit};
use crate::parser::{module_imports, parse_import};

type Env = HashMap<String, Value>;
type Exec<T> = std::result::Result<T, Raised>;

/// Default backend: never spawns a process, never imports anything.
#[derive(Debug, Default, Clone)]
pub struct StaticSandbox {
    known_modules: Vec<String>,
}

impl StaticSandbox {
    /// `known_modules` resolve like stdlib modules instead of becoming placeholders.
    pub fn new(known_modules: Vec<String>) -> Self {
        Self { known_modules }
    }
}

impl Sandbox for StaticSandbox {
    fn name(&self) -> &'static str {
        "static"
    }

    fn execute(&self, unit: &SourceUnit) -> Verdict {
        let mut executor = Executor::new(unit, ModuleResolver::new(&self.known_modules));
        let result = executor.run();
        let placeholders = executor.resolver.placeholders();
        if !placeholders.is_empty() {
            tracing::debug!(?placeholders, "placeholder modules used");
        }
        match result {
            Ok(()) => Verdict::Valid,
            Err(raised) => raised.into_verdict(),
        }
    }
}

/// `None` is falsy, modules are truthy, the rest is unknown.
fn truthiness(value: &Value) -> Option<bool> {
    match value {
        Value::Placeholder => Some(false),
        Value::Module(_) => Some(true),
        Value::Opaque => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Placeholder => "NoneType",
        Value::Module(_) => "module",
        Value::Opaque => "object",
    }
}

fn ensure_callable(value: &Value) -> Exec<()> {
    match value {
        Value::Opaque => Ok(()),
        other => Err(Raised::other(
            "TypeError",
            format!("'{}' object is not callable", type_name(other)),
        )),
    }
}

fn ensure_subscriptable(value: &Value) -> Exec<()> {
    match value {
        Value::Opaque => Ok(()),
        other => Err(Raised::other(
            "TypeError",
            format!("'{}' object is not subscriptable", type_name(other)),
        )),
    }
}

fn ensure_iterable(value: &Value) -> Exec<()> {
    match value {
        Value::Opaque => Ok(()),
        other => Err(Raised::other(
            "TypeError",
            format!("'{}' object is not iterable", type_name(other)),
        )),
    }
}

fn ensure_base(value: &Value) -> Exec<()> {
    match value {
        Value::Opaque => Ok(()),
        Value::Placeholder => Err(Raised::other("TypeError", "NoneType takes no arguments")),
        Value::Module(_) => Err(Raised::other(
            "TypeError",
            "module() takes at most 2 arguments (3 given)",
        )),
    }
}

fn syntax_error(node: Node<'_>) -> Raised {
    let pos = node.start_position();
    Raised::SyntaxError {
        line: pos.row + 1,
        column: pos.column + 1,
    }
}

/// Outcome of code that may not run at all: only compile-time errors stand.
fn may_not_run<T>(outcome: Exec<T>) -> Exec<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(raised @ Raised::SyntaxError { .. }) => Err(raised),
        Err(raised) => {
            tracing::trace!(exception = raised.exception(), "ignored in code that may not run");
            Ok(None)
        }
    }
}

struct Executor<'u> {
    unit: &'u SourceUnit,
    resolver: ModuleResolver,
    globals: Env,
    deferred: Vec<Scope>,
    lazy_annotations: bool,
}

impl<'u> Executor<'u> {
    fn new(unit: &'u SourceUnit, resolver: ModuleResolver) -> Self {
        Self {
            unit,
            resolver,
            globals: Env::new(),
            deferred: Vec::new(),
            lazy_annotations: false,
        }
    }

    fn run(&mut self) -> Exec<()> {
        let unit = self.unit;
        self.lazy_annotations = module_imports(unit).iter().any(|stmt| {
            stmt.kind == ImportKind::Future && stmt.names.iter().any(|n| n.name == "annotations")
        });

        let mut locals = None;
        self.exec_body(unit.root(), &mut locals)?;
        self.check_deferred()
    }

    fn scanner(&self) -> ScopeScanner<'u> {
        ScopeScanner::new(self.unit, self.lazy_annotations)
    }

    fn text(&self, node: Node<'u>) -> &'u str {
        let unit = self.unit;
        unit.slice(node)
    }

    // -- namespace --

    fn store(&mut self, name: &str, value: Value, locals: &mut Option<Env>) {
        match locals {
            Some(env) => env.insert(name.to_string(), value),
            None => self.globals.insert(name.to_string(), value),
        };
    }

    fn lookup(&self, name: &str, line: usize, locals: &Option<Env>) -> Exec<Value> {
        if let Some(value) = locals.as_ref().and_then(|env| env.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if is_builtin(name) {
            return Ok(Value::Opaque);
        }
        Err(Raised::NameError {
            name: name.to_string(),
            line,
        })
    }

    fn delete(&mut self, name: &str, line: usize, locals: &mut Option<Env>) -> Exec<()> {
        let removed = match locals {
            Some(env) => env.remove(name),
            None => self.globals.remove(name),
        };
        match removed {
            Some(_) => Ok(()),
            None => Err(Raised::NameError {
                name: name.to_string(),
                line,
            }),
        }
    }

    // -- statements --

    fn exec_body(&mut self, block: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        for stmt in named_children(block) {
            self.exec_stmt(stmt, locals)?;
        }
        Ok(())
    }

    /// Block that may not run: every statement still binds its names, failures are dropped.
    fn exec_body_maybe(&mut self, block: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        for stmt in named_children(block) {
            if may_not_run(self.exec_stmt(stmt, locals))?.is_none() {
                self.bind_statement_names(stmt, locals);
            }
        }
        Ok(())
    }

    fn bind_statement_names(&mut self, stmt: Node<'u>, locals: &mut Option<Env>) {
        match stmt.kind() {
            "expression_statement" => {
                for assignment in named_children(stmt).filter(|c| c.kind() == "assignment") {
                    if let Some(left) = assignment.child_by_field_name("left") {
                        let _ = self.assign(left, Value::Opaque, locals);
                    }
                }
            }
            "import_statement" | "import_from_statement" => {
                if let Some(import) = parse_import(self.unit, stmt) {
                    for name in &import.names {
                        self.store(&name.bound, Value::Opaque, locals);
                    }
                }
            }
            "class_definition" | "function_definition" | "decorated_definition" => {
                if let Some(name) = definition_of(stmt).child_by_field_name("name") {
                    let name = self.text(name);
                    self.store(name, Value::Opaque, locals);
                }
            }
            _ => {}
        }
    }

    fn exec_stmt(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        match node.kind() {
            "comment" | "pass_statement" | "break_statement" | "continue_statement"
            | "global_statement" | "nonlocal_statement" => Ok(()),
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                self.exec_import(node, locals)
            }
            "class_definition" | "function_definition" | "decorated_definition" => {
                self.exec_definition(node, locals)
            }
            "expression_statement" => {
                for child in named_children(node) {
                    self.eval_or_assign(child, locals)?;
                }
                Ok(())
            }
            "if_statement" => self.exec_if(node, locals),
            "for_statement" => self.exec_for(node, locals),
            "while_statement" => self.exec_while(node, locals),
            "try_statement" => self.exec_try(node, locals),
            "with_statement" => self.exec_with(node, locals),
            "match_statement" => self.exec_match(node, locals),
            "delete_statement" => {
                for target in named_children(node) {
                    self.exec_delete(target, locals)?;
                }
                Ok(())
            }
            "raise_statement" => Err(self.exec_raise(node, locals)?),
            // `return` вне функции не компилируется
            "return_statement" => Err(syntax_error(node)),
            "type_alias_statement" => {
                if let Some(name) = node.named_child(0).and_then(|t| t.named_child(0)) {
                    let name = self.text(name);
                    self.store(name, Value::Opaque, locals);
                }
                Ok(())
            }
            _ => {
                for child in named_children(node) {
                    self.eval(child, locals)?;
                }
                Ok(())
            }
        }
    }

    fn exec_import(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        let Some(stmt) = parse_import(self.unit, node) else {
            return Ok(());
        };

        match stmt.kind {
            ImportKind::Plain => {
                for name in &stmt.names {
                    self.resolver.import(&name.name, 0, &[])?;
                    // `import a.b` binds the top package, `import a.b as c` the leaf
                    let root = name.name.split('.').next().unwrap_or(&name.name);
                    let path = if name.bound == root { root } else { name.name.as_str() };
                    self.store(&name.bound, Value::Module(path.to_string()), locals);
                }
            }
            ImportKind::From | ImportKind::Future => {
                let fromlist: Vec<&str> = stmt.names.iter().map(|n| n.name.as_str()).collect();
                self.resolver.import(&stmt.module, stmt.level, &fromlist)?;
                for name in &stmt.names {
                    let value = self
                        .resolver
                        .attribute(&stmt.module, &name.name)
                        .map_err(|_| Raised::ImportError {
                            module: stmt.module.clone(),
                            reason: format!(
                                "cannot import name '{}' from '{}'",
                                name.name, stmt.module
                            ),
                        })?;
                    self.store(&name.bound, value, locals);
                }
            }
        }
        Ok(())
    }

    fn exec_definition(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        let mut decorators = Vec::new();
        if node.kind() == "decorated_definition" {
            for decorator in named_children(node).filter(|c| c.kind() == "decorator") {
                if let Some(expr) = decorator.named_child(0) {
                    decorators.push(self.eval(expr, locals)?);
                }
            }
        }

        let def = definition_of(node);
        if def.kind() == "class_definition" {
            self.exec_class(def, locals)?;
        } else {
            self.exec_function(def, locals)?;
        }

        // декораторы применяются снизу вверх
        for decorator in decorators.iter().rev() {
            ensure_callable(decorator)?;
        }

        if let Some(name) = def.child_by_field_name("name") {
            let name = self.text(name);
            self.store(name, Value::Opaque, locals);
        }
        Ok(())
    }

    fn exec_class(&mut self, def: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        if let Some(bases) = def.child_by_field_name("superclasses") {
            for arg in named_children(bases) {
                match arg.kind() {
                    "comment" => {}
                    "keyword_argument" => {
                        let value = match arg.child_by_field_name("value") {
                            Some(value) => self.eval(value, locals)?,
                            None => Value::Opaque,
                        };
                        let is_metaclass = arg
                            .child_by_field_name("name")
                            .is_some_and(|n| self.text(n) == "metaclass");
                        if is_metaclass {
                            ensure_callable(&value)?;
                        }
                    }
                    "list_splat" | "dictionary_splat" => {
                        self.eval(arg, locals)?;
                    }
                    _ => {
                        let value = self.eval(arg, locals)?;
                        ensure_base(&value)?;
                    }
                }
            }
        }

        let mut class_locals = Some(Env::from([
            ("__module__".to_string(), Value::Opaque),
            ("__qualname__".to_string(), Value::Opaque),
            ("__annotations__".to_string(), Value::Opaque),
        ]));
        if let Some(body) = def.child_by_field_name("body") {
            self.exec_body(body, &mut class_locals)?;
        }
        Ok(())
    }

    fn exec_function(&mut self, def: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        for expr in definition_time_exprs(def, self.lazy_annotations) {
            self.eval(expr, locals)?;
        }
        let scope = self.scanner().function(def);
        self.deferred.push(scope);
        Ok(())
    }

    fn exec_if(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        let mut branches = vec![(
            node.child_by_field_name("condition"),
            node.child_by_field_name("consequence"),
        )];
        for clause in named_children(node) {
            match clause.kind() {
                "elif_clause" => branches.push((
                    clause.child_by_field_name("condition"),
                    clause.child_by_field_name("consequence"),
                )),
                "else_clause" => branches.push((None, clause.child_by_field_name("body"))),
                _ => {}
            }
        }

        // certain: все предыдущие условия заведомо ложны, ветка точно достижима
        let mut certain = true;
        for (condition, body) in branches {
            let truth = match condition {
                Some(cond) if certain => self.eval_condition(cond, locals)?.1,
                Some(cond) => may_not_run(self.eval_condition(cond, locals))?.and_then(|(_, t)| t),
                None => Some(true),
            };
            let Some(body) = body else { continue };
            match (certain, truth) {
                (_, Some(false)) => {}
                (true, Some(true)) => return self.exec_body(body, locals),
                (false, Some(true)) => return self.exec_body_maybe(body, locals),
                (_, None) => {
                    self.exec_body_maybe(body, locals)?;
                    certain = false;
                }
            }
        }
        Ok(())
    }

    fn exec_for(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        let mut non_empty = None;
        if let Some(iterable) = node.child_by_field_name("right") {
            let (value, truth) = self.eval_condition(iterable, locals)?;
            ensure_iterable(&value)?;
            non_empty = truth;
        }

        let target = node.child_by_field_name("left");
        let body = node.child_by_field_name("body");
        match non_empty {
            Some(false) => {}
            Some(true) => {
                if let Some(target) = target {
                    self.assign(target, Value::Opaque, locals)?;
                }
                if let Some(body) = body {
                    self.exec_body(body, locals)?;
                }
            }
            None => {
                if let Some(target) = target {
                    may_not_run(self.assign(target, Value::Opaque, locals))?;
                }
                if let Some(body) = body {
                    self.exec_body_maybe(body, locals)?;
                }
            }
        }
        self.exec_loop_else(node, non_empty == Some(false), locals)
    }

    fn exec_while(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        let truth = match node.child_by_field_name("condition") {
            Some(cond) => self.eval_condition(cond, locals)?.1,
            None => None,
        };
        // тело выполняется один раз, бесконечный цикл здесь не зависает
        if let Some(body) = node.child_by_field_name("body") {
            match truth {
                Some(false) => {}
                Some(true) => self.exec_body(body, locals)?,
                None => self.exec_body_maybe(body, locals)?,
            }
        }
        self.exec_loop_else(node, truth == Some(false), locals)
    }

    /// `else` of a loop runs for sure only when the body never did.
    fn exec_loop_else(
        &mut self,
        node: Node<'u>,
        certain: bool,
        locals: &mut Option<Env>,
    ) -> Exec<()> {
        let body = named_children(node)
            .find(|c| c.kind() == "else_clause")
            .and_then(|c| c.child_by_field_name("body"));
        match body {
            Some(body) if certain => self.exec_body(body, locals),
            Some(body) => self.exec_body_maybe(body, locals),
            None => Ok(()),
        }
    }

    fn exec_else(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        let body = named_children(node)
            .find(|c| c.kind() == "else_clause")
            .and_then(|c| c.child_by_field_name("body"));
        match body {
            Some(body) => self.exec_body(body, locals),
            None => Ok(()),
        }
    }

    fn exec_try(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        let handlers: Vec<Node<'u>> = named_children(node)
            .filter(|c| matches!(c.kind(), "except_clause" | "except_group_clause"))
            .collect();

        let outcome = match node.child_by_field_name("body") {
            Some(body) => self.exec_body(body, locals),
            None => Ok(()),
        };

        let result = match outcome {
            Ok(()) => self.exec_else(node, locals),
            Err(raised) => match handlers.iter().find(|h| self.handles(**h, &raised)) {
                Some(handler) => {
                    tracing::trace!(exception = raised.exception(), "exception handled");
                    self.exec_handler(*handler, locals)
                }
                None => Err(raised),
            },
        };

        if let Some(finally) = named_children(node).find(|c| c.kind() == "finally_clause") {
            for block in named_children(finally).filter(|c| c.kind() == "block") {
                self.exec_body(block, locals)?;
            }
        }
        result
    }

    /// The exception type expression of an `except` clause, `None` for a bare `except:`.
    fn handler_type(handler: Node<'u>) -> Option<Node<'u>> {
        let first = named_children(handler).find(|c| !matches!(c.kind(), "block" | "comment"))?;
        if first.kind() == "as_pattern" {
            return first.named_child(0);
        }
        Some(first)
    }

    fn handles(&self, handler: Node<'u>, raised: &Raised) -> bool {
        let Some(expr) = Self::handler_type(handler) else {
            return true;
        };
        let mut names = Vec::new();
        self.exception_names(expr, &mut names);
        names.iter().any(|name| raised.caught_by(name))
    }

    fn exception_names(&self, expr: Node<'u>, out: &mut Vec<&'u str>) {
        match expr.kind() {
            "identifier" => out.push(self.text(expr)),
            "attribute" => out.extend(expr.child_by_field_name("attribute").map(|a| self.text(a))),
            "tuple" | "parenthesized_expression" | "expression_list" => {
                for child in named_children(expr) {
                    self.exception_names(child, out);
                }
            }
            _ => {}
        }
    }

    fn exec_handler(&mut self, handler: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        let mut after_as = false;
        for part in children(handler) {
            match part.kind() {
                "as" => after_as = true,
                "as_pattern" => {
                    if let Some(alias) = part.child_by_field_name("alias") {
                        self.assign(alias, Value::Opaque, locals)?;
                    }
                }
                "block" => self.exec_body(part, locals)?,
                _ if after_as && part.is_named() => {
                    self.assign(part, Value::Opaque, locals)?;
                    after_as = false;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn exec_with(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        let mut items = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            for child in named_children(current) {
                match child.kind() {
                    "with_clause" => stack.push(child),
                    "with_item" => items.push(child),
                    _ => {}
                }
            }
        }

        for item in items {
            let value = item
                .child_by_field_name("value")
                .or_else(|| item.named_child(0));
            let Some(value) = value else {
                continue;
            };
            let (expr, alias) = if value.kind() == "as_pattern" {
                (value.named_child(0), value.child_by_field_name("alias"))
            } else {
                (Some(value), None)
            };
            if let Some(expr) = expr {
                let manager = self.eval(expr, locals)?;
                if manager != Value::Opaque {
                    return Err(Raised::other(
                        "TypeError",
                        format!(
                            "'{}' object does not support the context manager protocol",
                            type_name(&manager)
                        ),
                    ));
                }
            }
            if let Some(alias) = alias {
                self.assign(alias, Value::Opaque, locals)?;
            }
        }

        match node.child_by_field_name("body") {
            Some(body) => self.exec_body(body, locals),
            None => Ok(()),
        }
    }

    fn exec_match(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        if let Some(subject) = node.child_by_field_name("subject") {
            self.eval(subject, locals)?;
        }

        let mut clauses = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "case_clause" => clauses.push(child),
                "block" => {
                    clauses.extend(named_children(child).filter(|c| c.kind() == "case_clause"))
                }
                _ => {}
            }
        }

        let scanner = self.scanner();
        for clause in clauses {
            for part in named_children(clause) {
                match part.kind() {
                    "case_pattern" => {
                        for name in scanner.captures(part) {
                            self.store(&name, Value::Opaque, locals);
                        }
                    }
                    "if_clause" => {
                        may_not_run(self.eval(part, locals))?;
                    }
                    "block" => self.exec_body_maybe(part, locals)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn exec_delete(&mut self, target: Node<'u>, locals: &mut Option<Env>) -> Exec<()> {
        match target.kind() {
            "identifier" => {
                let name = self.text(target);
                self.delete(name, line_of(target), locals)
            }
            _ if is_sequence_target(target) => {
                for child in named_children(target) {
                    self.exec_delete(child, locals)?;
                }
                Ok(())
            }
            _ => self.eval(target, locals).map(|_| ()),
        }
    }

    /// The exception a `raise` statement throws.
    fn exec_raise(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<Raised> {
        let Some(expr) = node.named_child(0) else {
            return Ok(Raised::other("RuntimeError", "No active exception to reraise"));
        };
        for child in named_children(node) {
            self.eval(child, locals)?;
        }

        let (class, message) = match expr.kind() {
            "call" => {
                let class = expr.child_by_field_name("function").map(|f| self.text(f));
                let message = expr
                    .child_by_field_name("arguments")
                    .map(|a| self.raise_message(a));
                (class, message.unwrap_or_default())
            }
            _ => (Some(self.text(expr)), String::new()),
        };
        let class = class.unwrap_or("Exception");
        let class = class.rsplit('.').next().unwrap_or(class);
        Ok(Raised::Other {
            exception: class.to_string(),
            message,
            line: line_of(node),
        })
    }

    /// `str(exc)` for the constructor arguments: a lone plain string is unquoted.
    fn raise_message(&self, args: Node<'u>) -> String {
        let parts: Vec<Node<'u>> = named_children(args)
            .filter(|c| c.kind() != "comment")
            .collect();
        match parts[..] {
            [] => String::new(),
            [only] if only.kind() == "string" => match self.string_value(only) {
                Some(value) => value,
                None => self.text(only).to_string(),
            },
            _ => self
                .text(args)
                .trim_start_matches('(')
                .trim_end_matches(')')
                .to_string(),
        }
    }

    /// Content of a string literal without interpolations.
    fn string_value(&self, string: Node<'u>) -> Option<String> {
        let mut value = String::new();
        for part in named_children(string) {
            match part.kind() {
                "string_content" => value.push_str(self.text(part)),
                "string_start" | "string_end" => {}
                _ => return None,
            }
        }
        Some(value)
    }

    // -- assignment --

    fn eval_or_assign(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<Value> {
        match node.kind() {
            "assignment" => self.exec_assignment(node, locals),
            "augmented_assignment" => self.exec_augmented(node, locals),
            _ => self.eval(node, locals),
        }
    }

    fn exec_assignment(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<Value> {
        let value = match node.child_by_field_name("right") {
            Some(right) => Some(self.eval_or_assign(right, locals)?),
            None => None,
        };

        if let Some(annotation) = node.child_by_field_name("type") {
            if !self.lazy_annotations {
                self.eval(annotation, locals)?;
            }
        }

        // `x: int` без значения ничего не связывает
        if let (Some(value), Some(left)) = (&value, node.child_by_field_name("left")) {
            self.assign(left, value.clone(), locals)?;
        }
        Ok(value.unwrap_or(Value::Opaque))
    }

    fn exec_augmented(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<Value> {
        let Some(left) = node.child_by_field_name("left") else {
            return Ok(Value::Opaque);
        };
        let current = self.eval(left, locals)?;
        let operand = match node.child_by_field_name("right") {
            Some(right) => self.eval(right, locals)?,
            None => Value::Opaque,
        };
        self.binary(&current, &operand)?;
        self.assign(left, Value::Opaque, locals)?;
        Ok(Value::Opaque)
    }

    fn assign(&mut self, target: Node<'u>, value: Value, locals: &mut Option<Env>) -> Exec<()> {
        match target.kind() {
            "identifier" => {
                let name = self.text(target);
                self.store(name, value, locals);
                Ok(())
            }
            "attribute" => {
                let object = match target.child_by_field_name("object") {
                    Some(object) => self.eval(object, locals)?,
                    None => Value::Opaque,
                };
                let attr = target
                    .child_by_field_name("attribute")
                    .map(|a| self.text(a))
                    .unwrap_or_default();
                match object {
                    Value::Placeholder => Err(Raised::other(
                        "AttributeError",
                        format!("'NoneType' object has no attribute '{attr}'"),
                    )),
                    Value::Module(path) => {
                        self.resolver.set_attribute(&path, attr);
                        Ok(())
                    }
                    Value::Opaque => Ok(()),
                }
            }
            "subscript" => {
                let container = self.eval_subscript_parts(target, locals)?;
                match container {
                    Value::Opaque => Ok(()),
                    other => Err(Raised::other(
                        "TypeError",
                        format!(
                            "'{}' object does not support item assignment",
                            type_name(&other)
                        ),
                    )),
                }
            }
            _ if is_sequence_target(target) => {
                for child in named_children(target) {
                    self.assign(child, Value::Opaque, locals)?;
                }
                Ok(())
            }
            _ => self.eval(target, locals).map(|_| ()),
        }
    }

    // -- expressions --

    fn eval(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<Value> {
        match node.kind() {
            "identifier" => self.lookup(self.text(node), line_of(node), locals),
            "attribute" => {
                let object = match node.child_by_field_name("object") {
                    Some(object) => self.eval(object, locals)?,
                    None => Value::Opaque,
                };
                let attr = node
                    .child_by_field_name("attribute")
                    .map(|a| self.text(a))
                    .unwrap_or_default();
                self.get_attribute(&object, attr)
            }
            "call" => {
                let function = match node.child_by_field_name("function") {
                    Some(function) => self.eval(function, locals)?,
                    None => Value::Opaque,
                };
                if let Some(args) = node.child_by_field_name("arguments") {
                    self.eval(args, locals)?;
                }
                ensure_callable(&function)?;
                Ok(Value::Opaque)
            }
            "subscript" => {
                let value = self.eval_subscript_parts(node, locals)?;
                ensure_subscriptable(&value)?;
                Ok(Value::Opaque)
            }
            "keyword_argument" => match node.child_by_field_name("value") {
                Some(value) => self.eval(value, locals),
                None => Ok(Value::Opaque),
            },
            "parenthesized_expression" => {
                let mut value = Value::Opaque;
                for child in named_children(node).filter(|c| c.kind() != "comment") {
                    value = self.eval(child, locals)?;
                }
                Ok(value)
            }
            "named_expression" => {
                let value = match node.child_by_field_name("value") {
                    Some(value) => self.eval(value, locals)?,
                    None => Value::Opaque,
                };
                if let Some(name) = node.child_by_field_name("name") {
                    let name = self.text(name);
                    self.store(name, value.clone(), locals);
                }
                Ok(value)
            }
            "conditional_expression" => self.eval_conditional(node, locals),
            "boolean_operator" => Ok(self.eval_boolean(node, locals)?.0),
            "binary_operator" => {
                let left = match node.child_by_field_name("left") {
                    Some(left) => self.eval(left, locals)?,
                    None => Value::Opaque,
                };
                let right = match node.child_by_field_name("right") {
                    Some(right) => self.eval(right, locals)?,
                    None => Value::Opaque,
                };
                self.binary(&left, &right)
            }
            "lambda" => {
                for expr in definition_time_exprs(node, true) {
                    self.eval(expr, locals)?;
                }
                let scope = self.scanner().lambda(node);
                self.deferred.push(scope);
                Ok(Value::Opaque)
            }
            _ if is_comprehension(node) => {
                for iterable in first_iterables(node) {
                    let value = self.eval(iterable, locals)?;
                    ensure_iterable(&value)?;
                }
                let scope = self.scanner().comprehension(node);
                for name in scope.escaping() {
                    self.store(name, Value::Opaque, locals);
                }
                self.deferred.push(scope);
                Ok(Value::Opaque)
            }
            "yield" | "await" => Err(syntax_error(node)),
            "dotted_name" => match node.named_child(0) {
                Some(first) => self.eval(first, locals),
                None => Ok(Value::Opaque),
            },
            "none" => Ok(Value::Placeholder),
            "comment" => Ok(Value::Opaque),
            _ => {
                for child in named_children(node) {
                    self.eval(child, locals)?;
                }
                Ok(Value::Opaque)
            }
        }
    }

    /// Container value of a subscript, after evaluating its index expressions.
    fn eval_subscript_parts(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<Value> {
        let value = match node.child_by_field_name("value") {
            Some(value) => self.eval(value, locals)?,
            None => Value::Opaque,
        };
        let value_id = node.child_by_field_name("value").map(|v| v.id());
        for index in named_children(node).filter(|c| Some(c.id()) != value_id) {
            self.eval(index, locals)?;
        }
        Ok(value)
    }

    /// `body if condition else alternative`: only a branch that may run is evaluated.
    fn eval_conditional(&mut self, node: Node<'u>, locals: &mut Option<Env>) -> Exec<Value> {
        let parts: Vec<Node<'u>> = named_children(node)
            .filter(|c| c.kind() != "comment")
            .collect();
        let [body, condition, alternative] = parts[..] else {
            for part in parts {
                self.eval(part, locals)?;
            }
            return Ok(Value::Opaque);
        };

        match self.eval_condition(condition, locals)?.1 {
            Some(true) => self.eval(body, locals),
            Some(false) => self.eval(alternative, locals),
            None => {
                may_not_run(self.eval(body, locals))?;
                may_not_run(self.eval(alternative, locals))?;
                Ok(Value::Opaque)
            }
        }
    }

    /// Value of an expression used as a condition, with its truth when known.
    fn eval_condition(
        &mut self,
        node: Node<'u>,
        locals: &mut Option<Env>,
    ) -> Exec<(Value, Option<bool>)> {
        match node.kind() {
            "true" => Ok((Value::Opaque, Some(true))),
            "false" => Ok((Value::Opaque, Some(false))),
            "none" => Ok((Value::Placeholder, Some(false))),
            "integer" => {
                let digits = self.text(node).replace('_', "");
                Ok((Value::Opaque, digits.parse::<i64>().ok().map(|n| n != 0)))
            }
            "tuple" | "list" | "set" | "dictionary" => {
                let mut items = 0;
                let mut splat = false;
                for item in named_children(node).filter(|c| c.kind() != "comment") {
                    splat |= matches!(item.kind(), "list_splat" | "dictionary_splat");
                    self.eval(item, locals)?;
                    items += 1;
                }
                let truth = if splat { None } else { Some(items > 0) };
                Ok((Value::Opaque, truth))
            }
            "parenthesized_expression" => {
                let inner: Vec<Node<'u>> = named_children(node)
                    .filter(|c| c.kind() != "comment")
                    .collect();
                match inner[..] {
                    [only] => self.eval_condition(only, locals),
                    _ => {
                        let value = self.eval(node, locals)?;
                        let truth = truthiness(&value);
                        Ok((value, truth))
                    }
                }
            }
            "not_operator" => {
                let truth = match node.child_by_field_name("argument") {
                    Some(argument) => self.eval_condition(argument, locals)?.1,
                    None => None,
                };
                Ok((Value::Opaque, truth.map(|t| !t)))
            }
            "comparison_operator" => self.eval_comparison(node, locals),
            "boolean_operator" => self.eval_boolean(node, locals),
            _ => {
                let value = self.eval(node, locals)?;
                let truth = truthiness(&value);
                Ok((value, truth))
            }
        }
    }

    /// Comparisons against a literal `None` are decided for placeholders and modules.
    fn eval_comparison(
        &mut self,
        node: Node<'u>,
        locals: &mut Option<Env>,
    ) -> Exec<(Value, Option<bool>)> {
        let operands: Vec<Node<'u>> = named_children(node)
            .filter(|c| c.kind() != "comment")
            .collect();
        let mut values = Vec::with_capacity(operands.len());
        for operand in &operands {
            values.push(self.eval(*operand, locals)?);
        }
        let mut cursor = node.walk();
        let operators: Vec<&str> = node
            .children_by_field_name("operators", &mut cursor)
            .map(|op| op.kind())
            .collect();

        let truth = match (&operands[..], &values[..], &operators[..]) {
            ([left, right], [left_value, right_value], [operator]) => {
                let other = if right.kind() == "none" {
                    Some(left_value)
                } else if left.kind() == "none" {
                    Some(right_value)
                } else {
                    None
                };
                let is_none = other.and_then(|value| match value {
                    Value::Placeholder => Some(true),
                    Value::Module(_) => Some(false),
                    Value::Opaque => None,
                });
                match *operator {
                    "is" | "==" => is_none,
                    "is not" | "!=" => is_none.map(|t| !t),
                    _ => None,
                }
            }
            _ => None,
        };
        Ok((Value::Opaque, truth))
    }

    /// `and` / `or` short-circuit on a known truth value; an operand that may
    /// be skipped cannot fail the unit.
    fn eval_boolean(
        &mut self,
        node: Node<'u>,
        locals: &mut Option<Env>,
    ) -> Exec<(Value, Option<bool>)> {
        let (left, left_truth) = match node.child_by_field_name("left") {
            Some(left) => self.eval_condition(left, locals)?,
            None => (Value::Opaque, None),
        };
        let is_and = node.child_by_field_name("operator").map(|op| op.kind()) != Some("or");
        // and останавливается на ложном, or на истинном
        if left_truth == Some(!is_and) {
            return Ok((left, left_truth));
        }
        let Some(right) = node.child_by_field_name("right") else {
            return Ok((Value::Opaque, None));
        };
        if left_truth.is_some() {
            return self.eval_condition(right, locals);
        }

        let right_truth = may_not_run(self.eval_condition(right, locals))?.and_then(|(_, t)| t);
        let truth = right_truth.filter(|t| *t == !is_and);
        Ok((Value::Opaque, truth))
    }

    fn binary(&self, left: &Value, right: &Value) -> Exec<Value> {
        if *left == Value::Opaque || *right == Value::Opaque {
            return Ok(Value::Opaque);
        }
        Err(Raised::other(
            "TypeError",
            format!(
                "unsupported operand type(s): '{}' and '{}'",
                type_name(left),
                type_name(right)
            ),
        ))
    }

    fn get_attribute(&self, object: &Value, attr: &str) -> Exec<Value> {
        match object {
            Value::Module(path) => self.resolver.attribute(path, attr),
            Value::Placeholder => Err(Raised::other(
                "AttributeError",
                format!("'NoneType' object has no attribute '{attr}'"),
            )),
            Value::Opaque => Ok(Value::Opaque),
        }
    }

    // -- deferred scopes --

    /// Free names of every function, lambda and comprehension must exist
    /// once the module namespace is complete.
    fn check_deferred(&self) -> Exec<()> {
        let mut module_names: HashSet<String> = self.globals.keys().cloned().collect();
        for scope in &self.deferred {
            scope.global_stores(&mut module_names);
        }

        let is_module_name = |name: &str| module_names.contains(name) || is_builtin(name);
        let first = self
            .deferred
            .iter()
            .flat_map(|scope| scope.unresolved(&is_module_name))
            .min_by_key(|miss| miss.line);

        match first {
            Some(miss) => {
                tracing::debug!(name = %miss.name, line = miss.line, "unresolved free name");
                Err(Raised::NameError {
                    name: miss.name,
                    line: miss.line,
                })
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(code: &str) -> Verdict {
        let unit = SourceUnit::parse(code).unwrap();
        StaticSandbox::default().execute(&unit)
    }

    fn exception(code: &str) -> String {
        match verdict(code) {
            Verdict::ExecutionError { exception, .. } => exception,
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_module_used_inside_method() {
        let code = "import nonexistent_pkg\nclass A:\n def f(self):\n  return nonexistent_pkg.foo";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_undefined_helper_in_method() {
        let code = "class A:\n def f(self):\n  return helper_from_project()";
        assert_eq!(
            verdict(code),
            Verdict::UndefinedReference {
                name: "helper_from_project".into(),
                line: 3
            }
        );
    }

    #[test]
    fn test_relative_import_rejected() {
        let verdict = verdict("from . import sibling\nclass A: pass");
        assert_eq!(verdict.tag(), "import_rejected");
    }

    #[test]
    fn test_stdlib_at_class_level() {
        let code = "import os\nimport collections.abc\n\nclass A(collections.abc.Mapping):\n    sep = os.sep\n    root = os.path.join('a', 'b')\n";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_placeholder_misuse_at_class_level() {
        assert_eq!(exception("from fake.mod import Base\nclass A(Base): pass\n"), "TypeError");
        assert_eq!(exception("import fake\nclass A(fake): pass\n"), "TypeError");
        assert_eq!(exception("import fake\nclass A:\n    x = fake.thing\n"), "AttributeError");
        assert_eq!(exception("from fake import make\nclass A:\n    x = make()\n"), "TypeError");
        assert_eq!(exception("from fake import register\n@register\nclass A: pass\n"), "TypeError");
        assert_eq!(
            exception("from fake import Meta\nclass A(metaclass=Meta): pass\n"),
            "TypeError"
        );
        assert_eq!(
            exception("from fake import table\nclass A:\n    row = table[0]\n"),
            "TypeError"
        );
    }

    #[test]
    fn test_placeholder_submodule_attribute() {
        let code = "import fake.sub\nfrom fake import sub as alias\nclass A:\n    m = fake.sub\n    n = alias\n";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_placeholder_in_method_is_fine() {
        let code = "from fake import make\nclass A:\n    def f(self):\n        return make().run()\n";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_try_except_import_fallback() {
        let code = "try:\n    from . import x\nexcept ImportError:\n    x = None\n\nclass A:\n    def f(self):\n        return x\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "try:\n    from . import x\nexcept KeyError:\n    pass\n\nclass A: pass\n";
        assert_eq!(verdict(code).tag(), "import_rejected");
    }

    #[test]
    fn test_try_finally_and_else() {
        let code = "try:\n    import json\nexcept Exception:\n    json = None\nelse:\n    loads = json.loads\nfinally:\n    done = True\n\nclass A:\n    def f(self):\n        return loads, done\n";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_class_body_name_error() {
        assert_eq!(
            verdict("class A:\n    x = missing\n"),
            Verdict::UndefinedReference {
                name: "missing".into(),
                line: 2
            }
        );
    }

    #[test]
    fn test_class_attribute_not_visible_in_method() {
        let code = "class A:\n    limit = 3\n    def f(self):\n        return limit\n";
        assert_eq!(
            verdict(code),
            Verdict::UndefinedReference {
                name: "limit".into(),
                line: 4
            }
        );
        let code = "class A:\n    limit = 3\n    def f(self):\n        return self.limit, A.limit\n";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_comprehension_at_class_level() {
        let code = "class A:\n    names = ['a', 'b']\n    upper = [n.upper() for n in names]\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "class A:\n    k = 2\n    xs = [i * k for i in range(3)]\n";
        assert_eq!(
            verdict(code),
            Verdict::UndefinedReference {
                name: "k".into(),
                line: 3
            }
        );
    }

    #[test]
    fn test_annotations_eager_and_lazy() {
        let code = "class A:\n    def f(self, x: Undefined) -> Other:\n        return x\n";
        assert_eq!(
            verdict(code),
            Verdict::UndefinedReference {
                name: "Undefined".into(),
                line: 2
            }
        );
        let lazy = format!("from __future__ import annotations\n{code}");
        assert_eq!(verdict(&lazy), Verdict::Valid);
    }

    #[test]
    fn test_class_level_annotation_without_value() {
        assert_eq!(verdict("class A:\n    x: int\n    y: str = 'a'\n"), Verdict::Valid);
        assert_eq!(verdict("class A:\n    x: Missing\n").tag(), "undefined_reference");
    }

    #[test]
    fn test_self_reference_and_globals() {
        let code = "class A:\n    def clone(self):\n        return A()\n    def remember(self):\n        global LAST\n        LAST = self\n    def last(self):\n        return LAST\n";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_known_falsy_placeholder_branches() {
        let code = "from fake import thing\nclass A:\n    x = thing.attr if thing else None\n    y = thing and thing()\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "from fake import flag\nif flag:\n    flag()\nclass A: pass\n";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_placeholder_guarded_by_none_check() {
        let code = "from fancy import Thing\nclass A:\n    if Thing is not None:\n        kind = Thing.kind\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "from fancy import Thing\nclass A:\n    kind = Thing.kind if Thing is not None else None\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "from fancy import Thing\nclass A:\n    if Thing is None:\n        kind = None\n    else:\n        kind = Thing.kind\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "import fancy\nclass A:\n    if fancy is None:\n        x = missing\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "from fancy import Thing\nclass A:\n    if not Thing:\n        kind = Thing.kind\n";
        assert_eq!(exception(code), "AttributeError");
    }

    #[test]
    fn test_literal_conditions_and_empty_loops() {
        assert_eq!(verdict("class A:\n    if False:\n        x = missing\n"), Verdict::Valid);
        assert_eq!(verdict("class A:\n    while 0:\n        x = missing\n"), Verdict::Valid);
        assert_eq!(
            verdict("class A:\n    if True:\n        x = missing\n"),
            Verdict::UndefinedReference {
                name: "missing".into(),
                line: 3
            }
        );

        let code = "for _ in ():\n    raise RuntimeError\nclass A: pass\n";
        assert_eq!(verdict(code), Verdict::Valid);
        assert_eq!(
            verdict("for _ in [1]:\n    raise RuntimeError('boom')\nclass A: pass\n"),
            Verdict::ExecutionError {
                exception: "RuntimeError".into(),
                message: "boom".into()
            }
        );
    }

    #[test]
    fn test_unknown_condition_may_not_run() {
        let code = "import sys\nif sys.version_info < (3,):\n    raise ImportError('py2')\nclass A: pass\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "from typing import TYPE_CHECKING\nif TYPE_CHECKING:\n    from .models import Model\nclass A:\n    pass\n";
        assert_eq!(verdict(code), Verdict::Valid);

        // имена из обеих веток остаются связанными
        let code = "import os\nif os.environ.get('PYSLICE_UNSET'):\n    mode = 'x'\nelse:\n    mode = 'y'\nclass A:\n    m = mode\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "import os\nclass A:\n    x = os.environ.get('PYSLICE_UNSET') and undefined_thing\n";
        assert_eq!(verdict(code), Verdict::Valid);

        let code = "import os\nif os.environ.get('X'):\n    return 1\nclass A: pass\n";
        assert_eq!(verdict(code), Verdict::SyntaxInvalid { line: 3, column: 5 });
    }

    #[test]
    fn test_explicit_raise_maps_by_exception_class() {
        assert_eq!(
            verdict("class A:\n    raise ImportError('x')\n"),
            Verdict::ImportRejected {
                module: String::new(),
                reason: "x".into()
            }
        );
        assert_eq!(
            verdict("class A:\n    raise ModuleNotFoundError('gone')\n"),
            Verdict::ImportRejected {
                module: String::new(),
                reason: "gone".into()
            }
        );
        assert_eq!(
            verdict("class A:\n    raise NameError('helper')\n"),
            Verdict::UndefinedReference {
                name: String::new(),
                line: 2
            }
        );

        let code = "class A:\n    try:\n        raise ModuleNotFoundError('m')\n    except ImportError:\n        pass\n";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_placeholder_union_is_type_error() {
        let code = "from fake import Thing\nclass A:\n    kind = Thing | None\n";
        assert_eq!(exception(code), "TypeError");
    }

    #[test]
    fn test_return_outside_function() {
        assert_eq!(
            verdict("return 1\nclass A: pass\n"),
            Verdict::SyntaxInvalid { line: 1, column: 1 }
        );
    }

    #[test]
    fn test_raise_and_catch_at_class_level() {
        let code = "class A:\n    try:\n        raise ValueError('x')\n    except ValueError:\n        pass\n";
        assert_eq!(verdict(code), Verdict::Valid);
        assert_eq!(exception("class A:\n    raise KeyError('k')\n"), "KeyError");
    }

    #[test]
    fn test_deleted_name_is_gone() {
        let code = "import os\ndel os\nclass A:\n    def f(self):\n        return os.sep\n";
        assert_eq!(verdict(code).tag(), "undefined_reference");
    }

    #[test]
    fn test_with_and_loops_bind_names() {
        let code = "import contextlib\nwith contextlib.suppress(Exception) as ctx:\n    pass\nfor key, value in [(1, 2)]:\n    pass\nwhile False:\n    pass\nclass A:\n    def f(self):\n        return ctx, key, value\n";
        assert_eq!(verdict(code), Verdict::Valid);
    }

    #[test]
    fn test_known_modules_are_not_placeholders() {
        let code = "import vendored\nclass A(vendored.Base): pass\n";
        assert_eq!(exception(code), "AttributeError");
        let unit = SourceUnit::parse(code).unwrap();
        let sandbox = StaticSandbox::new(vec!["vendored".to_string()]);
        assert_eq!(sandbox.execute(&unit), Verdict::Valid);
    }
}
