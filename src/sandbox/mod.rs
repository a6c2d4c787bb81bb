//! Sandbox validation of extracted units.
//!
//! A unit is valid when it parses, contains no async function and no
//! wildcard import, and runs to completion once unresolvable imports are
//! replaced by placeholder modules. Two backends do the running:
//! [`StaticSandbox`] interprets the unit abstractly in-process,
//! [`ProcessSandbox`] hands it to a real interpreter with a private import hook.

mod interp;
mod names;
mod process;
mod resolver;
mod scope;

use serde::{Deserialize, Serialize};
use streaming_iterator::StreamingIterator;
use tree_sitter::{Query, QueryCursor};

use crate::config::{Backend, SandboxConfig};
use crate::parser::core::{is_async_function, line_of, python_language};
use crate::parser::SourceUnit;
use crate::PysliceError;

pub use interp::StaticSandbox;
pub use process::{ProcessSandbox, DEFAULT_PYTHON, DEFAULT_TIMEOUT_SECONDS};
pub use resolver::{ModuleResolver, Value};

const REJECT_QUERY: &str = r#"
(function_definition) @function
(wildcard_import) @wildcard
"#;

/// Outcome of validating one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    SyntaxInvalid { line: usize, column: usize },
    HasAsync { line: usize },
    HasWildcardImport { line: usize },
    UndefinedReference { name: String, line: usize },
    ImportRejected { module: String, reason: String },
    ExecutionError { exception: String, message: String },
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Stable tag used in reports.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::SyntaxInvalid { .. } => "syntax_invalid",
            Self::HasAsync { .. } => "has_async",
            Self::HasWildcardImport { .. } => "has_wildcard_import",
            Self::UndefinedReference { .. } => "undefined_reference",
            Self::ImportRejected { .. } => "import_rejected",
            Self::ExecutionError { .. } => "execution_error",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::SyntaxInvalid { line, column } => {
                write!(f, "syntax error at line {line}, column {column}")
            }
            Self::HasAsync { line } => write!(f, "async function at line {line}"),
            Self::HasWildcardImport { line } => write!(f, "wildcard import at line {line}"),
            Self::UndefinedReference { name, line } => {
                write!(f, "name '{name}' is not defined (line {line})")
            }
            Self::ImportRejected { module, reason } if module.is_empty() => {
                write!(f, "import rejected: {reason}")
            }
            Self::ImportRejected { module, reason } => {
                write!(f, "import of '{module}' rejected: {reason}")
            }
            Self::ExecutionError { exception, message } => write!(f, "{exception}: {message}"),
        }
    }
}

/// Exception raised while executing a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Raised {
    NameError { name: String, line: usize },
    ImportError { module: String, reason: String },
    /// Rejected by the compiler before anything runs
    SyntaxError { line: usize, column: usize },
    /// Any other exception class; `line` is known only for an explicit `raise`
    Other {
        exception: String,
        message: String,
        line: usize,
    },
}

impl Raised {
    pub(crate) fn other(exception: &str, message: impl Into<String>) -> Self {
        Self::Other {
            exception: exception.to_string(),
            message: message.into(),
            line: 0,
        }
    }

    pub(crate) fn exception(&self) -> &str {
        match self {
            Self::NameError { .. } => "NameError",
            Self::ImportError { .. } => "ImportError",
            Self::SyntaxError { .. } => "SyntaxError",
            Self::Other { exception, .. } => exception,
        }
    }

    /// Whether an `except` clause naming `handled` catches this exception.
    pub(crate) fn caught_by(&self, handled: &str) -> bool {
        names::exception_ancestry(self.exception()).contains(&handled)
    }

    pub(crate) fn into_verdict(self) -> Verdict {
        match self {
            Self::NameError { name, line } => Verdict::UndefinedReference { name, line },
            Self::ImportError { module, reason } => Verdict::ImportRejected { module, reason },
            Self::SyntaxError { line, column } => Verdict::SyntaxInvalid { line, column },
            // исход определяется иерархией класса исключения
            Self::Other {
                exception,
                message,
                line,
            } => {
                let ancestry = names::exception_ancestry(&exception);
                let name_error = ancestry.contains(&"NameError");
                let import_error = ancestry.contains(&"ImportError");
                if name_error {
                    Verdict::UndefinedReference {
                        name: undefined_name(&message).to_string(),
                        line,
                    }
                } else if import_error {
                    Verdict::ImportRejected {
                        module: String::new(),
                        reason: message,
                    }
                } else {
                    Verdict::ExecutionError { exception, message }
                }
            }
        }
    }
}

/// `x` from "name 'x' is not defined", empty for any other message.
fn undefined_name(message: &str) -> &str {
    message
        .strip_prefix("name '")
        .and_then(|rest| rest.split_once("' is not defined"))
        .map(|(name, _)| name)
        .unwrap_or_default()
}

/// Executes a parsed unit that already passed the structural checks.
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, unit: &SourceUnit) -> Verdict;
}

/// Sandbox for the configured backend.
pub fn sandbox_for(config: &SandboxConfig) -> Box<dyn Sandbox> {
    match config.backend {
        Backend::Static => Box::new(StaticSandbox::new(config.known_modules.clone())),
        Backend::Process => Box::new(ProcessSandbox::new(
            config.python.clone(),
            std::time::Duration::from_secs(config.timeout_secs),
        )),
    }
}

/// Validate with the default in-process backend.
pub fn validate(source: &str) -> bool {
    validate_with(&StaticSandbox::default(), source).is_valid()
}

/// Full verdict for `source` using `sandbox`.
pub fn validate_with(sandbox: &dyn Sandbox, source: &str) -> Verdict {
    let unit = match SourceUnit::parse(source) {
        Ok(unit) => unit,
        Err(PysliceError::SyntaxInvalid { line, column }) => {
            return Verdict::SyntaxInvalid { line, column }
        }
        Err(e) => {
            return Verdict::ExecutionError {
                exception: e.kind().to_string(),
                message: e.to_string(),
            }
        }
    };

    if let Some(verdict) = structural_reject(&unit) {
        tracing::debug!(verdict = verdict.tag(), "rejected before execution");
        return verdict;
    }

    let verdict = sandbox.execute(&unit);
    tracing::debug!(sandbox = sandbox.name(), verdict = verdict.tag(), "unit executed");
    verdict
}

/// Async functions and wildcard imports anywhere in the tree.
fn structural_reject(unit: &SourceUnit) -> Option<Verdict> {
    let query = match Query::new(&python_language(), REJECT_QUERY) {
        Ok(q) => q,
        Err(e) => {
            tracing::error!(error = %e, "reject query failed to compile");
            return Some(Verdict::ExecutionError {
                exception: "QueryError".to_string(),
                message: e.to_string(),
            });
        }
    };

    let mut async_line = None;
    let mut wildcard_line = None;

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, unit.root(), unit.text().as_bytes());
    while let Some(m) = matches.next() {
        for capture in m.captures {
            let node = capture.node;
            match query.capture_names()[capture.index as usize] {
                "function" if is_async_function(node) => {
                    async_line = async_line.or(Some(line_of(node)));
                }
                "wildcard" => {
                    wildcard_line = wildcard_line.or(Some(line_of(node)));
                }
                _ => {}
            }
        }
    }

    async_line
        .map(|line| Verdict::HasAsync { line })
        .or_else(|| wildcard_line.map(|line| Verdict::HasWildcardImport { line }))
}
