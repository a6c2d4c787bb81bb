use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Import statement kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    /// `import a.b.c` / `import a.b as c`
    Plain,
    /// `from a import b` / `from . import b`
    From,
    /// `from __future__ import annotations`
    Future,
}

/// One name brought in by an import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedName {
    /// Dotted path as written (`a.b.c` for `import a.b.c`, `b` for `from a import b`)
    pub name: String,
    /// Name bound in the importing namespace
    pub bound: String,
}

/// A module-level import statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStatement {
    pub kind: ImportKind,
    /// Module path (`a.b` in `from a.b import c`); empty for `from . import x`
    pub module: String,
    /// Number of leading dots of a relative import (0 = absolute)
    pub level: usize,
    pub names: Vec<ImportedName>,
    pub wildcard: bool,
    /// 1-based line of the statement
    pub line: usize,
    /// Source text of the statement, verbatim
    pub text: String,
    #[serde(skip)]
    pub span: Range<usize>,
}

impl ImportStatement {
    pub fn bound_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.bound.as_str())
    }

    pub fn is_relative(&self) -> bool {
        self.level > 0
    }
}

/// Program unit kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Class,
    Function,
    AsyncFunction,
}

impl UnitKind {
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function | Self::AsyncFunction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decorator {
    pub line: usize,
    /// Raw decorator source including `@`
    pub text: String,
}

/// A class, function or async function definition inside a skeletonized subtree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramUnit {
    pub kind: UnitKind,
    pub name: String,
    /// First decorator line if decorated, else the header line
    pub anchor_line: usize,
    pub header_line: usize,
    /// Nesting level among program units (0 = top level)
    pub depth: usize,
    /// Header text sliced from source, `class`/`def`/`async def` through `:`
    pub header: String,
    pub decorators: Vec<Decorator>,
    /// Raw docstring literal (quotes and prefix included, not dedented)
    pub docstring: Option<String>,
    /// Number of program units directly nested in this one
    pub nested: usize,
}

/// A top-level class with every program unit found inside it (itself first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassUnit {
    pub name: String,
    pub line: usize,
    pub units: Vec<ProgramUnit>,
}

/// Skeleton of a source unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skeleton {
    pub text: String,
    pub unit_count: usize,
    pub docstring_count: usize,
}
