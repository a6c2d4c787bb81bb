//! Unified error type for pyslice: report tags and CLI exit codes.

use thiserror::Error;

/// Process exit codes used by the CLI.
const EXIT_NOT_FOUND: i32 = 2;
const EXIT_SYNTAX: i32 = 3;
const EXIT_CONFIG: i32 = 4;
const EXIT_INTERNAL: i32 = 70;

#[derive(Error, Debug)]
pub enum PysliceError {
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    #[error("Syntax error at line {line}, column {column}")]
    SyntaxInvalid { line: usize, column: usize },

    #[error("No class or function definitions in source")]
    NoProgramUnits,

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl PysliceError {
    /// Stable tag for reports (JSON `error_kind`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClassNotFound(_) => "class_not_found",
            Self::SyntaxInvalid { .. } => "syntax_invalid",
            Self::NoProgramUnits => "no_program_units",
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }

    /// Exit code for the CLI when this error aborts a command.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ClassNotFound(_) | Self::NoProgramUnits => EXIT_NOT_FOUND,
            Self::SyntaxInvalid { .. } => EXIT_SYNTAX,
            Self::Config(_) => EXIT_CONFIG,
            Self::UnsupportedLanguage(_) | Self::Io(_) | Self::Internal(_) => EXIT_INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, PysliceError>;
