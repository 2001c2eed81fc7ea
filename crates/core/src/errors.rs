use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::domain::Collaborator;
use crate::flows::FlowTransitionError;

/// A rule clause that named a metric but could not become a threshold.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("could not build a threshold from `{clause}` (source {source_index}): {reason}")]
pub struct ParseError {
    pub clause: String,
    pub source_index: usize,
    pub reason: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("{collaborator} timed out after {after_ms}ms")]
    Timeout { collaborator: Collaborator, after_ms: u64 },
    #[error("{collaborator} failed: {message}")]
    Failure { collaborator: Collaborator, message: String },
    #[error("{collaborator} returned an invalid response: {message}")]
    InvalidResponse { collaborator: Collaborator, message: String },
}

impl CollaboratorError {
    pub fn failure(collaborator: Collaborator, message: impl Into<String>) -> Self {
        Self::Failure { collaborator, message: message.into() }
    }

    pub fn invalid_response(collaborator: Collaborator, message: impl Into<String>) -> Self {
        Self::InvalidResponse { collaborator, message: message.into() }
    }

    pub fn collaborator(&self) -> Collaborator {
        match self {
            Self::Timeout { collaborator, .. }
            | Self::Failure { collaborator, .. }
            | Self::InvalidResponse { collaborator, .. } => *collaborator,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Why an expression was refused before interpretation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    FunctionCall,
    AttributeAccess,
    IndexAccess,
    Assignment,
    StringLiteral,
    Collection,
    Keyword(String),
    UnboundVariable(String),
    UnexpectedCharacter(char),
    UnexpectedToken(String),
    UnexpectedEnd,
    ChainedComparison,
    InvalidNumber,
    TooLong { limit: usize },
    TooDeep { limit: usize },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FunctionCall => f.write_str("function calls are not allowed"),
            Self::AttributeAccess => f.write_str("attribute access is not allowed"),
            Self::IndexAccess => f.write_str("indexing is not allowed"),
            Self::Assignment => f.write_str("assignment is not allowed"),
            Self::StringLiteral => f.write_str("string literals are not allowed"),
            Self::Collection => f.write_str("collections are not allowed"),
            Self::Keyword(word) => write!(f, "keyword `{word}` is not allowed"),
            Self::UnboundVariable(name) => write!(f, "variable `{name}` is not bound"),
            Self::UnexpectedCharacter(ch) => write!(f, "unexpected character `{ch}`"),
            Self::UnexpectedToken(token) => write!(f, "unexpected token `{token}`"),
            Self::UnexpectedEnd => f.write_str("unexpected end of expression"),
            Self::ChainedComparison => f.write_str("chained comparisons are not allowed"),
            Self::InvalidNumber => f.write_str("invalid numeric literal"),
            Self::TooLong { limit } => write!(f, "expression is longer than {limit} bytes"),
            Self::TooDeep { limit } => write!(f, "expression nests deeper than {limit} levels"),
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a number")]
    NonFinite,
    #[error("arithmetic overflow")]
    Overflow,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("expression rejected at byte {offset}: {kind}")]
    Violation { kind: ViolationKind, offset: usize },
    #[error("expression could not be evaluated: {0}")]
    Evaluation(#[from] EvaluationError),
}

impl SandboxError {
    pub fn violation(kind: ViolationKind, offset: usize) -> Self {
        Self::Violation { kind, offset }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Violation { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("memory store I/O failure on `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("rule retrieval input is structurally invalid: {0}")]
    Fatal(String),
    #[error(transparent)]
    Transition(#[from] FlowTransitionError),
}
