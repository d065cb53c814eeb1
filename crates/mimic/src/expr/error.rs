//! Error types for the expression language.

use super::token::Position;
use std::fmt;
use thiserror::Error;

/// One lexical or grammatical problem, located in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub position: Position,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.position, self.message)
    }
}

fn join(errors: &[SyntaxError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("syntax error: {}", join(.0))]
    Syntax(Vec<SyntaxError>),

    #[error("invalid operation: {x} {op} {y}")]
    InvalidOperation { x: String, y: String, op: String },

    #[error("invalid operation: {op}{operand}")]
    InvalidUnary { op: String, operand: String },

    #[error("undefined identifier '{0}'")]
    Undefined(String),

    #[error("{0} is not callable")]
    NotCallable(String),

    #[error("cannot index {target} with {index}")]
    InvalidIndex { target: String, index: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("{function}: {message}")]
    Function { function: String, message: String },

    #[error("condition must evaluate to a boolean, got {0}")]
    NotBoolean(String),
}

impl ExpressionError {
    pub(crate) fn function(function: &str, message: impl Into<String>) -> Self {
        ExpressionError::Function {
            function: function.to_string(),
            message: message.into(),
        }
    }

    /// Syntax errors found while scanning and parsing.
    pub fn syntax_errors(&self) -> &[SyntaxError] {
        match self {
            ExpressionError::Syntax(errors) => errors,
            _ => &[],
        }
    }
}
