//! Error taxonomy surfaced to the outer adapter.
//!
//! Each component owns its error type; [`Error`] groups them into stable kinds
//! so an HTTP adapter can choose status codes without matching on every variant.

use crate::codec::CodecError;
use crate::expr::ExpressionError;
use crate::generator::GenerationError;
use crate::parameter::ParameterError;
use crate::schema::{RefError, ValidationError};
use crate::workflow::ActionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Reference(#[from] RefError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(CodecError),

    #[error(transparent)]
    Generation(GenerationError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Action(ActionError),

    #[error("cancelled")]
    Cancelled,
}

/// Stable error kind, independent of the underlying message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Reference,
    Parameter,
    Validation,
    Codec,
    Generation,
    Expression,
    Action,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Reference(_) => ErrorKind::Reference,
            Error::Parameter(_) => ErrorKind::Parameter,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Codec(_) => ErrorKind::Codec,
            Error::Generation(_) => ErrorKind::Generation,
            Error::Expression(_) => ErrorKind::Expression,
            Error::Action(_) => ErrorKind::Action,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Invalid(inner) => Error::Validation(inner),
            CodecError::Cancelled => Error::Cancelled,
            other => Error::Codec(other),
        }
    }
}

impl From<GenerationError> for Error {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Cancelled => Error::Cancelled,
            other => Error::Generation(other),
        }
    }
}

impl From<ActionError> for Error {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Cancelled => Error::Cancelled,
            other => Error::Action(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_collapse_cancellation() {
        assert_eq!(Error::from(CodecError::Cancelled).kind(), ErrorKind::Cancelled);
        assert_eq!(Error::from(GenerationError::Cancelled).kind(), ErrorKind::Cancelled);
        assert_eq!(Error::from(ActionError::Cancelled).kind(), ErrorKind::Cancelled);
        assert_eq!(
            Error::from(ActionError::NotFound("deploy".into())).kind(),
            ErrorKind::Action
        );
        assert_eq!(
            Error::from(ExpressionError::DivisionByZero).kind(),
            ErrorKind::Expression
        );
    }

    #[test]
    fn test_unsupported_media_is_codec() {
        let err = Error::from(CodecError::Unsupported {
            media: "image/png".into(),
        });
        assert_eq!(err.kind(), ErrorKind::Codec);
        assert_eq!(err.to_string(), "unsupported media type 'image/png'");
    }
}
