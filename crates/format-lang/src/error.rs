// Error types for expressions and decoding

use crate::schema::FieldType;
use crate::span::Span;
use std::fmt;

/// Tokenizer error
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lex error at {}: {}", self.span.start, self.message)
    }
}

impl std::error::Error for LexError {}

/// Parse error
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    pub expected: Option<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            expected: None,
        }
    }

    pub fn expected(message: impl Into<String>, expected: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            expected: Some(expected.into()),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.span.start, self.message)?;
        if let Some(ref expected) = self.expected {
            write!(f, " (expected {})", expected)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// What went wrong while evaluating an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    UnknownVariable,
    Type,
    DivisionByZero,
    InvalidBase,
    UnknownFunction,
    Arity,
}

/// Expression evaluation error
#[derive(Debug, Clone)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Type, message)
    }

    /// Errors that mean the schema itself is broken, not the data
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self.kind,
            EvalErrorKind::InvalidBase | EvalErrorKind::UnknownFunction | EvalErrorKind::Arity
        )
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eval error: {}", self.message)
    }
}

impl std::error::Error for EvalError {}

/// Category of a decode failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The schema cannot produce a valid decode (bad reference, bad width, no switch case)
    Schema,
    /// A read, seek or scope exceeded the current scope or the buffer
    Bounds,
    /// An expression failed to evaluate
    Expression,
    /// The bytes could not be interpreted (e.g. a corrupt compressed stream)
    Data,
    /// A configured resource limit was hit
    Limit,
    /// The cancellation token was set
    Cancelled,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeErrorKind::Schema => "schema error",
            DecodeErrorKind::Bounds => "bounds error",
            DecodeErrorKind::Expression => "expression error",
            DecodeErrorKind::Data => "data error",
            DecodeErrorKind::Limit => "limit exceeded",
            DecodeErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Decode failure, carrying the field context it was raised in
#[derive(Debug, Clone)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub message: String,
    pub offset: Option<u64>,
    pub path: Option<String>,
    pub field_type: Option<FieldType>,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            offset: None,
            path: None,
            field_type: None,
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Schema, message)
    }

    pub fn bounds(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Bounds, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Data, message)
    }

    /// Attach field context unless an inner field already did
    pub fn with_context_if_none(mut self, offset: u64, path: &str, field_type: FieldType) -> Self {
        if self.path.is_none() {
            self.offset = Some(offset);
            self.path = Some(path.to_string());
            self.field_type = Some(field_type);
        }
        self
    }

    /// Whether recovery mode may replace the failed field with an Error node
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            DecodeErrorKind::Bounds | DecodeErrorKind::Expression | DecodeErrorKind::Data
        )
    }
}

impl From<EvalError> for DecodeError {
    fn from(err: EvalError) -> Self {
        let kind = if err.is_schema_error() {
            DecodeErrorKind::Schema
        } else {
            DecodeErrorKind::Expression
        };
        DecodeError::new(kind, err.message)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.offset, &self.path, &self.field_type) {
            (Some(offset), Some(path), Some(ty)) => write!(
                f,
                "{} at offset {:#x} in '{}' ({}): {}",
                self.kind, offset, path, ty, self.message
            ),
            _ => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    Lex(Vec<LexError>),
    Parse(ParseError),
    Decode(DecodeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Lex(errors) => {
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
            Error::Parse(e) => write!(f, "{}", e),
            Error::Decode(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}
