// Declarative binary format interpreter: schemas, expressions and a scoped decoder

pub mod checksum;
pub mod encoding;
pub mod error;
pub mod eval;
pub mod expression;
pub mod hex;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod schema;
pub mod span;
pub mod stdlib;

// Re-export key types for public API
pub use error::{DecodeError, DecodeErrorKind, Error, EvalError, EvalErrorKind};
pub use eval::node::{DecodedNode, DecodedValue};
pub use eval::value::Value;
pub use eval::{Decoded, Decoder, RecoveredError};
pub use expression::Expression;
pub use options::{DecodeMode, DecodeOptions};
pub use schema::{FieldDefinition, FieldType, FormatDefinition, StructDefinition};

/// Root node of a decode, labelled with the schema name
pub type DecodedStruct = DecodedNode;

/// Decode `data` against `schema`, failing on the first error
pub fn decode(data: &[u8], schema: &FormatDefinition) -> Result<DecodedStruct, DecodeError> {
    decode_with_options(data, schema, DecodeOptions::default()).map(|decoded| decoded.root)
}

/// Decode in the given mode. In recovery mode failed fields become Error
/// nodes and are listed alongside the tree; schema errors stay fatal.
pub fn decode_with_recovery(
    data: &[u8],
    schema: &FormatDefinition,
    mode: DecodeMode,
) -> Result<(DecodedStruct, Vec<RecoveredError>), DecodeError> {
    let decoded = decode_with_options(data, schema, DecodeOptions::default().with_mode(mode))?;
    Ok((decoded.root, decoded.errors))
}

/// Decode with explicit limits, mode and cancellation
pub fn decode_with_options(
    data: &[u8],
    schema: &FormatDefinition,
    options: DecodeOptions,
) -> Result<Decoded, DecodeError> {
    Decoder::new(schema, options).decode(data)
}
