// Built-in functions callable from expressions

pub mod mem;
pub mod string;

use crate::error::{EvalError, EvalErrorKind};
use crate::eval::expr::Environment;
use crate::eval::value::Value;

/// Signature shared by every built-in
pub type BuiltinFn = fn(&[Value], &dyn Environment) -> Result<Value, EvalError>;

/// Resolve a built-in by name
pub fn lookup(name: &str) -> Option<BuiltinFn> {
    match name {
        "until_marker" => Some(mem::until_marker as BuiltinFn),
        "parse_int" => Some(string::parse_int as BuiltinFn),
        _ => None,
    }
}

pub(crate) fn arity_error(name: &str, expected: &str, got: usize) -> EvalError {
    EvalError::new(
        EvalErrorKind::Arity,
        format!("{} expects {} argument(s), got {}", name, expected, got),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert!(lookup("until_marker").is_some());
        assert!(lookup("parse_int").is_some());
        assert!(lookup("read_u8").is_none());
    }
}
