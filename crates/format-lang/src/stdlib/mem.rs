// Buffer search built-ins

use crate::error::EvalError;
use crate::eval::expr::Environment;
use crate::eval::value::Value;

use super::arity_error;

/// `until_marker(byte, ...)`: distance from the cursor to the first
/// occurrence of the byte sequence in the current scope, or the remaining
/// byte count when it does not occur.
pub fn until_marker(args: &[Value], env: &dyn Environment) -> Result<Value, EvalError> {
    if args.is_empty() {
        return Err(arity_error("until_marker", "at least 1", 0));
    }
    let marker = args
        .iter()
        .map(|arg| {
            let b = arg.to_int()?;
            u8::try_from(b).map_err(|_| {
                EvalError::type_error(format!("until_marker byte {} out of range 0..=255", b))
            })
        })
        .collect::<Result<Vec<u8>, _>>()?;
    Ok(Value::Int(env.find_marker(&marker) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalErrorKind;
    use crate::eval::context::DecodeContext;
    use crate::schema::Endianness;

    #[test]
    fn test_until_marker_found() {
        let data = b"abc\0\0rest";
        let ctx = DecodeContext::new(data, Endianness::Little);
        let result = until_marker(&[Value::Int(0), Value::Int(0)], &ctx).unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[test]
    fn test_until_marker_missing_returns_remaining() {
        let data = b"abcdef";
        let ctx = DecodeContext::new(data, Endianness::Little);
        let result = until_marker(&[Value::Int(b'z' as i64)], &ctx).unwrap();
        assert_eq!(result, Value::Int(6));
    }

    #[test]
    fn test_until_marker_rejects_bad_bytes() {
        let ctx = DecodeContext::new(&[], Endianness::Little);
        assert!(until_marker(&[Value::Int(256)], &ctx).is_err());
        let err = until_marker(&[], &ctx).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Arity);
    }
}
