// Text conversion built-ins

use crate::error::{EvalError, EvalErrorKind};
use crate::eval::expr::Environment;
use crate::eval::value::Value;

use super::arity_error;

/// `parse_int(field, base)`: integer from text in base 2, 8, 10 or 16.
///
/// Trailing NUL and space padding is stripped first. Blank or unparsable
/// text yields 0, since fixed-width numeric text fields are often empty.
pub fn parse_int(args: &[Value], _env: &dyn Environment) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(arity_error("parse_int", "2", args.len()));
    }
    let base = args[1].to_int()?;
    let radix = match base {
        2 | 8 | 10 | 16 => base as u32,
        _ => {
            return Err(EvalError::new(
                EvalErrorKind::InvalidBase,
                format!("parse_int base must be 2, 8, 10 or 16, got {}", base),
            ))
        }
    };
    let text = args[0].to_display_string();
    Ok(Value::Int(parse_padded(&text, radix)))
}

fn parse_padded(text: &str, radix: u32) -> i64 {
    let trimmed = text.trim_end_matches(|c: char| c == '\0' || c == ' ').trim_start();
    let digits = if radix == 16 {
        trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed)
    } else {
        trimmed
    };
    i64::from_str_radix(digits, radix).unwrap_or(0)
}
