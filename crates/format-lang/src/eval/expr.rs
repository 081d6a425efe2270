// Tree-walking expression evaluator

use crate::error::{EvalError, EvalErrorKind};
use crate::parser::ast::{BinOp, Expr, ExprKind, UnaryOp};
use crate::stdlib;

use super::value::Value;

/// Name of the pseudo-variable holding the bytes left in the current scope
pub const REMAINING: &str = "remaining";

/// What an expression can see while it runs
pub trait Environment {
    /// Look up a bound variable, innermost scope first
    fn get_var(&self, name: &str) -> Option<&Value>;

    /// Bytes left in the current scope
    fn remaining(&self) -> u64;

    /// Distance from the cursor to `marker` in the current scope, or
    /// `remaining()` when it is absent
    fn find_marker(&self, marker: &[u8]) -> u64;
}

/// Evaluate an expression tree against an environment
pub fn eval_expr(expr: &Expr, env: &dyn Environment) -> Result<Value, EvalError> {
    match &expr.kind {
        ExprKind::IntLiteral(v) => Ok(Value::Int(*v)),
        ExprKind::TextLiteral(s) => Ok(Value::Text(s.clone())),
        ExprKind::Ident(name) => eval_ident(name, env),
        ExprKind::Index { name, index } => {
            let target = eval_ident(name, env)?;
            let idx = eval_expr(index, env)?.to_int()?;
            eval_index(name, &target, idx)
        }
        ExprKind::Call { name, args } => {
            let builtin = stdlib::lookup(name).ok_or_else(|| {
                EvalError::new(
                    EvalErrorKind::UnknownFunction,
                    format!("unknown function '{}'", name),
                )
            })?;
            let values = args
                .iter()
                .map(|arg| eval_expr(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            builtin(&values, env)
        }
        ExprKind::Unary { op, expr } => {
            let val = eval_expr(expr, env)?;
            match op {
                UnaryOp::Neg => Ok(Value::Int(val.to_int()?.wrapping_neg())),
                UnaryOp::Not => Ok(Value::Bool(!val.to_bool())),
            }
        }
        ExprKind::Binary { op, lhs, rhs } => match op {
            // Short-circuit: the right side is only evaluated when needed
            BinOp::LogAnd => {
                if !eval_expr(lhs, env)?.to_bool() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(eval_expr(rhs, env)?.to_bool()))
            }
            BinOp::LogOr => {
                if eval_expr(lhs, env)?.to_bool() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(eval_expr(rhs, env)?.to_bool()))
            }
            _ => {
                let left = eval_expr(lhs, env)?;
                let right = eval_expr(rhs, env)?;
                eval_binary_op(*op, &left, &right)
            }
        },
        ExprKind::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            if eval_expr(cond, env)?.to_bool() {
                eval_expr(then_expr, env)
            } else {
                eval_expr(else_expr, env)
            }
        }
    }
}

fn eval_ident(name: &str, env: &dyn Environment) -> Result<Value, EvalError> {
    if name == REMAINING {
        return Ok(Value::Int(env.remaining() as i64));
    }
    env.get_var(name).cloned().ok_or_else(|| {
        EvalError::new(
            EvalErrorKind::UnknownVariable,
            format!("unknown variable '{}'", name),
        )
    })
}

/// Indexing text yields the byte at that position
fn eval_index(name: &str, target: &Value, idx: i64) -> Result<Value, EvalError> {
    match target {
        Value::Text(s) => usize::try_from(idx)
            .ok()
            .and_then(|i| s.as_bytes().get(i))
            .map(|b| Value::Int(*b as i64))
            .ok_or_else(|| {
                EvalError::type_error(format!(
                    "index {} out of range for '{}' (length {})",
                    idx,
                    name,
                    s.len()
                ))
            }),
        other => Err(EvalError::type_error(format!(
            "cannot index {} value '{}'",
            other.type_name(),
            name
        ))),
    }
}

pub(crate) fn eval_binary_op(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(left.loose_eq(right))),
        BinOp::Ne => return Ok(Value::Bool(!left.loose_eq(right))),
        BinOp::LogAnd => return Ok(Value::Bool(left.to_bool() && right.to_bool())),
        BinOp::LogOr => return Ok(Value::Bool(left.to_bool() || right.to_bool())),
        _ => {}
    }

    let l = left.to_int()?;
    let r = right.to_int()?;
    let result = match op {
        BinOp::Add => Value::Int(l.wrapping_add(r)),
        BinOp::Sub => Value::Int(l.wrapping_sub(r)),
        BinOp::Mul => Value::Int(l.wrapping_mul(r)),
        BinOp::Div | BinOp::Mod if r == 0 => {
            return Err(EvalError::new(
                EvalErrorKind::DivisionByZero,
                format!("division by zero ({} {} 0)", l, op.symbol()),
            ));
        }
        BinOp::Div => Value::Int(l.wrapping_div(r)),
        BinOp::Mod => Value::Int(l.wrapping_rem(r)),
        BinOp::BitAnd => Value::Int(l & r),
        BinOp::BitOr => Value::Int(l | r),
        BinOp::BitXor => Value::Int(l ^ r),
        BinOp::Shl | BinOp::Shr => {
            let amount = u32::try_from(r).ok().filter(|a| *a < 64).ok_or_else(|| {
                EvalError::type_error(format!("shift amount {} out of range", r))
            })?;
            if op == BinOp::Shl {
                Value::Int(l.wrapping_shl(amount))
            } else {
                Value::Int(l >> amount)
            }
        }
        BinOp::Lt => Value::Bool(l < r),
        BinOp::Gt => Value::Bool(l > r),
        BinOp::Le => Value::Bool(l <= r),
        BinOp::Ge => Value::Bool(l >= r),
        BinOp::Eq | BinOp::Ne | BinOp::LogAnd | BinOp::LogOr => {
            return Err(EvalError::type_error(format!(
                "'{}' is not an integer operator",
                op.symbol()
            )));
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Expression;
    use rustc_hash::FxHashMap;

    /// Variables plus a fake scope window for evaluation tests
    #[derive(Default)]
    struct TestEnv {
        vars: FxHashMap<String, Value>,
        window: Vec<u8>,
    }

    impl TestEnv {
        fn with(mut self, name: &str, value: Value) -> Self {
            self.vars.insert(name.to_string(), value);
            self
        }
    }

    impl Environment for TestEnv {
        fn get_var(&self, name: &str) -> Option<&Value> {
            self.vars.get(name)
        }

        fn remaining(&self) -> u64 {
            self.window.len() as u64
        }

        fn find_marker(&self, marker: &[u8]) -> u64 {
            memchr::memmem::find(&self.window, marker).unwrap_or(self.window.len()) as u64
        }
    }

    fn eval_in(src: &str, env: &TestEnv) -> Result<Value, EvalError> {
        let expr = Expression::parse(src).unwrap();
        eval_expr(expr.root(), env)
    }

    fn eval(src: &str) -> Value {
        eval_in(src, &TestEnv::default()).unwrap()
    }

    #[test]
    fn test_literals() {
        assert_eq!(eval("{0xFF}"), Value::Int(255));
        assert_eq!(eval("{'IHDR'}"), Value::Text("IHDR".into()));
        assert_eq!(eval("{-1}"), Value::Int(-1));
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(eval("1 + 1 << 4"), Value::Int(32));
        assert_eq!(eval("6 & 3 ^ 1"), Value::Int(3));
    }

    #[test]
    fn test_truncating_division() {
        assert_eq!(eval("7 / 2"), Value::Int(3));
        assert_eq!(eval("-7 / 2"), Value::Int(-3));
        assert_eq!(eval("-7 % 2"), Value::Int(-1));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval_in("1 / 0", &TestEnv::default()).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::DivisionByZero);
        let err = eval_in("1 % 0", &TestEnv::default()).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::DivisionByZero);
    }

    #[test]
    fn test_shift_out_of_range() {
        assert_eq!(eval("1 << 63"), Value::Int(i64::MIN));
        assert_eq!(eval("-16 >> 2"), Value::Int(-4));
        let err = eval_in("1 << 64", &TestEnv::default()).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Type);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("1 < 2 and 3 >= 3"), Value::Bool(true));
        assert_eq!(eval("not 0"), Value::Bool(true));
        assert_eq!(eval("0 or 5 > 6"), Value::Bool(false));
    }

    #[test]
    fn test_text_equality() {
        let env = TestEnv::default().with("type", Value::from("IHDR"));
        assert_eq!(eval_in("type == 'IHDR'", &env).unwrap(), Value::Bool(true));
        assert_eq!(eval_in("type != 'IEND'", &env).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_text_in_arithmetic_is_type_error() {
        let env = TestEnv::default().with("type", Value::from("IHDR"));
        let err = eval_in("type + 1", &env).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Type);
    }

    #[test]
    fn test_field_reference() {
        let env = TestEnv::default().with("length", Value::Int(13));
        assert_eq!(eval_in("{length - 4}", &env).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_unknown_variable() {
        let err = eval_in("missing + 1", &TestEnv::default()).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UnknownVariable);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_remaining_shadows_bound_variable() {
        let env = TestEnv {
            window: vec![0; 5],
            ..TestEnv::default()
        }
        .with("remaining", Value::Int(99));
        assert_eq!(eval_in("remaining", &env).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_short_circuit_skips_errors() {
        assert_eq!(eval("0 and missing"), Value::Bool(false));
        assert_eq!(eval("1 or missing"), Value::Bool(true));
        assert_eq!(eval("1 ? 10 : 1 / 0"), Value::Int(10));
        assert_eq!(eval("0 ? missing : 20"), Value::Int(20));
    }

    #[test]
    fn test_index_on_text() {
        let env = TestEnv::default().with("magic", Value::from("MZ"));
        assert_eq!(eval_in("magic[1]", &env).unwrap(), Value::Int(b'Z' as i64));
        assert!(eval_in("magic[2]", &env).is_err());
        let env = env.with("n", Value::Int(3));
        assert!(eval_in("n[0]", &env).is_err());
    }

    #[test]
    fn test_unknown_function() {
        let err = eval_in("frobnicate(1)", &TestEnv::default()).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UnknownFunction);
    }

    #[test]
    fn test_until_marker_call() {
        let env = TestEnv {
            window: b"key: value\r\nnext".to_vec(),
            ..TestEnv::default()
        };
        assert_eq!(eval_in("until_marker(0x0D, 0x0A)", &env).unwrap(), Value::Int(10));
        assert_eq!(eval_in("until_marker(0xFF)", &env).unwrap(), Value::Int(16));
    }

    #[test]
    fn test_parse_int_call() {
        let env = TestEnv::default()
            .with("size", Value::from("0000644\0"))
            .with("blank", Value::from("   "));
        assert_eq!(eval_in("parse_int(size, 8)", &env).unwrap(), Value::Int(420));
        assert_eq!(eval_in("parse_int(blank, 10)", &env).unwrap(), Value::Int(0));
    }
}
