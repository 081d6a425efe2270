// Parsed expression attached to schema fields

use crate::error::Error;
use crate::lexer::{strip_delimiters, Lexer};
use crate::parser::ast::Expr;
use crate::parser::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An expression parsed once at schema load time.
///
/// Accepts `{...}`-delimited text as written in schemas, or bare text.
/// Spans in the tree are relative to the text inside the delimiters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, Error> {
        let (inner, _) = strip_delimiters(source);
        let (tokens, errors) = Lexer::new(inner).tokenize();
        if !errors.is_empty() {
            return Err(Error::Lex(errors));
        }
        let root = Parser::new(tokens).parse().map_err(Error::Parse)?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// The text this expression was parsed from
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for Expression {
    type Error = Error;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Expression::parse(&source)
    }
}

impl From<Expression> for String {
    fn from(expr: Expression) -> Self {
        expr.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::ExprKind;

    #[test]
    fn test_parse_with_delimiters() {
        let expr = Expression::parse("{length - 4}").unwrap();
        assert_eq!(expr.source(), "{length - 4}");
        assert_eq!(expr.root().to_string(), "(length - 4)");
    }

    #[test]
    fn test_parse_bare_text() {
        let expr = Expression::parse("0xFF").unwrap();
        assert!(matches!(expr.root().kind, ExprKind::IntLiteral(255)));
    }

    #[test]
    fn test_lex_error_is_reported() {
        match Expression::parse("{a # b}") {
            Err(Error::Lex(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("expected lex error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(matches!(
            Expression::parse("{(a + 1}"),
            Err(Error::Parse(_))
        ));
    }
}
