// Recursive-descent parser for the expression language

pub mod ast;

use crate::error::ParseError;
use crate::lexer::token::{Token, TokenKind};
use crate::span::Span;
use ast::*;

/// Parser that converts a token stream into an expression tree
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse a single complete expression. Trailing tokens are an error.
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        if !self.at_eof() {
            return Err(ParseError::expected(
                format!("unexpected token {}", self.peek()),
                "end of expression",
                self.peek_span(),
            ));
        }
        Ok(expr)
    }

    // ========== Token helpers ==========

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or(Span::dummy())
    }

    fn advance(&mut self) -> Token {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, Span::dummy()));
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<Token, ParseError> {
        if self.check(expected) {
            Ok(self.advance())
        } else {
            Err(ParseError::expected(
                format!("unexpected token {}", self.peek()),
                format!("{}", expected),
                self.peek_span(),
            ))
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    // ========== Expression parsing ==========

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_ternary()
    }

    /// Ternary is the lowest-precedence form (right-associative).
    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_logical_or()?;

        if self.eat(&TokenKind::Question) {
            let then_expr = self.parse_ternary()?;
            self.expect(&TokenKind::Colon)?;
            let else_expr = self.parse_ternary()?;
            Ok(Expr {
                span: expr.span.merge(else_expr.span),
                kind: ExprKind::Ternary {
                    cond: Box::new(expr),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                },
            })
        } else {
            Ok(expr)
        }
    }

    /// One left-associative precedence level: operands come from `next_fn`,
    /// and `map_op` says which tokens belong to this level.
    fn parse_binary_op(
        &mut self,
        mut next_fn: impl FnMut(&mut Self) -> Result<Expr, ParseError>,
        map_op: impl Fn(&TokenKind) -> Option<BinOp>,
    ) -> Result<Expr, ParseError> {
        let mut lhs = next_fn(self)?;
        while let Some(op) = map_op(self.peek()) {
            self.advance();
            let rhs = next_fn(self)?;
            lhs = Expr {
                span: lhs.span.merge(rhs.span),
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_logical_and, |tok| match tok {
            TokenKind::KwOr => Some(BinOp::LogOr),
            _ => None,
        })
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_equality, |tok| match tok {
            TokenKind::KwAnd => Some(BinOp::LogAnd),
            _ => None,
        })
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_comparison, |tok| match tok {
            TokenKind::EqEq => Some(BinOp::Eq),
            TokenKind::BangEq => Some(BinOp::Ne),
            _ => None,
        })
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bitwise_or, |tok| match tok {
            TokenKind::Less => Some(BinOp::Lt),
            TokenKind::LessEq => Some(BinOp::Le),
            TokenKind::Greater => Some(BinOp::Gt),
            TokenKind::GreaterEq => Some(BinOp::Ge),
            _ => None,
        })
    }

    fn parse_bitwise_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bitwise_xor, |tok| match tok {
            TokenKind::Pipe => Some(BinOp::BitOr),
            _ => None,
        })
    }

    fn parse_bitwise_xor(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_bitwise_and, |tok| match tok {
            TokenKind::Caret => Some(BinOp::BitXor),
            _ => None,
        })
    }

    fn parse_bitwise_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_shift, |tok| match tok {
            TokenKind::Ampersand => Some(BinOp::BitAnd),
            _ => None,
        })
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_additive, |tok| match tok {
            TokenKind::LShift => Some(BinOp::Shl),
            TokenKind::RShift => Some(BinOp::Shr),
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_multiplicative, |tok| match tok {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_op(Self::parse_unary, |tok| match tok {
            TokenKind::Star => Some(BinOp::Mul),
            TokenKind::Slash => Some(BinOp::Div),
            TokenKind::Percent => Some(BinOp::Mod),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::KwNot => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.advance();
        let expr = self.parse_unary()?;
        Ok(Expr {
            span: start.merge(expr.span),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(expr),
            },
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.peek_span();

        match self.peek().clone() {
            TokenKind::IntLiteral(val) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::IntLiteral(val),
                    span: start,
                })
            }
            TokenKind::TextLiteral(val) => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::TextLiteral(val),
                    span: start,
                })
            }
            TokenKind::LParen => self.parse_paren_expr(),
            TokenKind::Ident(name) => {
                self.advance();
                self.parse_ident_suffix(name, start)
            }
            _ => Err(ParseError::expected(
                format!("unexpected token {}", self.peek()),
                "expression",
                start,
            )),
        }
    }

    fn parse_paren_expr(&mut self) -> Result<Expr, ParseError> {
        self.advance();
        let expr = self.parse_expr()?;
        self.expect(&TokenKind::RParen)?;
        Ok(expr)
    }

    /// An identifier followed by `(` is a call, by `[` an index access.
    fn parse_ident_suffix(&mut self, name: String, start: Span) -> Result<Expr, ParseError> {
        match self.peek() {
            TokenKind::LParen => {
                self.advance();
                let mut args = Vec::new();
                if !self.check(&TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                let end = self.expect(&TokenKind::RParen)?;
                Ok(Expr {
                    span: start.merge(end.span),
                    kind: ExprKind::Call { name, args },
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let index = self.parse_expr()?;
                let end = self.expect(&TokenKind::RBracket)?;
                Ok(Expr {
                    span: start.merge(end.span),
                    kind: ExprKind::Index {
                        name,
                        index: Box::new(index),
                    },
                })
            }
            _ => Ok(Expr {
                kind: ExprKind::Ident(name),
                span: start,
            }),
        }
    }
}
