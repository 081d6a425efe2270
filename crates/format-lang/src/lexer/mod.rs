// Hand-written lexer for the expression language

pub mod token;

use crate::error::LexError;
use crate::span::Span;
use token::{Token, TokenKind};

/// Strip one pair of surrounding `{ }` delimiters, if present.
/// Returns the inner text and its byte offset in the original string.
pub fn strip_delimiters(source: &str) -> (&str, usize) {
    let trimmed = source.trim();
    let lead = source.len() - source.trim_start().len();
    if trimmed.len() >= 2 && trimmed.starts_with('{') && trimmed.ends_with('}') {
        (&trimmed[1..trimmed.len() - 1], lead + 1)
    } else {
        (trimmed, lead)
    }
}

/// Lexer that converts expression text into tokens
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            errors: Vec::new(),
        }
    }

    /// Tokenize the entire source, returning tokens and any errors
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            if self.pos >= self.bytes.len() {
                tokens.push(Token::new(
                    TokenKind::Eof,
                    Span::new(self.pos as u32, self.pos as u32),
                ));
                break;
            }
            match self.next_token() {
                Some(token) => tokens.push(token),
                None => {
                    // Skip the unrecognized character
                    let start = self.pos;
                    let ch = self.source[start..].chars().next().unwrap_or('?');
                    self.pos += ch.len_utf8();
                    self.errors.push(LexError::new(
                        format!("unexpected character '{}'", ch),
                        Span::new(start as u32, self.pos as u32),
                    ));
                }
            }
        }
        (tokens, self.errors)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.bytes.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start as u32, self.pos as u32)
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> Option<Token> {
        let start = self.pos;
        let b = self.peek()?;

        if b.is_ascii_digit() {
            return Some(self.lex_number(start));
        }

        if b == b'\'' {
            return Some(self.lex_text(start));
        }

        if b.is_ascii_alphabetic() || b == b'_' {
            return Some(self.lex_ident(start));
        }

        self.lex_operator(start)
    }

    fn lex_number(&mut self, start: usize) -> Token {
        let is_hex = self.bytes[self.pos] == b'0'
            && matches!(self.bytes.get(self.pos + 1), Some(b'x') | Some(b'X'));
        let (radix, digit_start) = if is_hex {
            self.pos += 2;
            (16, self.pos)
        } else {
            (10, self.pos)
        };
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_hexdigit() && radix == 16
                || self.bytes[self.pos].is_ascii_digit())
        {
            self.pos += 1;
        }
        let digits = &self.source[digit_start..self.pos];
        let span = self.span_from(start);
        if digits.is_empty() {
            self.errors
                .push(LexError::new("expected hex digits after '0x'", span));
            return Token::new(TokenKind::IntLiteral(0), span);
        }
        if self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.errors.push(LexError::new(
                format!("invalid digit in numeric literal '{}'", digits),
                span,
            ));
        }
        // Hex literals cover the full 64-bit pattern; decimals must fit i64
        let value = if radix == 16 {
            u64::from_str_radix(digits, 16).map(|v| v as i64).ok()
        } else {
            digits.parse::<i64>().ok()
        };
        match value {
            Some(v) => Token::new(TokenKind::IntLiteral(v), span),
            None => {
                self.errors
                    .push(LexError::new("integer literal overflow", span));
                Token::new(TokenKind::IntLiteral(0), span)
            }
        }
    }

    /// Process an escape sequence at self.pos (the byte after '\\').
    fn lex_escape_char(&mut self) -> char {
        let b = self.bytes[self.pos];
        self.pos += 1;
        match b {
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'0' => '\0',
            b'\\' => '\\',
            b'\'' => '\'',
            b'x' => {
                let hex_start = self.pos;
                while self.pos < self.bytes.len()
                    && self.bytes[self.pos].is_ascii_hexdigit()
                    && self.pos - hex_start < 2
                {
                    self.pos += 1;
                }
                match u8::from_str_radix(&self.source[hex_start..self.pos], 16) {
                    Ok(val) => val as char,
                    Err(_) => {
                        self.errors.push(LexError::new(
                            "invalid hex escape",
                            Span::new(hex_start as u32, self.pos as u32),
                        ));
                        '\0'
                    }
                }
            }
            other => {
                self.errors.push(LexError::new(
                    format!("unknown escape sequence '\\{}'", other as char),
                    Span::new((self.pos - 2) as u32, self.pos as u32),
                ));
                other as char
            }
        }
    }

    fn lex_text(&mut self, start: usize) -> Token {
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            if self.pos >= self.bytes.len() {
                self.errors.push(LexError::new(
                    "unterminated text literal",
                    self.span_from(start),
                ));
                break;
            }
            match self.bytes[self.pos] {
                b'\'' => {
                    self.pos += 1;
                    break;
                }
                b'\\' if self.pos + 1 < self.bytes.len() => {
                    self.pos += 1;
                    let ch = self.lex_escape_char();
                    value.push(ch);
                }
                _ => {
                    let ch = self.source[self.pos..].chars().next().unwrap_or('\u{FFFD}');
                    value.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        Token::new(TokenKind::TextLiteral(value), self.span_from(start))
    }

    fn lex_ident(&mut self, start: usize) -> Token {
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric() || self.bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
        let text = &self.source[start..self.pos];
        let kind = TokenKind::keyword_from_str(text)
            .unwrap_or_else(|| TokenKind::Ident(text.to_string()));
        Token::new(kind, self.span_from(start))
    }

    fn lex_operator(&mut self, start: usize) -> Option<Token> {
        let b = self.advance()?;
        let kind = match b {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'&' => TokenKind::Ampersand,
            b'|' => TokenKind::Pipe,
            b'^' => TokenKind::Caret,
            b'<' => {
                if self.peek() == Some(b'<') {
                    self.advance();
                    TokenKind::LShift
                } else if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::LessEq
                } else {
                    TokenKind::Less
                }
            }
            b'>' => {
                if self.peek() == Some(b'>') {
                    self.advance();
                    TokenKind::RShift
                } else if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::GreaterEq
                } else {
                    TokenKind::Greater
                }
            }
            b'=' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::EqEq
            }
            b'!' if self.peek() == Some(b'=') => {
                self.advance();
                TokenKind::BangEq
            }
            b'?' => TokenKind::Question,
            b':' => TokenKind::Colon,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b',' => TokenKind::Comma,
            _ => {
                // Undo the advance; tokenize() reports the character
                self.pos = start;
                return None;
            }
        };
        Some(Token::new(kind, self.span_from(start)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<TokenKind> {
        let (tokens, errors) = Lexer::new(input).tokenize();
        assert!(errors.is_empty(), "unexpected lex errors: {:?}", errors);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    fn lex_errors(input: &str) -> Vec<LexError> {
        Lexer::new(input).tokenize().1
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Ident(s.to_string())
    }

    #[test]
    fn test_decimal_integer() {
        assert_eq!(lex("42"), vec![TokenKind::IntLiteral(42), TokenKind::Eof]);
    }

    #[test]
    fn test_hex_integer() {
        assert_eq!(lex("0xFF"), vec![TokenKind::IntLiteral(255), TokenKind::Eof]);
        assert_eq!(lex("0Xab"), vec![TokenKind::IntLiteral(0xAB), TokenKind::Eof]);
    }

    #[test]
    fn test_hex_full_width() {
        assert_eq!(
            lex("0xFFFFFFFFFFFFFFFF"),
            vec![TokenKind::IntLiteral(-1), TokenKind::Eof]
        );
    }

    #[test]
    fn test_decimal_overflow() {
        let errors = lex_errors("99999999999999999999");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("overflow"));
    }

    #[test]
    fn test_text_literal() {
        assert_eq!(
            lex("'IHDR'"),
            vec![TokenKind::TextLiteral("IHDR".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_text_escapes() {
        assert_eq!(
            lex(r"'a\'b\x41\0'"),
            vec![TokenKind::TextLiteral("a'bA\0".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_text() {
        let errors = lex_errors("'abc");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unterminated"));
    }

    #[test]
    fn test_unexpected_character() {
        let errors = lex_errors("a $ b");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "unexpected character '$'");
        assert_eq!(errors[0].span, Span::new(2, 3));
    }

    #[test]
    fn test_lone_bang_is_rejected() {
        assert_eq!(lex_errors("!a").len(), 1);
        assert_eq!(lex_errors("a = b").len(), 1);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            lex("a and not b or c"),
            vec![
                ident("a"),
                TokenKind::KwAnd,
                TokenKind::KwNot,
                ident("b"),
                TokenKind::KwOr,
                ident("c"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(lex("android"), vec![ident("android"), TokenKind::Eof]);
    }

    #[test]
    fn test_arithmetic_operators() {
        assert_eq!(
            lex("+ - * / %"),
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::Percent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            lex("== != < > <= >="),
            vec![
                TokenKind::EqEq,
                TokenKind::BangEq,
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::LessEq,
                TokenKind::GreaterEq,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_shift_is_maximal_munch() {
        assert_eq!(
            lex("a<<2>>1"),
            vec![
                ident("a"),
                TokenKind::LShift,
                TokenKind::IntLiteral(2),
                TokenKind::RShift,
                TokenKind::IntLiteral(1),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            lex("a<=b"),
            vec![ident("a"), TokenKind::LessEq, ident("b"), TokenKind::Eof]
        );
    }

    #[test]
    fn test_punctuation() {
        assert_eq!(
            lex("f(a[0], b) ? 1 : 2"),
            vec![
                ident("f"),
                TokenKind::LParen,
                ident("a"),
                TokenKind::LBracket,
                TokenKind::IntLiteral(0),
                TokenKind::RBracket,
                TokenKind::Comma,
                ident("b"),
                TokenKind::RParen,
                TokenKind::Question,
                TokenKind::IntLiteral(1),
                TokenKind::Colon,
                TokenKind::IntLiteral(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strip_delimiters() {
        assert_eq!(strip_delimiters("{length - 4}"), ("length - 4", 1));
        assert_eq!(strip_delimiters("  { x }  "), (" x ", 3));
        assert_eq!(strip_delimiters("x + 1"), ("x + 1", 0));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(lex(""), vec![TokenKind::Eof]);
    }
}
