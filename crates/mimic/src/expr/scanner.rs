//! Scanner: source text to tokens.
//!
//! Errors are recorded with their position and scanning carries on, so a single
//! pass reports every lexical problem.

use super::error::SyntaxError;
use super::token::{Position, Token, TokenKind};

pub struct Scanner {
    source: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    errors: Vec<SyntaxError>,
}

impl Scanner {
    pub fn new(source: &str) -> Self {
        Scanner {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            errors: Vec::new(),
        }
    }

    /// Scan the whole input. The token list always ends with [`TokenKind::Eof`].
    pub fn scan(mut self) -> (Vec<Token>, Vec<SyntaxError>) {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        (tokens, self.errors)
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        self.pos += 1;
        if ch == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn error(&mut self, position: Position, message: impl Into<String>) {
        self.errors.push(SyntaxError {
            position,
            message: message.into(),
        });
    }

    fn next_token(&mut self) -> Token {
        loop {
            while self.current().is_some_and(char::is_whitespace) {
                self.advance();
            }
            let position = self.position();
            let Some(ch) = self.current() else {
                return Token {
                    kind: TokenKind::Eof,
                    position,
                };
            };
            if let Some(kind) = self.token_kind(ch, position) {
                return Token { kind, position };
            }
        }
    }

    /// Kind of the token starting at `ch`; `None` after an error was recorded.
    fn token_kind(&mut self, ch: char, position: Position) -> Option<TokenKind> {
        if ch.is_alphabetic() || ch == '_' {
            let word = self.identifier();
            return Some(TokenKind::keyword(&word).unwrap_or(TokenKind::Identifier(word)));
        }
        if ch.is_ascii_digit() {
            return self.number(position);
        }
        if ch == '\'' {
            return self.raw_string(position);
        }
        if ch == '"' {
            return self.escaped_string(position);
        }

        self.advance();
        let next = self.current();
        let two = |scanner: &mut Scanner, kind: TokenKind| {
            scanner.advance();
            Some(kind)
        };
        match (ch, next) {
            ('&', Some('&')) => two(self, TokenKind::And),
            ('|', Some('|')) => two(self, TokenKind::Or),
            ('=', Some('=')) => two(self, TokenKind::Eq),
            ('=', Some('>')) => two(self, TokenKind::Arrow),
            ('!', Some('=')) => two(self, TokenKind::Ne),
            ('<', Some('=')) => two(self, TokenKind::Le),
            ('>', Some('=')) => two(self, TokenKind::Ge),
            ('.', Some('.')) => two(self, TokenKind::DotDot),
            ('+', _) => Some(TokenKind::Plus),
            ('-', _) => Some(TokenKind::Minus),
            ('*', _) => Some(TokenKind::Star),
            ('/', _) => Some(TokenKind::Slash),
            ('%', _) => Some(TokenKind::Percent),
            ('<', _) => Some(TokenKind::Lt),
            ('>', _) => Some(TokenKind::Gt),
            ('!', _) => Some(TokenKind::Not),
            ('.', _) => Some(TokenKind::Dot),
            ('[', _) => Some(TokenKind::LBracket),
            (']', _) => Some(TokenKind::RBracket),
            ('(', _) => Some(TokenKind::LParen),
            (')', _) => Some(TokenKind::RParen),
            ('{', _) => Some(TokenKind::LBrace),
            ('}', _) => Some(TokenKind::RBrace),
            (',', _) => Some(TokenKind::Comma),
            (':', _) => Some(TokenKind::Colon),
            _ => {
                self.error(position, format!("unexpected character '{ch}'"));
                None
            }
        }
    }

    fn identifier(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' || (ch == '-' && word_continues(self.peek())) {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    fn number(&mut self, position: Position) -> Option<TokenKind> {
        let mut text = String::new();
        let mut is_float = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                text.push(ch);
            } else if ch == '.' && !is_float && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push(ch);
            } else {
                break;
            }
            self.advance();
        }
        if is_float {
            match text.parse() {
                Ok(n) => Some(TokenKind::Float(n)),
                Err(_) => {
                    self.error(position, format!("invalid number '{text}'"));
                    None
                }
            }
        } else {
            match text.parse() {
                Ok(n) => Some(TokenKind::Integer(n)),
                Err(_) => {
                    self.error(position, format!("integer '{text}' out of range"));
                    None
                }
            }
        }
    }

    fn raw_string(&mut self, position: Position) -> Option<TokenKind> {
        self.advance();
        let mut text = String::new();
        while let Some(ch) = self.advance() {
            if ch == '\'' {
                // '' inside a raw string is a literal quote
                if self.current() == Some('\'') {
                    self.advance();
                    text.push('\'');
                    continue;
                }
                return Some(TokenKind::Str(text));
            }
            text.push(ch);
        }
        self.error(position, "unterminated string");
        None
    }

    fn escaped_string(&mut self, position: Position) -> Option<TokenKind> {
        self.advance();
        let mut text = String::new();
        while let Some(ch) = self.advance() {
            match ch {
                '"' => return Some(TokenKind::Str(text)),
                '\\' => {
                    let escape_at = self.position();
                    match self.advance() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some('0') => text.push('\0'),
                        Some(c @ ('\\' | '"' | '\'')) => text.push(c),
                        Some(other) => {
                            self.error(escape_at, format!("unknown escape '\\{other}'"));
                            text.push(other);
                        }
                        None => break,
                    }
                }
                _ => text.push(ch),
            }
        }
        self.error(position, "unterminated string");
        None
    }
}

/// `-` continues an identifier (`my-step`) only when a letter follows.
fn word_continues(next: Option<char>) -> bool {
    next.is_some_and(char::is_alphabetic)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, errors) = Scanner::new(source).scan();
        assert!(errors.is_empty(), "{errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a >= 1 && !b || c != 'x'"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Ge,
                TokenKind::Integer(1),
                TokenKind::And,
                TokenKind::Not,
                TokenKind::Identifier("b".into()),
                TokenKind::Or,
                TokenKind::Identifier("c".into()),
                TokenKind::Ne,
                TokenKind::Str("x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_literals_and_keywords() {
        assert_eq!(
            kinds(r#"1.5 1..3 true null "a\"b\n" 'it''s'"#),
            vec![
                TokenKind::Float(1.5),
                TokenKind::Integer(1),
                TokenKind::DotDot,
                TokenKind::Integer(3),
                TokenKind::True,
                TokenKind::Null,
                TokenKind::Str("a\"b\n".into()),
                TokenKind::Str("it's".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_closure_and_selectors() {
        assert_eq!(
            kinds("x => steps.my-step.outputs"),
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::Arrow,
                TokenKind::Identifier("steps".into()),
                TokenKind::Dot,
                TokenKind::Identifier("my-step".into()),
                TokenKind::Dot,
                TokenKind::Identifier("outputs".into()),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("a - b"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Minus,
                TokenKind::Identifier("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_errors_report_position_and_continue() {
        let (tokens, errors) = Scanner::new("a #\n  b @ 'open").scan();
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            vec![
                "1:3: unexpected character '#'",
                "2:5: unexpected character '@'",
                "2:7: unterminated string",
            ]
        );
        let identifiers = tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Identifier(_)))
            .count();
        assert_eq!(identifiers, 2);
    }
}
