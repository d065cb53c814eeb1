//! Recursive descent parser with precedence climbing for binary operators.

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::error::{ExpressionError, SyntaxError};
use super::scanner::Scanner;
use super::token::{Token, TokenKind};
use std::sync::Arc;

/// Parse a complete expression. Scanner and parser errors are reported together.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let (tokens, mut errors) = Scanner::new(source).scan();
    let mut parser = Parser { tokens, pos: 0 };
    match parser.complete() {
        Ok(expr) if errors.is_empty() => Ok(expr),
        Ok(_) => Err(ExpressionError::Syntax(errors)),
        Err(e) => {
            errors.push(e);
            errors.sort_by_key(|e| (e.position.line, e.position.column));
            Err(ExpressionError::Syntax(errors))
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type Parsed = Result<Expr, SyntaxError>;

impl Parser {
    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, wanted: &str) -> SyntaxError {
        let token = self.current();
        SyntaxError {
            position: token.position,
            message: format!("expected {wanted} but found {}", token.kind.describe()),
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), SyntaxError> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&kind.describe()))
        }
    }

    fn complete(&mut self) -> Parsed {
        let expr = self.expression()?;
        if !self.check(&TokenKind::Eof) {
            return Err(self.unexpected("end of input"));
        }
        Ok(expr)
    }

    fn expression(&mut self) -> Parsed {
        if let Some(params) = self.closure_params() {
            let body = self.expression()?;
            return Ok(Expr::Closure {
                params,
                body: Arc::new(body),
            });
        }
        let start = self.binary(1)?;
        if self.check(&TokenKind::DotDot) {
            self.advance();
            let end = self.binary(1)?;
            return Ok(Expr::Range {
                start: Box::new(start),
                end: Box::new(end),
            });
        }
        Ok(start)
    }

    /// Consume `x =>` or `(x, y) =>` and return the parameter names.
    fn closure_params(&mut self) -> Option<Vec<String>> {
        match self.kind_at(0)? {
            TokenKind::Identifier(name) if self.kind_at(1) == Some(&TokenKind::Arrow) => {
                let params = vec![name.clone()];
                self.pos += 2;
                Some(params)
            }
            TokenKind::LParen => {
                let mut params = Vec::new();
                let mut offset = 1;
                loop {
                    match self.kind_at(offset)? {
                        TokenKind::RParen => break,
                        TokenKind::Identifier(name) => params.push(name.clone()),
                        _ => return None,
                    }
                    offset += 1;
                    match self.kind_at(offset)? {
                        TokenKind::Comma => offset += 1,
                        TokenKind::RParen => break,
                        _ => return None,
                    }
                }
                if self.kind_at(offset + 1) != Some(&TokenKind::Arrow) {
                    return None;
                }
                self.pos += offset + 2;
                Some(params)
            }
            _ => None,
        }
    }

    fn binary(&mut self, min_precedence: u8) -> Parsed {
        let mut left = self.unary()?;
        while let Some(op) = binary_op(&self.current().kind) {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.binary(precedence + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Parsed {
        let op = match self.current().kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Parsed {
        let mut expr = self.primary()?;
        loop {
            match self.current().kind {
                TokenKind::Dot => {
                    self.advance();
                    let field = match self.advance().kind {
                        TokenKind::Identifier(name) => name,
                        TokenKind::True => "true".to_string(),
                        TokenKind::False => "false".to_string(),
                        TokenKind::Null => "null".to_string(),
                        _ => {
                            self.pos -= 1;
                            return Err(self.unexpected("a property name"));
                        }
                    };
                    expr = Expr::Selector {
                        target: Box::new(expr),
                        field,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::LParen => {
                    self.advance();
                    let args = self.items(TokenKind::RParen)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Parsed {
        let token = self.advance();
        let expr = match token.kind {
            TokenKind::Identifier(name) => Expr::Identifier(name),
            TokenKind::Integer(n) => Expr::Literal(Literal::Int(n)),
            TokenKind::Float(n) => Expr::Literal(Literal::Float(n)),
            TokenKind::Str(s) => Expr::Literal(Literal::Str(s)),
            TokenKind::True => Expr::Literal(Literal::Bool(true)),
            TokenKind::False => Expr::Literal(Literal::Bool(false)),
            TokenKind::Null => Expr::Literal(Literal::Null),
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Expr::Paren(Box::new(inner))
            }
            TokenKind::LBracket => Expr::Sequence(self.elements(TokenKind::RBracket)?),
            TokenKind::LBrace => {
                let position = token.position;
                let elements = self.elements(TokenKind::RBrace)?;
                if elements.iter().any(|e| !matches!(e, Expr::KeyValue { .. })) {
                    return Err(SyntaxError {
                        position,
                        message: "every element of '{ }' must be a key: value pair".to_string(),
                    });
                }
                Expr::Sequence(elements)
            }
            _ => {
                self.pos -= 1;
                return Err(self.unexpected("an expression"));
            }
        };
        Ok(expr)
    }

    /// Comma separated expressions up to `close`; a trailing comma is allowed.
    fn items(&mut self, close: TokenKind) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        while !self.check(&close) {
            items.push(self.expression()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(close)?;
        Ok(items)
    }

    /// Sequence elements, each an expression or a `key: value` pair.
    fn elements(&mut self, close: TokenKind) -> Result<Vec<Expr>, SyntaxError> {
        let mut elements = Vec::new();
        while !self.check(&close) {
            let key = self.expression()?;
            let element = if self.check(&TokenKind::Colon) {
                self.advance();
                let value = self.expression()?;
                Expr::KeyValue {
                    key: Box::new(key),
                    value: Box::new(value),
                }
            } else {
                key
            };
            elements.push(element);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(close)?;
        if let Some(Expr::KeyValue { .. }) = elements.first() {
            if let Some(position) = elements.iter().position(|e| !matches!(e, Expr::KeyValue { .. })) {
                return Err(SyntaxError {
                    position: self.tokens[self.pos.saturating_sub(1)].position,
                    message: format!("map element {} is not a key: value pair", position + 1),
                });
            }
        }
        Ok(elements)
    }
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::Or => BinaryOp::Or,
        TokenKind::And => BinaryOp::And,
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::Ne => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Rem,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn int(n: i64) -> Expr {
        Expr::Literal(Literal::Int(n))
    }

    fn ident(name: &str) -> Expr {
        Expr::Identifier(name.to_string())
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3 == 7 || a && b").unwrap();
        let expected = binary(
            BinaryOp::Or,
            binary(
                BinaryOp::Eq,
                binary(BinaryOp::Add, int(1), binary(BinaryOp::Mul, int(2), int(3))),
                int(7),
            ),
            binary(BinaryOp::And, ident("a"), ident("b")),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_left_associative() {
        let expr = parse("10 - 4 - 3").unwrap();
        assert_eq!(
            expr,
            binary(BinaryOp::Sub, binary(BinaryOp::Sub, int(10), int(4)), int(3))
        );
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse("steps.s1.outputs['greet']").unwrap();
        let expected = Expr::Index {
            target: Box::new(Expr::Selector {
                target: Box::new(Expr::Selector {
                    target: Box::new(ident("steps")),
                    field: "s1".into(),
                }),
                field: "outputs".into(),
            }),
            index: Box::new(Expr::Literal(Literal::Str("greet".into()))),
        };
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_closures() {
        match parse("any(xs, x => x > 3)").unwrap() {
            Expr::Call { args, .. } => {
                assert!(matches!(&args[1], Expr::Closure { params, .. } if params == &["x"]));
            }
            other => panic!("unexpected {other:?}"),
        }
        match parse("(a, b) => a + b").unwrap() {
            Expr::Closure { params, .. } => assert_eq!(params, vec!["a", "b"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse("(a + b)").unwrap(), Expr::Paren(_)));
    }

    #[test]
    fn test_sequences_and_range() {
        assert!(parse("{a: 1, 'b': 2}").unwrap().is_map());
        assert!(parse("[a: 1]").unwrap().is_map());
        assert!(!parse("[1, 2,]").unwrap().is_map());
        assert!(matches!(parse("0..3").unwrap(), Expr::Range { .. }));
    }

    #[test]
    fn test_errors_are_located() {
        let err = parse("1 +").unwrap_err();
        assert_eq!(err.to_string(), "syntax error: 1:4: expected an expression but found end of input");

        let err = parse("a # b").unwrap_err();
        assert_eq!(err.syntax_errors()[0].to_string(), "1:3: unexpected character '#'");

        assert!(parse("{1, 2}").is_err());
        assert!(parse("[a: 1, 2]").is_err());
        assert!(parse("(1").is_err());
    }
}
