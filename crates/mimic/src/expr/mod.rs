//! Workflow expression language.
//!
//! Expressions appear in workflow `if` conditions and step inputs, usually inside
//! `${{ ... }}` placeholders:
//!
//! ```text
//! ${{ steps.fetch.outputs.status == 'ok' && len(request.query.ids) > 0 }}
//! ${{ any([1, 2, 3, 4], x => x > 3) }}
//! ${{ format('{0}-{1}', env.PREFIX, randInt(100)) }}
//! ```
//!
//! Pipeline: [`Scanner`] → [`parse`] → [`Evaluator`]. Free identifiers are looked
//! up through a [`Resolver`]; functions come from a [`Functions`] registry and
//! are first-class values.

mod ast;
mod builtins;
mod error;
mod eval;
mod parser;
mod scanner;
mod token;
mod value;


pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use builtins::Functions;
pub use error::{ExpressionError, SyntaxError};
pub use eval::{Evaluator, Resolver};
pub use parser::parse;
pub use scanner::Scanner;
pub use token::{Position, Token, TokenKind};
pub use value::{Closure, Function, Native, NativeFn, Value};

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

enum Segment<'a> {
    Text(&'a str),
    Expr(&'a str),
}

fn segments(template: &str) -> Result<Vec<Segment<'_>>, ExpressionError> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let body = &rest[start + OPEN.len()..];
        let Some(end) = body.find(CLOSE) else {
            let consumed = &template[..template.len() - rest.len() + start];
            let line = consumed.matches('\n').count() + 1;
            let column = consumed.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
            return Err(ExpressionError::Syntax(vec![SyntaxError {
                position: Position { line, column },
                message: "unterminated '${{' placeholder".to_string(),
            }]));
        };
        segments.push(Segment::Expr(&body[..end]));
        rest = &body[end + CLOSE.len()..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

/// True if `s` contains a `${{ }}` placeholder.
pub fn has_placeholder(s: &str) -> bool {
    s.contains(OPEN)
}

/// Parse every placeholder of `template` without evaluating.
pub fn check(template: &str) -> Result<(), ExpressionError> {
    for segment in segments(template)? {
        if let Segment::Expr(source) = segment {
            parse(source)?;
        }
    }
    Ok(())
}

/// Render `template`. A template that is exactly one placeholder yields the
/// expression's value unchanged; otherwise placeholders are stringified and
/// concatenated with the surrounding text.
pub fn interpolate(template: &str, evaluator: &mut Evaluator<'_>) -> Result<Value, ExpressionError> {
    let segments = segments(template)?;
    if let [Segment::Expr(source)] = segments.as_slice() {
        return evaluator.eval(&parse(source)?);
    }
    let mut out = String::with_capacity(template.len());
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Expr(source) => {
                let value = evaluator.eval(&parse(source)?)?;
                out.push_str(&value.to_string());
            }
        }
    }
    Ok(Value::String(out))
}

/// Parse and evaluate `source` with the built-in functions.
pub fn evaluate(source: &str, resolver: &dyn Resolver) -> Result<Value, ExpressionError> {
    let functions = Functions::builtin();
    let expr = parse(source)?;
    Evaluator::new(&functions, resolver).eval(&expr)
}
