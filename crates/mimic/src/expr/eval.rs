//! Stack-machine evaluator.
//!
//! The tree is walked with an explicit work list and value stack instead of
//! recursion: visiting a node schedules its operands and an operation that pops
//! their results. Closures are first-class values and run in a fresh local frame.

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};
use super::builtins::Functions;
use super::error::ExpressionError;
use super::value::{Closure, Function, Value};
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Source of free identifiers (workflow context, environment, ...).
pub trait Resolver {
    fn resolve(&self, name: &str) -> Option<Value>;
}

impl Resolver for IndexMap<String, Value> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Resolver for HashMap<String, Value> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Resolver for () {
    fn resolve(&self, _name: &str) -> Option<Value> {
        None
    }
}

enum Task<'a> {
    Eval(&'a Expr),
    Push(Value),
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Left operand of `&&`/`||` is on the stack; decide whether `right` runs.
    Logical { op: BinaryOp, right: &'a Expr },
    /// Right operand of `&&`/`||` is on the stack; it must be a boolean.
    RequireBool(BinaryOp),
    Select(&'a str),
    Index,
    Call(usize),
    List(usize),
    Map(usize),
    Range,
}

pub struct Evaluator<'e> {
    functions: &'e Functions,
    resolver: &'e dyn Resolver,
    locals: Vec<IndexMap<String, Value>>,
}

impl<'e> Evaluator<'e> {
    pub fn new(functions: &'e Functions, resolver: &'e dyn Resolver) -> Self {
        Evaluator {
            functions,
            resolver,
            locals: Vec::new(),
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, ExpressionError> {
        let mut tasks = vec![Task::Eval(expr)];
        let mut values: Vec<Value> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                Task::Eval(expr) => self.visit(expr, &mut tasks, &mut values)?,
                Task::Push(value) => values.push(value),
                Task::Unary(op) => {
                    let operand = pop(&mut values)?;
                    values.push(unary(op, operand)?);
                }
                Task::Binary(op) => {
                    let right = pop(&mut values)?;
                    let left = pop(&mut values)?;
                    values.push(binary(op, left, right)?);
                }
                Task::Logical { op, right } => {
                    let left = pop(&mut values)?;
                    let Some(decided) = left.as_bool() else {
                        return Err(invalid(&left, &Value::Bool(true), op));
                    };
                    if (op == BinaryOp::And) != decided {
                        values.push(Value::Bool(decided));
                    } else {
                        tasks.push(Task::RequireBool(op));
                        tasks.push(Task::Eval(right));
                    }
                }
                Task::RequireBool(op) => {
                    let right = pop(&mut values)?;
                    if right.as_bool().is_none() {
                        return Err(invalid(&Value::Bool(true), &right, op));
                    }
                    values.push(right);
                }
                Task::Select(field) => {
                    let target = pop(&mut values)?;
                    values.push(select(&target, field)?);
                }
                Task::Index => {
                    let index = pop(&mut values)?;
                    let target = pop(&mut values)?;
                    values.push(index_value(&target, &index)?);
                }
                Task::Call(count) => {
                    let args = values.split_off(values.len().saturating_sub(count));
                    let callee = pop(&mut values)?;
                    let Value::Function(function) = callee else {
                        return Err(ExpressionError::NotCallable(callee.kind().to_string()));
                    };
                    values.push(self.call(&function, args)?);
                }
                Task::List(count) => {
                    let items = values.split_off(values.len().saturating_sub(count));
                    values.push(Value::Array(items));
                }
                Task::Map(count) => {
                    let flat = values.split_off(values.len().saturating_sub(count * 2));
                    let mut map = IndexMap::with_capacity(count);
                    let mut iter = flat.into_iter();
                    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                        let key = match key {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        map.insert(key, value);
                    }
                    values.push(Value::Map(map));
                }
                Task::Range => {
                    let end = pop(&mut values)?;
                    let start = pop(&mut values)?;
                    match (&start, &end) {
                        (Value::Int(a), Value::Int(b)) => values.push(Value::Array((*a..*b).map(Value::Int).collect())),
                        _ => return Err(ExpressionError::InvalidOperation {
                            x: start.kind().to_string(),
                            y: end.kind().to_string(),
                            op: "..".to_string(),
                        }),
                    }
                }
            }
        }
        pop(&mut values)
    }

    /// Schedule the evaluation of `expr`. Operands are pushed after the
    /// operation so they run first; the left operand is pushed last.
    fn visit<'a>(&mut self, expr: &'a Expr, tasks: &mut Vec<Task<'a>>, values: &mut Vec<Value>) -> Result<(), ExpressionError> {
        match expr {
            Expr::Literal(literal) => values.push(literal_value(literal)),
            Expr::Identifier(name) => values.push(self.lookup(name)?),
            Expr::Selector { target, field } => {
                tasks.push(Task::Select(field));
                tasks.push(Task::Eval(target));
            }
            Expr::Index { target, index } => {
                tasks.push(Task::Index);
                tasks.push(Task::Eval(index));
                tasks.push(Task::Eval(target));
            }
            Expr::Call { callee, args } => {
                tasks.push(Task::Call(args.len()));
                for arg in args.iter().rev() {
                    tasks.push(Task::Eval(arg));
                }
                tasks.push(Task::Eval(callee));
            }
            Expr::Closure { params, body } => {
                let closure = Closure {
                    params: params.clone(),
                    body: Arc::clone(body),
                    captured: self.captured(),
                };
                values.push(Value::Function(Function::Closure(Arc::new(closure))));
            }
            Expr::Unary { op, operand } => {
                tasks.push(Task::Unary(*op));
                tasks.push(Task::Eval(operand));
            }
            Expr::Binary { op, left, right } => {
                if matches!(op, BinaryOp::And | BinaryOp::Or) {
                    tasks.push(Task::Logical { op: *op, right });
                } else {
                    tasks.push(Task::Binary(*op));
                    tasks.push(Task::Eval(right));
                }
                tasks.push(Task::Eval(left));
            }
            Expr::Paren(inner) => tasks.push(Task::Eval(inner)),
            Expr::Sequence(items) if expr.is_map() => {
                tasks.push(Task::Map(items.len()));
                for item in items.iter().rev() {
                    let Expr::KeyValue { key, value } = item else {
                        return Err(ExpressionError::function("map", "every element must be a key: value pair"));
                    };
                    tasks.push(Task::Eval(value));
                    match key.as_ref() {
                        Expr::Identifier(name) => tasks.push(Task::Push(Value::String(name.clone()))),
                        other => tasks.push(Task::Eval(other)),
                    }
                }
            }
            Expr::Sequence(items) => {
                tasks.push(Task::List(items.len()));
                for item in items.iter().rev() {
                    tasks.push(Task::Eval(item));
                }
            }
            Expr::KeyValue { .. } => {
                return Err(ExpressionError::function("map", "key: value pair outside of a map"));
            }
            Expr::Range { start, end } => {
                tasks.push(Task::Range);
                tasks.push(Task::Eval(end));
                tasks.push(Task::Eval(start));
            }
        }
        Ok(())
    }

    /// Locals first, then the resolver, then the function registry.
    fn lookup(&self, name: &str) -> Result<Value, ExpressionError> {
        for frame in self.locals.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Ok(value.clone());
            }
        }
        if let Some(value) = self.resolver.resolve(name) {
            return Ok(value);
        }
        if let Some(function) = self.functions.get(name) {
            return Ok(Value::Function(function.clone()));
        }
        Err(ExpressionError::Undefined(name.to_string()))
    }

    fn captured(&self) -> IndexMap<String, Value> {
        let mut captured = IndexMap::new();
        for frame in &self.locals {
            for (name, value) in frame {
                captured.insert(name.clone(), value.clone());
            }
        }
        captured
    }

    /// Invoke a function value with already evaluated arguments.
    pub fn call(&mut self, function: &Function, args: Vec<Value>) -> Result<Value, ExpressionError> {
        match function {
            Function::Native(native) => (native.func)(self, args),
            Function::Closure(closure) => {
                if args.len() != closure.params.len() {
                    return Err(ExpressionError::function(
                        "closure",
                        format!("expected {} arguments but got {}", closure.params.len(), args.len()),
                    ));
                }
                let mut frame = closure.captured.clone();
                for (param, arg) in closure.params.iter().zip(args) {
                    frame.insert(param.clone(), arg);
                }
                self.locals.push(frame);
                let result = self.eval(&closure.body);
                self.locals.pop();
                result
            }
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

fn pop(values: &mut Vec<Value>) -> Result<Value, ExpressionError> {
    values
        .pop()
        .ok_or_else(|| ExpressionError::function("eval", "value stack underflow"))
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(n) => Value::Float(*n),
        Literal::Str(s) => Value::String(s.clone()),
    }
}

fn invalid(x: &Value, y: &Value, op: BinaryOp) -> ExpressionError {
    ExpressionError::InvalidOperation {
        x: x.kind().to_string(),
        y: y.kind().to_string(),
        op: op.as_str().to_string(),
    }
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, ExpressionError> {
    match (op, &operand) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(|| overflow("-")),
        (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
        _ => Err(ExpressionError::InvalidUnary {
            op: match op {
                UnaryOp::Not => "!".to_string(),
                UnaryOp::Neg => "-".to_string(),
            },
            operand: operand.kind().to_string(),
        }),
    }
}

fn overflow(op: &str) -> ExpressionError {
    ExpressionError::function(op, "integer overflow")
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left.loose_eq(&right))),
        BinaryOp::Ne => Ok(Value::Bool(!left.loose_eq(&right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right).ok_or_else(|| invalid(&left, &right, op))?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, left, right),
        BinaryOp::And | BinaryOp::Or => match (&left, &right) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if op == BinaryOp::And { *a && *b } else { *a || *b })),
            _ => Err(invalid(&left, &right, op)),
        },
    }
}

/// Total order on numbers, lexicographic on strings.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => Some(left.as_f64()?.total_cmp(&right.as_f64()?)),
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExpressionError> {
    match (&left, &right) {
        (Value::String(a), Value::String(b)) if op == BinaryOp::Add => Ok(Value::String(format!("{a}{b}"))),
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(ExpressionError::DivisionByZero),
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result.map(Value::Int).ok_or_else(|| overflow(op.as_str()))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (a, b) = (left.as_f64().unwrap_or_default(), right.as_f64().unwrap_or_default());
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(ExpressionError::DivisionByZero),
                BinaryOp::Div => a / b,
                _ => a % b,
            };
            Ok(Value::Float(result))
        }
        _ => Err(invalid(&left, &right, op)),
    }
}

/// Member access; a missing member, or any member of `null`, is `null`.
fn select(target: &Value, field: &str) -> Result<Value, ExpressionError> {
    match target {
        Value::Map(_) => Ok(target.field(field).cloned().unwrap_or_default()),
        Value::Null => Ok(Value::Null),
        other => Err(ExpressionError::InvalidIndex {
            target: other.kind().to_string(),
            index: format!("'{field}'"),
        }),
    }
}

/// `target[index]`: arrays and strings by integer (negative counts from the
/// end), maps by string. Out of range is `null`.
fn index_value(target: &Value, index: &Value) -> Result<Value, ExpressionError> {
    let position = |len: usize, i: i64| -> Option<usize> {
        let i = if i < 0 { len as i64 + i } else { i };
        (0..len as i64).contains(&i).then_some(i as usize)
    };
    match (target, index) {
        (Value::Array(items), Value::Int(i)) => Ok(position(items.len(), *i)
            .map(|p| items[p].clone())
            .unwrap_or_default()),
        (Value::String(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(position(chars.len(), *i)
                .map(|p| Value::String(chars[p].to_string()))
                .unwrap_or_default())
        }
        (Value::Map(_), Value::String(key)) => select(target, key),
        (Value::Null, _) => Ok(Value::Null),
        _ => Err(ExpressionError::InvalidIndex {
            target: target.kind().to_string(),
            index: index.kind().to_string(),
        }),
    }
}
