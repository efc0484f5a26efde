//! Value transform expressions
//!
//! Pairings may rewrite forwarded values with a small postfix (RPN)
//! expression. `v` pushes the input value; the expression must leave exactly
//! one value on the stack.
//!
//! ```rust
//! use propnet_core::Transform;
//! use serde_json::json;
//!
//! let halve: Transform = "v 2 /".parse().unwrap();
//! assert_eq!(halve.apply(&json!(0.5)).unwrap(), json!(0.25));
//!
//! let invert: Transform = "v !".parse().unwrap();
//! assert_eq!(invert.apply(&json!(true)).unwrap(), json!(false));
//! ```

use std::fmt;
use std::str::FromStr;

use serde_json::{Number, Value};
use thiserror::Error;

use crate::error::PropertyError;

/// Errors from parsing or evaluating a transform
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Unknown token \"{0}\"")]
    UnknownToken(String),

    #[error("Not enough operands for \"{0}\"")]
    StackUnderflow(String),

    #[error("Expression leaves {0} values on the stack, expected 1")]
    Unbalanced(usize),

    #[error("Operand is not a number")]
    NotNumeric,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Result is not a finite number")]
    NotFinite,
}

impl From<TransformError> for PropertyError {
    fn from(err: TransformError) -> Self {
        PropertyError::InvalidValue(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Literal(f64),
    Input,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Abs,
    Min,
    Max,
    Floor,
    Ceil,
    Round,
    Not,
    Dup,
    Swap,
}

impl Op {
    fn parse(token: &str) -> Result<Op, TransformError> {
        let op = match token {
            "v" => Op::Input,
            "+" => Op::Add,
            "-" => Op::Sub,
            "*" => Op::Mul,
            "/" => Op::Div,
            "%" => Op::Rem,
            "neg" => Op::Neg,
            "abs" => Op::Abs,
            "min" => Op::Min,
            "max" => Op::Max,
            "floor" => Op::Floor,
            "ceil" => Op::Ceil,
            "round" => Op::Round,
            "!" => Op::Not,
            "dup" => Op::Dup,
            "swap" => Op::Swap,
            other => other
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Op::Literal)
                .ok_or_else(|| TransformError::UnknownToken(other.to_string()))?,
        };
        Ok(op)
    }

    /// (operands consumed, results produced)
    fn arity(&self) -> (usize, usize) {
        match self {
            Op::Literal(_) | Op::Input => (0, 1),
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Rem | Op::Min | Op::Max => (2, 1),
            Op::Neg | Op::Abs | Op::Floor | Op::Ceil | Op::Round | Op::Not => (1, 1),
            Op::Dup => (1, 2),
            Op::Swap => (2, 2),
        }
    }
}

/// A parsed, stack-checked transform expression
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    source: String,
    ops: Vec<Op>,
}

impl Transform {
    /// The transform that returns its input unchanged
    pub fn identity() -> Self {
        Self {
            source: String::new(),
            ops: vec![Op::Input],
        }
    }

    pub fn is_identity(&self) -> bool {
        self.ops == [Op::Input]
    }

    /// Evaluate against an input value
    pub fn apply(&self, input: &Value) -> Result<Value, TransformError> {
        if self.is_identity() {
            return Ok(input.clone());
        }

        let mut stack: Vec<Value> = Vec::with_capacity(self.ops.len());

        for op in &self.ops {
            match op {
                Op::Literal(n) => stack.push(number(*n)?),
                Op::Input => stack.push(input.clone()),
                Op::Dup => {
                    let top = pop(&mut stack)?;
                    stack.push(top.clone());
                    stack.push(top);
                }
                Op::Swap => {
                    let b = pop(&mut stack)?;
                    let a = pop(&mut stack)?;
                    stack.push(b);
                    stack.push(a);
                }
                Op::Not => {
                    let a = pop(&mut stack)?;
                    stack.push(Value::Bool(!truthy(&a)));
                }
                Op::Neg | Op::Abs | Op::Floor | Op::Ceil | Op::Round => {
                    let a = numeric(&pop(&mut stack)?)?;
                    let result = match op {
                        Op::Neg => -a,
                        Op::Abs => a.abs(),
                        Op::Floor => a.floor(),
                        Op::Ceil => a.ceil(),
                        _ => a.round(),
                    };
                    stack.push(number(result)?);
                }
                _ => {
                    let b = numeric(&pop(&mut stack)?)?;
                    let a = numeric(&pop(&mut stack)?)?;
                    let result = match op {
                        Op::Add => a + b,
                        Op::Sub => a - b,
                        Op::Mul => a * b,
                        Op::Div if b == 0.0 => return Err(TransformError::DivisionByZero),
                        Op::Div => a / b,
                        Op::Rem if b == 0.0 => return Err(TransformError::DivisionByZero),
                        Op::Rem => a % b,
                        Op::Min => a.min(b),
                        _ => a.max(b),
                    };
                    stack.push(number(result)?);
                }
            }
        }

        match stack.len() {
            1 => pop(&mut stack),
            n => Err(TransformError::Unbalanced(n)),
        }
    }
}

impl FromStr for Transform {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Self::identity());
        }

        let mut ops = Vec::with_capacity(tokens.len());
        let mut depth = 0usize;

        for token in tokens {
            let op = Op::parse(token)?;
            let (consumed, produced) = op.arity();
            if depth < consumed {
                return Err(TransformError::StackUnderflow(token.to_string()));
            }
            depth = depth - consumed + produced;
            ops.push(op);
        }

        if depth != 1 {
            return Err(TransformError::Unbalanced(depth));
        }

        Ok(Self {
            source: s.trim().to_string(),
            ops,
        })
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            f.write_str("v")
        } else {
            f.write_str(&self.source)
        }
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, TransformError> {
    stack
        .pop()
        .ok_or_else(|| TransformError::StackUnderflow(String::new()))
}

fn numeric(value: &Value) -> Result<f64, TransformError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or(TransformError::NotNumeric),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        _ => Err(TransformError::NotNumeric),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::Null => false,
        _ => true,
    }
}

/// Whole results become integers so `1 +` over an integer stays an integer
fn number(n: f64) -> Result<Value, TransformError> {
    if !n.is_finite() {
        return Err(TransformError::NotFinite);
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or(TransformError::NotFinite)
}
