//! FILENAME: engine/src/value.rs
//! PURPOSE: Cell values, declared cube types and the coercion/arithmetic rules.
//! CONTEXT: Every cube declares one `ValueType`; `Cube::set` coerces incoming
//! values to that type or rejects them. Arithmetic is used by the cube
//! combinators and the aggregation engine.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// The declared cell type of a cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Int,
    Float,
    Boolean,
    Text,
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

/// Binary operators supported by the cube combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
}

/// Unary operators supported by the cube combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Abs,
    Identity,
}

impl Value {
    /// The additive identity for a declared type. Used wherever a missing
    /// cell defaults to zero (combinators, rollup, dynamic aggregation).
    pub fn zero(value_type: ValueType) -> Value {
        match value_type {
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::Boolean => Value::Boolean(false),
            ValueType::Text => Value::Text(String::new()),
        }
    }

    /// Numeric view of the value, if it has one. Text must parse as a
    /// number; booleans count as 1/0.
    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    /// Coerces the value to a declared cube type.
    ///
    /// - `Int`/`Float`: the value must be numeric (numbers, booleans, or
    ///   text that parses as a number); `Int` truncates.
    /// - `Boolean`: anything truthy/falsy is accepted (non-zero numbers,
    ///   non-empty text).
    /// - `Text`: only text is accepted.
    pub fn coerce(self, value_type: ValueType) -> Result<Value, EngineError> {
        let reject = |v: &Value| EngineError::InvalidCellType {
            expected: value_type,
            value: format!("{:?}", v),
        };
        match value_type {
            ValueType::Int => match self.as_number() {
                Some(n) => Ok(Value::Int(n as i64)),
                None => Err(reject(&self)),
            },
            ValueType::Float => match self.as_number() {
                Some(n) => Ok(Value::Float(n)),
                None => Err(reject(&self)),
            },
            ValueType::Boolean => Ok(Value::Boolean(match self {
                Value::Boolean(b) => b,
                Value::Int(i) => i != 0,
                Value::Float(f) => f != 0.0,
                Value::Text(s) => !s.is_empty(),
            })),
            ValueType::Text => match self {
                Value::Text(_) => Ok(self),
                other => Err(reject(&other)),
            },
        }
    }

    /// Strict numeric operand for arithmetic. Booleans and text are not
    /// valid arithmetic operands even when they would coerce.
    fn arith_operand(&self) -> Result<ArithOperand, EngineError> {
        match self {
            Value::Int(i) => Ok(ArithOperand::Int(*i)),
            Value::Float(f) => Ok(ArithOperand::Float(*f)),
            other => Err(EngineError::InvalidCellType {
                expected: ValueType::Float,
                value: format!("{:?}", other),
            }),
        }
    }

    /// Applies a binary operator. Int op Int stays Int (checked, so integer
    /// division by zero surfaces as an arithmetic error); any float operand
    /// promotes to Float with IEEE semantics.
    pub fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EngineError> {
        let l = left.arith_operand()?;
        let r = right.arith_operand()?;
        match (l, r) {
            (ArithOperand::Int(a), ArithOperand::Int(b)) => int_binary(op, a, b),
            (l, r) => Ok(Value::Float(float_binary(op, l.as_f64(), r.as_f64()))),
        }
    }

    /// Applies a unary operator.
    pub fn apply_unary(op: UnaryOp, value: &Value) -> Result<Value, EngineError> {
        match value.arith_operand()? {
            ArithOperand::Int(i) => Ok(match op {
                UnaryOp::Negate => Value::Int(-i),
                UnaryOp::Abs => Value::Int(i.abs()),
                UnaryOp::Identity => Value::Int(i),
            }),
            ArithOperand::Float(f) => Ok(match op {
                UnaryOp::Negate => Value::Float(-f),
                UnaryOp::Abs => Value::Float(f.abs()),
                UnaryOp::Identity => Value::Float(f),
            }),
        }
    }
}

#[derive(Clone, Copy)]
enum ArithOperand {
    Int(i64),
    Float(f64),
}

impl ArithOperand {
    fn as_f64(self) -> f64 {
        match self {
            ArithOperand::Int(i) => i as f64,
            ArithOperand::Float(f) => f,
        }
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> Result<Value, EngineError> {
    let div_by_zero = || EngineError::Arithmetic(format!("integer {:?} by zero", op));
    match op {
        BinaryOp::Add => Ok(Value::Int(a.wrapping_add(b))),
        BinaryOp::Subtract => Ok(Value::Int(a.wrapping_sub(b))),
        BinaryOp::Multiply => Ok(Value::Int(a.wrapping_mul(b))),
        // True division of integers yields a float, like the combinators
        // of the formula layer expect.
        BinaryOp::Divide => {
            if b == 0 {
                Err(div_by_zero())
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        BinaryOp::FloorDivide => a
            .checked_div_euclid(b)
            .map(Value::Int)
            .ok_or_else(div_by_zero),
        BinaryOp::Modulo => a
            .checked_rem_euclid(b)
            .map(Value::Int)
            .ok_or_else(div_by_zero),
        BinaryOp::Power => {
            if b >= 0 {
                Ok(Value::Int(a.pow(b.min(u32::MAX as i64) as u32)))
            } else {
                Ok(Value::Float((a as f64).powi(b as i32)))
            }
        }
    }
}

fn float_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::FloorDivide => (a / b).floor(),
        BinaryOp::Modulo => a.rem_euclid(b),
        BinaryOp::Power => a.powf(b),
    }
}
