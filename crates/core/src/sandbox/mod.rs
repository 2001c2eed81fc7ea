//! Restricted comparison-expression evaluator.
//!
//! Expressions are lexed and parsed against a closed grammar (numbers,
//! bound identifiers, `+ - * /`, unary minus, parentheses and a single
//! non-associative comparison). Anything outside it is a
//! [`SandboxError::Violation`]. Only a validated tree is interpreted; the
//! source text itself is never executed.

mod lexer;
mod parser;

use std::collections::BTreeMap;

use crate::errors::{EvaluationError, SandboxError, ViolationKind};

pub use parser::{BinaryOp, Expr, MAX_DEPTH};

pub const MAX_EXPRESSION_BYTES: usize = 512;

pub type Bindings = BTreeMap<String, f64>;

/// A parsed expression whose identifiers are all bound.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedExpression {
    root: Expr,
}

impl ValidatedExpression {
    pub fn root(&self) -> &Expr {
        &self.root
    }

    pub fn evaluate(&self, bindings: &Bindings) -> Result<f64, SandboxError> {
        interpret(&self.root, bindings)
    }
}

/// Lexes, parses, and checks every identifier against `bindings`.
pub fn validate(source: &str, bindings: &Bindings) -> Result<ValidatedExpression, SandboxError> {
    if source.len() > MAX_EXPRESSION_BYTES {
        return Err(SandboxError::violation(
            ViolationKind::TooLong { limit: MAX_EXPRESSION_BYTES },
            MAX_EXPRESSION_BYTES,
        ));
    }

    let tokens = lexer::tokenize(source)?;
    let root = parser::parse(&tokens, source.len())?;
    check_bound(&root, bindings)?;
    Ok(ValidatedExpression { root })
}

pub fn evaluate_expression(source: &str, bindings: &Bindings) -> Result<f64, SandboxError> {
    validate(source, bindings)?.evaluate(bindings)
}

/// Evaluates and reads the result as a truth value (non-zero is true).
pub fn evaluate_condition(source: &str, bindings: &Bindings) -> Result<bool, SandboxError> {
    evaluate_expression(source, bindings).map(|value| value != 0.0)
}

fn check_bound(expr: &Expr, bindings: &Bindings) -> Result<(), SandboxError> {
    match expr {
        Expr::Number(_) => Ok(()),
        Expr::Variable { name, offset } => {
            if bindings.contains_key(name) {
                Ok(())
            } else {
                Err(SandboxError::violation(ViolationKind::UnboundVariable(name.clone()), *offset))
            }
        }
        Expr::Neg(operand) => check_bound(operand, bindings),
        Expr::Binary { lhs, rhs, .. } => {
            check_bound(lhs, bindings)?;
            check_bound(rhs, bindings)
        }
    }
}

fn interpret(expr: &Expr, bindings: &Bindings) -> Result<f64, SandboxError> {
    let value = match expr {
        Expr::Number(value) => *value,
        Expr::Variable { name, offset } => *bindings.get(name).ok_or_else(|| {
            SandboxError::violation(ViolationKind::UnboundVariable(name.clone()), *offset)
        })?,
        Expr::Neg(operand) => -interpret(operand, bindings)?,
        Expr::Binary { op, lhs, rhs } => {
            let lhs = interpret(lhs, bindings)?;
            let rhs = interpret(rhs, bindings)?;
            apply(*op, lhs, rhs)?
        }
    };
    checked(value)
}

fn apply(op: BinaryOp, lhs: f64, rhs: f64) -> Result<f64, EvaluationError> {
    let truth = |holds: bool| if holds { 1.0 } else { 0.0 };
    let value = match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div => {
            if rhs == 0.0 {
                return Err(EvaluationError::DivisionByZero);
            }
            lhs / rhs
        }
        BinaryOp::Lt => truth(lhs < rhs),
        BinaryOp::Le => truth(lhs <= rhs),
        BinaryOp::Gt => truth(lhs > rhs),
        BinaryOp::Ge => truth(lhs >= rhs),
        BinaryOp::Eq => truth(lhs == rhs),
        BinaryOp::Ne => truth(lhs != rhs),
    };
    Ok(value)
}

fn checked(value: f64) -> Result<f64, SandboxError> {
    if value.is_nan() {
        Err(EvaluationError::NonFinite.into())
    } else if value.is_infinite() {
        Err(EvaluationError::Overflow.into())
    } else {
        Ok(value)
    }
}
