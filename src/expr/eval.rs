//! Evaluates the restricted AST against a caller-supplied variable namespace.

use super::ast::{BinOp, CmpOp, Node, Parser};
use super::token::tokenize;
use crate::error::{Result, SchedulerError};
use serde_json::Value;
use std::collections::HashMap;

/// Parse and evaluate `expr` against `variables`. Rejects any construct
/// outside the whitelisted grammar with [`SchedulerError::UnsafeExpression`];
/// type errors encountered during evaluation surface as
/// [`SchedulerError::EvalError`].
pub fn eval(expr: &str, variables: &HashMap<String, Value>) -> Result<Value> {
    let tokens = tokenize(expr)?;
    let ast = Parser::new(&tokens).parse_expr()?;
    eval_node(&ast, variables)
}

fn eval_node(node: &Node, vars: &HashMap<String, Value>) -> Result<Value> {
    match node {
        Node::Int(n) => Ok(Value::from(*n)),
        Node::Float(f) => Ok(Value::from(*f)),
        Node::Str(s) => Ok(Value::from(s.clone())),
        Node::List(items) => {
            let values: Result<Vec<Value>> = items.iter().map(|n| eval_node(n, vars)).collect();
            Ok(Value::Array(values?))
        }
        Node::Tuple(items) => {
            let values: Result<Vec<Value>> = items.iter().map(|n| eval_node(n, vars)).collect();
            Ok(Value::Array(values?))
        }
        Node::Name(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::EvalError(format!("unbound name: {name}"))),
        Node::Attribute(base, field) => {
            let base = eval_node(base, vars)?;
            base.as_object()
                .and_then(|m| m.get(field))
                .cloned()
                .ok_or_else(|| SchedulerError::EvalError(format!("no attribute '{field}'")))
        }
        Node::Subscript(base, index) => {
            let base = eval_node(base, vars)?;
            let index = eval_node(index, vars)?;
            match (&base, &index) {
                (Value::Array(items), Value::Number(n)) => {
                    let i = n
                        .as_i64()
                        .ok_or_else(|| SchedulerError::EvalError("non-integer index".into()))?;
                    let i = if i < 0 { items.len() as i64 + i } else { i };
                    items
                        .get(i as usize)
                        .cloned()
                        .ok_or_else(|| SchedulerError::EvalError("index out of range".into()))
                }
                (Value::Object(map), Value::String(key)) => map
                    .get(key)
                    .cloned()
                    .ok_or_else(|| SchedulerError::EvalError(format!("no key '{key}'"))),
                _ => Err(SchedulerError::EvalError("unsupported subscript".into())),
            }
        }
        Node::Neg(inner) => {
            let v = eval_node(inner, vars)?;
            if let Some(i) = v.as_i64() {
                Ok(Value::from(-i))
            } else if let Some(f) = v.as_f64() {
                Ok(Value::from(-f))
            } else {
                Err(SchedulerError::EvalError("unary '-' requires a number".into()))
            }
        }
        Node::BinOp(lhs, op, rhs) => {
            let l = eval_node(lhs, vars)?;
            let r = eval_node(rhs, vars)?;
            match op {
                BinOp::Add => add(&l, &r),
                BinOp::Sub => numeric_op(&l, &r, |a, b| a - b, |a, b| a - b),
                BinOp::Mul => numeric_op(&l, &r, |a, b| a * b, |a, b| a * b),
                BinOp::Div => numeric_op(&l, &r, checked_div_i64, |a, b| a / b),
                BinOp::Mod => numeric_op(&l, &r, checked_rem_i64, |a, b| a % b),
            }
        }
        Node::Compare(lhs, op, rhs) => {
            let l = eval_node(lhs, vars)?;
            let r = eval_node(rhs, vars)?;
            compare(&l, *op, &r)
        }
    }
}

fn add(l: &Value, r: &Value) -> Result<Value> {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        return Ok(Value::from(format!("{a}{b}")));
    }
    if let (Value::Array(a), Value::Array(b)) = (l, r) {
        let mut v = a.clone();
        v.extend(b.clone());
        return Ok(Value::Array(v));
    }
    numeric_op(l, r, |a, b| a + b, |a, b| a + b)
}

fn checked_div_i64(a: i64, b: i64) -> i64 {
    if b == 0 {
        0
    } else {
        a / b
    }
}

fn checked_rem_i64(a: i64, b: i64) -> i64 {
    if b == 0 {
        0
    } else {
        a % b
    }
}

fn numeric_op(
    l: &Value,
    r: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    match (l.as_i64(), r.as_i64()) {
        (Some(a), Some(b)) => return Ok(Value::from(int_op(a, b))),
        _ => {}
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::from(float_op(a, b))),
        _ => Err(SchedulerError::EvalError(
            "arithmetic requires numeric operands".into(),
        )),
    }
}

fn compare(l: &Value, op: CmpOp, r: &Value) -> Result<Value> {
    if op == CmpOp::In {
        let found = match r {
            Value::Array(items) => items.contains(l),
            Value::String(s) => l.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
            _ => return Err(SchedulerError::EvalError("'in' requires a list or string".into())),
        };
        return Ok(Value::Bool(found));
    }
    let ordering = if let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) {
        a.partial_cmp(&b)
    } else if let (Value::String(a), Value::String(b)) = (l, r) {
        Some(a.cmp(b))
    } else {
        None
    };
    let ordering = ordering.ok_or_else(|| {
        SchedulerError::EvalError("comparison requires two numbers or two strings".into())
    })?;
    let result = match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Eq => ordering.is_eq(),
        CmpOp::Ne => !ordering.is_eq(),
        CmpOp::Ge => ordering.is_ge(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::In => unreachable!(),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_function_calls() {
        let vars = HashMap::new();
        let err = eval("open('x')", &vars).unwrap_err();
        assert!(matches!(err, SchedulerError::UnsafeExpression(_)));
    }

    #[test]
    fn membership_in_tuple() {
        let vars = HashMap::new();
        let result = eval("1 in (1, 2, 3)", &vars).unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn attribute_access() {
        let mut vars = HashMap::new();
        vars.insert(
            "a".to_string(),
            serde_json::json!({ "available": 10 }),
        );
        let result = eval("a.available > 0", &vars).unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn rejects_unbound_names_outside_mapping() {
        let vars = HashMap::new();
        assert!(eval("missing > 1", &vars).is_err());
    }
}
