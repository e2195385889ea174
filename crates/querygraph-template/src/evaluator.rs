//! Expression evaluation
//!
//! A compiled [`Expression`] is evaluated by popping its postfix program from
//! the end: each operator recursively evaluates its operands as it unwinds.
//! Operands are either a single [`Value`] or a column of cells, and binary
//! operators broadcast between the two shapes.

use crate::expression::{BinaryOp, Expression, Instruction};
use crate::functions::{Args, FunctionRegistry};
use querygraph_core::{Cell, Error, Frame, Result, Value, distinct};
use std::cmp::Ordering;
use std::collections::HashMap;

/// The runtime shape of an expression result
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Scalar(Value),
    Column(Vec<Cell>),
}

impl Datum {
    /// Lists behave like columns
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::List(items) => Datum::Column(items.into_iter().map(Some).collect()),
            scalar => Datum::Scalar(scalar),
        }
    }

    pub fn is_column(&self) -> bool {
        matches!(self, Datum::Column(_))
    }

    /// Non-null values, in order
    pub fn values(&self) -> Vec<Value> {
        match self {
            Datum::Scalar(v) => vec![v.clone()],
            Datum::Column(cells) => cells.iter().flatten().cloned().collect(),
        }
    }

    /// Collapse to one value: a scalar, or a column holding exactly one distinct value
    pub fn into_single(self) -> Result<Value> {
        match self {
            Datum::Scalar(v) => Ok(v),
            Datum::Column(cells) => {
                let mut unique = distinct(cells.into_iter().flatten());
                match unique.len() {
                    1 => Ok(unique.remove(0)),
                    n => Err(Error::Evaluation(format!(
                        "expected a single value, found {} distinct values",
                        n
                    ))),
                }
            }
        }
    }

    /// Expand to `len` cells, repeating a scalar
    pub fn into_cells(self, len: usize) -> Result<Vec<Cell>> {
        match self {
            Datum::Scalar(v) => Ok(vec![Some(v); len]),
            Datum::Column(cells) if cells.len() == len => Ok(cells),
            Datum::Column(cells) => Err(Error::Evaluation(format!(
                "column of {} rows where {} were expected",
                cells.len(),
                len
            ))),
        }
    }

    /// Cell at a row, broadcasting scalars
    pub fn cell(&self, row: usize) -> Option<&Value> {
        match self {
            Datum::Scalar(v) => Some(v),
            Datum::Column(cells) => cells.get(row).and_then(Option::as_ref),
        }
    }

    /// Apply a fallible function to every non-null value
    pub fn map<F>(&self, f: F) -> Result<Datum>
    where
        F: Fn(&Value) -> Result<Value>,
    {
        match self {
            Datum::Scalar(v) => f(v).map(Datum::Scalar),
            Datum::Column(cells) => cells
                .iter()
                .map(|c| c.as_ref().map(&f).transpose())
                .collect::<Result<Vec<_>>>()
                .map(Datum::Column),
        }
    }
}

/// Names visible to an expression: frame columns shadow caller values, and
/// functions resolve through the registry
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    frame: Option<&'a Frame>,
    values: Option<&'a HashMap<String, Value>>,
    functions: &'a FunctionRegistry,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self {
            frame: None,
            values: None,
            functions: FunctionRegistry::builtins(),
        }
    }

    pub fn with_frame(mut self, frame: Option<&'a Frame>) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_values(mut self, values: Option<&'a HashMap<String, Value>>) -> Self {
        self.values = values;
        self
    }

    pub fn with_functions(mut self, functions: &'a FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    pub fn lookup(&self, name: &str) -> Result<Datum> {
        if let Some(cells) = self.frame.and_then(|f| f.column(name)) {
            return Ok(Datum::Column(cells.to_vec()));
        }
        if let Some(value) = self.values.and_then(|v| v.get(name)) {
            return Ok(Datum::from_value(value.clone()));
        }
        Err(Error::Evaluation(format!("unknown identifier '{}'", name)))
    }

    fn call(&self, name: &str, args: Args) -> Result<Datum> {
        let func = self
            .functions
            .get(name)
            .ok_or_else(|| Error::Evaluation(format!("unknown function '{}'", name)))?;
        func(name, &args)
    }
}

impl Default for Scope<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Expression {
    /// Evaluate against a scope
    pub fn evaluate(&self, scope: &Scope<'_>) -> Result<Datum> {
        let program = self.instructions();
        let mut end = program.len();
        let datum = eval_at(program, &mut end, scope)?;
        if end != 0 {
            return Err(Error::Evaluation(format!(
                "malformed expression '{}'",
                self.source()
            )));
        }
        Ok(datum)
    }
}

fn eval_at(program: &[Instruction], end: &mut usize, scope: &Scope<'_>) -> Result<Datum> {
    if *end == 0 {
        return Err(Error::Evaluation("operand stack underflow".to_string()));
    }
    *end -= 1;
    match &program[*end] {
        Instruction::Push(value) => Ok(Datum::from_value(value.clone())),
        Instruction::Load(name) => scope.lookup(name),
        Instruction::Binary(op) => {
            let right = eval_at(program, end, scope)?;
            let left = eval_at(program, end, scope)?;
            apply_binary(*op, left, right)
        }
        Instruction::Negate => eval_at(program, end, scope)?.map(negate),
        Instruction::Call { name, args } => {
            let mut operands = Vec::with_capacity(args.len());
            for _ in args {
                operands.push(eval_at(program, end, scope)?);
            }
            operands.reverse();
            scope.call(name, Args::new(args, operands))
        }
    }
}

/// Apply a binary operator, broadcasting scalars against columns
pub fn apply_binary(op: BinaryOp, left: Datum, right: Datum) -> Result<Datum> {
    let zip = |a: &Cell, b: &Cell| -> Result<Cell> {
        match (a, b) {
            (Some(a), Some(b)) => binary_value(op, a, b).map(Some),
            _ => Ok(None),
        }
    };
    match (left, right) {
        (Datum::Scalar(a), Datum::Scalar(b)) => binary_value(op, &a, &b).map(Datum::Scalar),
        (Datum::Column(a), Datum::Scalar(b)) => {
            let b = Some(b);
            a.iter().map(|x| zip(x, &b)).collect::<Result<_>>().map(Datum::Column)
        }
        (Datum::Scalar(a), Datum::Column(b)) => {
            let a = Some(a);
            b.iter().map(|y| zip(&a, y)).collect::<Result<_>>().map(Datum::Column)
        }
        (Datum::Column(a), Datum::Column(b)) => {
            if a.len() != b.len() {
                return Err(Error::Evaluation(format!(
                    "cannot apply '{}' to columns of {} and {} rows",
                    op,
                    a.len(),
                    b.len()
                )));
            }
            a.iter()
                .zip(&b)
                .map(|(x, y)| zip(x, y))
                .collect::<Result<_>>()
                .map(Datum::Column)
        }
    }
}

fn type_error(op: BinaryOp, a: &Value, b: &Value) -> Error {
    Error::Evaluation(format!(
        "unsupported operand types for '{}': {} and {}",
        op,
        a.type_name(),
        b.type_name()
    ))
}

fn overflow(op: BinaryOp) -> Error {
    Error::Evaluation(format!("integer overflow in '{}'", op))
}

/// Apply a binary operator to two values
pub fn binary_value(op: BinaryOp, a: &Value, b: &Value) -> Result<Value> {
    use BinaryOp::*;
    match op {
        Add => match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.checked_add(*y).map(Value::Int).ok_or(overflow(op)),
            (Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{}{}", x, y))),
            _ => float_op(op, a, b, |x, y| x + y),
        },
        Subtract => match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.checked_sub(*y).map(Value::Int).ok_or(overflow(op)),
            _ => float_op(op, a, b, |x, y| x - y),
        },
        Multiply => match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.checked_mul(*y).map(Value::Int).ok_or(overflow(op)),
            _ => float_op(op, a, b, |x, y| x * y),
        },
        Divide => {
            let (x, y) = floats(op, a, b)?;
            if y == 0.0 {
                return Err(Error::Evaluation("division by zero".to_string()));
            }
            Ok(Value::Float(x / y))
        }
        Power => match (a, b) {
            (Value::Int(x), Value::Int(y)) if *y >= 0 => u32::try_from(*y)
                .ok()
                .and_then(|y| x.checked_pow(y))
                .map(Value::Int)
                .ok_or(overflow(op)),
            _ => float_op(op, a, b, f64::powf),
        },
        Equals | NotEquals => {
            let equal = match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) if a.is_numeric() && b.is_numeric() => x == y,
                _ => a == b,
            };
            Ok(Value::Bool(equal == (op == Equals)))
        }
        Less | LessEquals | Greater | GreaterEquals => {
            let ordering = compare(a, b).ok_or_else(|| type_error(op, a, b))?;
            let result = match op {
                Less => ordering == Ordering::Less,
                LessEquals => ordering != Ordering::Greater,
                Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        And | Or => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => {
                Ok(Value::Bool(if op == And { *x && *y } else { *x || *y }))
            }
            _ => Err(type_error(op, a, b)),
        },
    }
}

/// Order two values of compatible kinds; numbers compare across int and float
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_numeric() && b.is_numeric() {
        return a.as_float()?.partial_cmp(&b.as_float()?);
    }
    if a.kind() == b.kind() {
        return Some(a.cmp(b));
    }
    None
}

fn floats(op: BinaryOp, a: &Value, b: &Value) -> Result<(f64, f64)> {
    match (a, b) {
        (x, y) if x.is_numeric() && y.is_numeric() => match (x.as_float(), y.as_float()) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(type_error(op, a, b)),
        },
        _ => Err(type_error(op, a, b)),
    }
}

fn float_op(op: BinaryOp, a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
    let (x, y) = floats(op, a, b)?;
    Ok(Value::Float(f(x, y)))
}

fn negate(value: &Value) -> Result<Value> {
    match value {
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| Error::Evaluation("integer overflow in negation".to_string())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(Error::Evaluation(format!(
            "cannot negate {} value",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Result<Datum> {
        Expression::parse(source)?.evaluate(&Scope::new())
    }

    fn scalar(source: &str) -> Value {
        match eval(source).unwrap() {
            Datum::Scalar(v) => v,
            other => panic!("expected scalar, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(scalar("1 + 2 * 3"), Value::Int(7));
        assert_eq!(scalar("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(scalar("7 / 2"), Value::Float(3.5));
        assert_eq!(scalar("2 ^ 3 ^ 2"), Value::Int(512));
        assert_eq!(scalar("-2 ^ 2"), Value::Int(-4));
        assert_eq!(scalar("1.5 + 1"), Value::Float(2.5));
        assert_eq!(scalar("2 ^ -1"), Value::Float(0.5));
    }

    #[test]
    fn test_strings_and_logic() {
        assert_eq!(scalar("'ab' + \"cd\""), Value::from("abcd"));
        assert_eq!(scalar("1 < 2 & 3 >= 3"), Value::Bool(true));
        assert_eq!(scalar("false | 1 == 1.0"), Value::Bool(true));
        assert_eq!(scalar("'a' != 'b'"), Value::Bool(true));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(eval("1 / 0"), Err(Error::Evaluation(_))));
        assert!(matches!(eval("'a' - 1"), Err(Error::Evaluation(_))));
        assert!(matches!(eval("1 < 'a'"), Err(Error::Evaluation(_))));
        assert!(matches!(eval("missing + 1"), Err(Error::Evaluation(_))));
        assert!(matches!(eval("nope.fn(1)"), Err(Error::Evaluation(_))));
        assert!(matches!(eval("9223372036854775807 + 1"), Err(Error::Evaluation(_))));
    }

    #[test]
    fn test_column_broadcast() {
        let frame = Frame::builder()
            .column("a", [1i64, 2, 3])
            .nullable_column("b", [Some(Value::Int(10)), None, Some(Value::Int(30))])
            .build()
            .unwrap();
        let scope = Scope::new().with_frame(Some(&frame));

        let result = Expression::parse("a * 2").unwrap().evaluate(&scope).unwrap();
        assert_eq!(
            result,
            Datum::Column(vec![Some(Value::Int(2)), Some(Value::Int(4)), Some(Value::Int(6))])
        );

        let result = Expression::parse("a + b").unwrap().evaluate(&scope).unwrap();
        assert_eq!(
            result,
            Datum::Column(vec![Some(Value::Int(11)), None, Some(Value::Int(33))])
        );
    }

    #[test]
    fn test_columns_shadow_values() {
        let frame = Frame::builder().column("x", [5i64]).build().unwrap();
        let mut values = HashMap::new();
        values.insert("x".to_string(), Value::Int(100));
        values.insert("y".to_string(), Value::from(vec![1i64, 2]));
        let scope = Scope::new().with_frame(Some(&frame)).with_values(Some(&values));

        let x = Expression::parse("x").unwrap().evaluate(&scope).unwrap();
        assert_eq!(x.into_single().unwrap(), Value::Int(5));

        let y = Expression::parse("y + 1").unwrap().evaluate(&scope).unwrap();
        assert_eq!(y.values(), vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_into_single() {
        let datum = Datum::Column(vec![Some(Value::Int(1)), None, Some(Value::Int(1))]);
        assert_eq!(datum.into_single().unwrap(), Value::Int(1));
        let datum = Datum::Column(vec![Some(Value::Int(1)), Some(Value::Int(2))]);
        assert!(datum.into_single().is_err());
    }
}
