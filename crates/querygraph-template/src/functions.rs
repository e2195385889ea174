//! Builtin expression functions
//!
//! Functions are grouped into the `str`, `math`, `datetime` and `as_type`
//! namespaces and called as `namespace.name(...)`. Every function accepts a
//! scalar or a column as its first argument and applies elementwise to
//! columns, except the `math` reductions which collapse a column.

use crate::convert::{float_to_int, parse_date, parse_datetime};
use crate::evaluator::{Datum, compare};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use querygraph_core::{Cell, DATE_FORMAT, DATETIME_FORMAT, Error, Result, TIME_FORMAT, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::LazyLock;

/// Signature shared by every builtin; the first argument is the called name
pub type Builtin = fn(&str, &Args) -> Result<Datum>;

/// Evaluated call arguments
#[derive(Debug, Clone, Default)]
pub struct Args {
    positional: Vec<Datum>,
    keywords: Vec<(String, Datum)>,
}

impl Args {
    /// Pair evaluated operands with their keyword names (`None` for positional)
    pub fn new(names: &[Option<String>], values: Vec<Datum>) -> Self {
        let mut args = Args::default();
        for (name, value) in names.iter().zip(values) {
            match name {
                Some(name) => args.keywords.push((name.clone(), value)),
                None => args.positional.push(value),
            }
        }
        args
    }

    pub fn positional(&self) -> &[Datum] {
        &self.positional
    }

    pub fn keyword(&self, name: &str) -> Option<&Datum> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Argument by position, falling back to its keyword
    pub fn get(&self, index: usize, name: &str) -> Option<&Datum> {
        self.positional.get(index).or_else(|| self.keyword(name))
    }

    fn check(&self, func: &str, positional: std::ops::RangeInclusive<usize>, keywords: &[&str]) -> Result<()> {
        if !positional.contains(&self.positional.len()) {
            return Err(Error::Evaluation(format!(
                "{} takes {} to {} positional arguments, got {}",
                func,
                positional.start(),
                positional.end(),
                self.positional.len()
            )));
        }
        if let Some((name, _)) = self.keywords.iter().find(|(k, _)| !keywords.contains(&k.as_str())) {
            return Err(Error::Evaluation(format!(
                "{} got an unexpected keyword argument '{}'",
                func, name
            )));
        }
        Ok(())
    }

    fn target(&self, func: &str) -> Result<&Datum> {
        self.positional
            .first()
            .ok_or_else(|| Error::Evaluation(format!("{} needs an argument", func)))
    }

    /// Optional scalar option such as a format string
    fn option(&self, func: &str, index: usize, name: &str) -> Result<Option<&Value>> {
        match self.get(index, name) {
            None => Ok(None),
            Some(Datum::Scalar(v)) => Ok(Some(v)),
            Some(Datum::Column(_)) => Err(Error::Evaluation(format!(
                "{} option '{}' must be a single value",
                func, name
            ))),
        }
    }

    fn required(&self, func: &str, index: usize, name: &str) -> Result<&Value> {
        self.option(func, index, name)?.ok_or_else(|| {
            Error::Evaluation(format!("{} is missing argument '{}'", func, name))
        })
    }

    fn str_option(&self, func: &str, index: usize, name: &str) -> Result<Option<&str>> {
        match self.option(func, index, name)? {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(other) => Err(Error::Evaluation(format!(
                "{} option '{}' must be a string, got {}",
                func,
                name,
                other.type_name()
            ))),
        }
    }

    fn int_option(&self, func: &str, index: usize, name: &str) -> Result<Option<i64>> {
        match self.option(func, index, name)? {
            None => Ok(None),
            Some(Value::Int(i)) => Ok(Some(*i)),
            Some(other) => Err(Error::Evaluation(format!(
                "{} option '{}' must be an int, got {}",
                func,
                name,
                other.type_name()
            ))),
        }
    }
}

/// Named functions callable from expressions
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Builtin>,
}

static BUILTINS: LazyLock<FunctionRegistry> = LazyLock::new(FunctionRegistry::with_builtins);

impl FunctionRegistry {
    /// Shared registry holding the builtin namespaces
    pub fn builtins() -> &'static FunctionRegistry {
        &BUILTINS
    }

    /// A fresh registry holding the builtin namespaces, open for additions
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();

        registry.register("str.uppercase", str_uppercase);
        registry.register("str.lowercase", str_lowercase);
        registry.register("str.capitalize", str_capitalize);
        registry.register("str.replace", str_replace);
        registry.register("str.slice", str_slice);
        registry.register("str.combine", str_combine);
        registry.register("str.to_date", str_to_date);
        registry.register("str.to_datetime", str_to_datetime);
        registry.register("str.length", str_length);

        registry.register("math.round", math_round);
        registry.register("math.floor", math_floor);
        registry.register("math.ceil", math_ceil);
        registry.register("math.abs", math_abs);
        registry.register("math.max", math_max);
        registry.register("math.min", math_min);
        registry.register("math.sum", math_sum);
        registry.register("math.cumsum", math_cumsum);

        registry.register("datetime.to_str", datetime_to_str);
        registry.register("datetime.add_delta", datetime_add_delta);
        registry.register("datetime.date", datetime_date);
        registry.register("datetime.time", datetime_time);

        registry.register("as_type.int", as_int);
        registry.register("as_type.float", as_float);
        registry.register("as_type.str", as_str);
        registry.register("as_type.date", as_date);

        registry
    }

    pub fn register(&mut self, name: impl Into<String>, func: Builtin) {
        self.functions.insert(name.into(), func);
    }

    pub fn get(&self, name: &str) -> Option<Builtin> {
        self.functions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn unsupported(func: &str, value: &Value) -> Error {
    Error::Evaluation(format!("{} does not accept {} values", func, value.type_name()))
}

fn format_with<T: std::fmt::Display>(func: &str, item: T) -> Result<String> {
    let mut out = String::new();
    write!(out, "{}", item)
        .map_err(|_| Error::Evaluation(format!("{} got an invalid format string", func)))?;
    Ok(out)
}

// ========== str ==========

fn map_str(func: &str, args: &Args, f: fn(&str) -> String) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::Str(s) => Ok(Value::Str(f(s))),
        other => Ok(other.clone()),
    })
}

fn str_uppercase(func: &str, args: &Args) -> Result<Datum> {
    map_str(func, args, str::to_uppercase)
}

fn str_lowercase(func: &str, args: &Args) -> Result<Datum> {
    map_str(func, args, str::to_lowercase)
}

fn str_capitalize(func: &str, args: &Args) -> Result<Datum> {
    map_str(func, args, |s| {
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
            None => String::new(),
        }
    })
}

/// Plain text of numbers and strings
fn text_of(func: &str, value: &Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(_) | Value::Float(_) => Ok(value.to_string()),
        other => Err(unsupported(func, other)),
    }
}

fn str_replace(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=3, &["target_val", "with_val"])?;
    let target = text_of(func, args.required(func, 1, "target_val")?)?;
    let with = text_of(func, args.required(func, 2, "with_val")?)?;
    args.target(func)?
        .map(|v| Ok(Value::Str(text_of(func, v)?.replace(&target, &with))))
}

fn slice_bound(index: Option<i64>, len: usize, default: usize) -> usize {
    match index {
        None => default,
        Some(i) if i < 0 => len.saturating_sub(i.unsigned_abs() as usize),
        Some(i) => (i as usize).min(len),
    }
}

fn str_slice(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=3, &["s", "e"])?;
    let start = args.int_option(func, 1, "s")?;
    let end = args.int_option(func, 2, "e")?;
    args.target(func)?.map(|v| {
        let chars: Vec<char> = text_of(func, v)?.chars().collect();
        let s = slice_bound(start, chars.len(), 0);
        let e = slice_bound(end, chars.len(), chars.len());
        let sliced = if s < e { chars[s..e].iter().collect() } else { String::new() };
        Ok(Value::Str(sliced))
    })
}

/// Row count shared by every column argument
fn broadcast_len(func: &str, datums: &[Datum]) -> Result<Option<usize>> {
    let mut len = None;
    for datum in datums {
        if let Datum::Column(cells) = datum {
            match len {
                None => len = Some(cells.len()),
                Some(n) if n != cells.len() => {
                    return Err(Error::Evaluation(format!(
                        "{} got columns of {} and {} rows",
                        func,
                        n,
                        cells.len()
                    )));
                }
                Some(_) => {}
            }
        }
    }
    Ok(len)
}

/// Apply `f` row by row across all positional arguments
fn zip_rows(func: &str, args: &Args, f: impl Fn(&[&Value]) -> Result<Value>) -> Result<Datum> {
    let datums = args.positional();
    let row = |i: usize| -> Result<Cell> {
        let cells: Option<Vec<&Value>> = datums.iter().map(|d| d.cell(i)).collect();
        cells.map(|values| f(&values)).transpose()
    };
    match broadcast_len(func, datums)? {
        None => row(0)?
            .map(Datum::Scalar)
            .ok_or_else(|| Error::Evaluation(format!("{} got no values", func))),
        Some(len) => (0..len).map(row).collect::<Result<Vec<_>>>().map(Datum::Column),
    }
}

fn str_combine(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 2..=usize::MAX, &[])?;
    zip_rows(func, args, |values| {
        let mut out = String::new();
        for value in values {
            out.push_str(&text_of(func, value)?);
        }
        Ok(Value::Str(out))
    })
}

fn parse_error(func: &str, text: &str, format: &str) -> Error {
    Error::Evaluation(format!("{} cannot parse '{}' with format '{}'", func, text, format))
}

fn str_to_date(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=2, &["format"])?;
    let format = args.str_option(func, 1, "format")?.unwrap_or(DATE_FORMAT);
    args.target(func)?.map(|v| match v {
        Value::Date(d) => Ok(Value::Date(*d)),
        Value::DateTime(dt) => Ok(Value::Date(dt.date())),
        other => {
            let text = text_of(func, other)?;
            NaiveDate::parse_from_str(text.trim(), format)
                .map(Value::Date)
                .map_err(|_| parse_error(func, &text, format))
        }
    })
}

fn str_to_datetime(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=2, &["format"])?;
    let format = args.str_option(func, 1, "format")?;
    args.target(func)?.map(|v| match v {
        Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
        Value::Date(d) => Ok(Value::DateTime(d.and_time(NaiveTime::MIN))),
        other => {
            let text = text_of(func, other)?;
            let parsed = match format {
                Some(format) => NaiveDateTime::parse_from_str(text.trim(), format)
                    .ok()
                    .or_else(|| {
                        NaiveDate::parse_from_str(text.trim(), format)
                            .ok()
                            .map(|d| d.and_time(NaiveTime::MIN))
                    }),
                None => parse_datetime(&text)
                    .or_else(|| parse_date(&text).map(|d| d.and_time(NaiveTime::MIN))),
            };
            parsed
                .map(Value::DateTime)
                .ok_or_else(|| parse_error(func, &text, format.unwrap_or(DATETIME_FORMAT)))
        }
    })
}

fn str_length(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(unsupported(func, other)),
    })
}

// ========== math ==========

fn math_round(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=2, &["digits"])?;
    let digits = args.int_option(func, 1, "digits")?.unwrap_or(0);
    let scale = 10f64.powi(digits.clamp(-15, 15) as i32);
    args.target(func)?.map(|v| match v {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => Ok(Value::Float((f * scale).round() / scale)),
        other => Err(unsupported(func, other)),
    })
}

fn to_int(func: &str, f: f64) -> Result<Value> {
    float_to_int(f)
        .map(Value::Int)
        .ok_or_else(|| Error::Evaluation(format!("{} result {} is out of int range", func, f)))
}

fn math_floor(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => to_int(func, f.floor()),
        other => Err(unsupported(func, other)),
    })
}

fn math_ceil(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => to_int(func, f.ceil()),
        other => Err(unsupported(func, other)),
    })
}

fn math_abs(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| Error::Evaluation(format!("{} overflow", func))),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(unsupported(func, other)),
    })
}

fn pick(func: &str, values: &[&Value], want: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for &value in values {
        best = match best {
            None => Some(value),
            Some(current) => {
                let ordering = compare(value, current).ok_or_else(|| {
                    Error::Evaluation(format!(
                        "{} cannot compare {} with {}",
                        func,
                        value.type_name(),
                        current.type_name()
                    ))
                })?;
                if ordering == want { Some(value) } else { Some(current) }
            }
        };
    }
    best.cloned()
        .ok_or_else(|| Error::Evaluation(format!("{} of an empty column", func)))
}

/// One argument reduces a column; several compare row by row
fn extremum(func: &str, args: &Args, want: Ordering) -> Result<Datum> {
    args.check(func, 1..=usize::MAX, &[])?;
    match args.positional() {
        [Datum::Column(cells)] => {
            let values: Vec<&Value> = cells.iter().flatten().collect();
            pick(func, &values, want).map(Datum::Scalar)
        }
        _ => zip_rows(func, args, |values| pick(func, values, want)),
    }
}

fn math_max(func: &str, args: &Args) -> Result<Datum> {
    extremum(func, args, Ordering::Greater)
}

fn math_min(func: &str, args: &Args) -> Result<Datum> {
    extremum(func, args, Ordering::Less)
}

fn add_numbers(func: &str, a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x
            .checked_add(*y)
            .map(Value::Int)
            .ok_or_else(|| Error::Evaluation(format!("{} overflow", func))),
        (x, y) => match (x.as_float(), y.as_float()) {
            (Some(x), Some(y)) => Ok(Value::Float(x + y)),
            _ => Err(unsupported(func, if a.is_numeric() { b } else { a })),
        },
    }
}

fn math_sum(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    match args.target(func)? {
        Datum::Scalar(v) if v.is_numeric() => Ok(Datum::Scalar(v.clone())),
        Datum::Scalar(v) => Err(unsupported(func, v)),
        Datum::Column(cells) => {
            let mut total = Value::Int(0);
            for value in cells.iter().flatten() {
                total = add_numbers(func, &total, value)?;
            }
            Ok(Datum::Scalar(total))
        }
    }
}

fn math_cumsum(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    match args.target(func)? {
        Datum::Scalar(v) if v.is_numeric() => Ok(Datum::Scalar(v.clone())),
        Datum::Scalar(v) => Err(unsupported(func, v)),
        Datum::Column(cells) => {
            let mut running: Option<Value> = None;
            let mut out = Vec::with_capacity(cells.len());
            for cell in cells {
                match cell {
                    Some(value) => {
                        let next = match &running {
                            Some(total) => add_numbers(func, total, value)?,
                            None if value.is_numeric() => value.clone(),
                            None => return Err(unsupported(func, value)),
                        };
                        out.push(Some(next.clone()));
                        running = Some(next);
                    }
                    None => out.push(None),
                }
            }
            Ok(Datum::Column(out))
        }
    }
}

// ========== datetime ==========

fn datetime_to_str(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=2, &["format"])?;
    let format = args.str_option(func, 1, "format")?;
    args.target(func)?.map(|v| {
        let text = match v {
            Value::DateTime(dt) => format_with(func, dt.format(format.unwrap_or(DATETIME_FORMAT)))?,
            Value::Date(d) => format_with(func, d.format(format.unwrap_or(DATE_FORMAT)))?,
            Value::Time(t) => format_with(func, t.format(format.unwrap_or(TIME_FORMAT)))?,
            other => return Err(unsupported(func, other)),
        };
        Ok(Value::Str(text))
    })
}

fn datetime_add_delta(func: &str, args: &Args) -> Result<Datum> {
    const UNITS: [(&str, f64); 5] = [
        ("weeks", 604_800.0),
        ("days", 86_400.0),
        ("hours", 3_600.0),
        ("minutes", 60.0),
        ("seconds", 1.0),
    ];
    args.check(func, 1..=1, &UNITS.map(|(name, _)| name))?;
    let mut seconds = 0.0;
    for (name, scale) in UNITS {
        if let Some(value) = args.option(func, usize::MAX, name)? {
            let amount = value.as_float().ok_or_else(|| {
                Error::Evaluation(format!("{} option '{}' must be a number", func, name))
            })?;
            seconds += amount * scale;
        }
    }
    let delta = float_to_int((seconds * 1000.0).round())
        .and_then(TimeDelta::try_milliseconds)
        .ok_or_else(|| Error::Evaluation(format!("{} delta out of range", func)))?;
    let overflow = || Error::Evaluation(format!("{} result out of range", func));
    args.target(func)?.map(|v| match v {
        Value::DateTime(dt) => dt.checked_add_signed(delta).map(Value::DateTime).ok_or_else(overflow),
        Value::Date(d) => d.checked_add_signed(delta).map(Value::Date).ok_or_else(overflow),
        other => Err(unsupported(func, other)),
    })
}

fn datetime_date(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::DateTime(dt) => Ok(Value::Date(dt.date())),
        Value::Date(d) => Ok(Value::Date(*d)),
        other => Err(unsupported(func, other)),
    })
}

fn datetime_time(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::DateTime(dt) => Ok(Value::Time(dt.time())),
        Value::Time(t) => Ok(Value::Time(*t)),
        other => Err(unsupported(func, other)),
    })
}

// ========== as_type ==========

fn as_int(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => to_int(func, f.trunc()),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| Error::Evaluation(format!("{} cannot parse '{}'", func, s))),
        other => Err(unsupported(func, other)),
    })
}

fn as_float(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::Int(_) | Value::Float(_) => v
            .as_float()
            .map(Value::Float)
            .ok_or_else(|| unsupported(func, v)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| Error::Evaluation(format!("{} cannot parse '{}'", func, s))),
        other => Err(unsupported(func, other)),
    })
}

fn as_str(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| Ok(Value::Str(v.to_string())))
}

fn as_date(func: &str, args: &Args) -> Result<Datum> {
    args.check(func, 1..=1, &[])?;
    args.target(func)?.map(|v| match v {
        Value::Date(d) => Ok(Value::Date(*d)),
        Value::DateTime(dt) => Ok(Value::Date(dt.date())),
        Value::Str(s) => parse_date(s)
            .or_else(|| parse_datetime(s).map(|dt| dt.date()))
            .map(Value::Date)
            .ok_or_else(|| Error::Evaluation(format!("{} cannot parse '{}'", func, s))),
        other => Err(unsupported(func, other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::Scope;
    use crate::expression::Expression;
    use querygraph_core::Frame;

    fn eval_with(source: &str, frame: Option<&Frame>) -> Result<Datum> {
        Expression::parse(source)?.evaluate(&Scope::new().with_frame(frame))
    }

    fn scalar(source: &str) -> Value {
        match eval_with(source, None).unwrap() {
            Datum::Scalar(v) => v,
            other => panic!("expected scalar, got {:?}", other),
        }
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(scalar("str.uppercase('abc')"), Value::from("ABC"));
        assert_eq!(scalar("str.capitalize('hELLO')"), Value::from("Hello"));
        assert_eq!(scalar("str.uppercase(5)"), Value::Int(5));
        assert_eq!(
            scalar("str.replace('a-b-c', target_val='-', with_val='+')"),
            Value::from("a+b+c")
        );
        assert_eq!(scalar("str.slice('abcdef', s=1, e=-1)"), Value::from("bcde"));
        assert_eq!(scalar("str.slice(12345, e=2)"), Value::from("12"));
        assert_eq!(scalar("str.combine('a', 1, 'b')"), Value::from("a1b"));
        assert_eq!(scalar("str.length('héllo')"), Value::Int(5));
    }

    #[test]
    fn test_date_parsing_functions() {
        assert_eq!(
            scalar("str.to_date('06/01/2009', format='%d/%m/%Y')"),
            Value::Date(NaiveDate::from_ymd_opt(2009, 1, 6).unwrap())
        );
        let dt = scalar("str.to_datetime('2009-01-06')");
        assert!(eval_with("str.to_date('nope')", None).is_err());
        assert_eq!(dt.to_string(), "2009-01-06 00:00:00");
    }

    #[test]
    fn test_datetime_functions() {
        assert_eq!(
            scalar("datetime.to_str(datetime.add_delta(str.to_datetime('2009-01-06 10:00:00'), days=1, hours=2), format='%Y/%m/%d %H')"),
            Value::from("2009/01/07 12")
        );
        assert_eq!(
            scalar("datetime.add_delta(str.to_date('2009-01-06'), weeks=1)").to_string(),
            "2009-01-13"
        );
        assert!(eval_with("datetime.add_delta('x', days=1)", None).is_err());
        assert!(eval_with("datetime.add_delta(str.to_date('2009-01-06'), years=1)", None).is_err());
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(scalar("math.round(2.456, digits=2)"), Value::Float(2.46));
        assert_eq!(scalar("math.floor(2.7)"), Value::Int(2));
        assert_eq!(scalar("math.ceil(2.1)"), Value::Int(3));
        assert_eq!(scalar("math.abs(-4)"), Value::Int(4));
        assert_eq!(scalar("math.max(1, 7.5, 3)"), Value::Float(7.5));
        assert_eq!(scalar("math.min(4, 2)"), Value::Int(2));
    }

    #[test]
    fn test_reductions_over_columns() {
        let frame = Frame::builder()
            .nullable_column("x", [Some(Value::Int(3)), None, Some(Value::Int(4))])
            .build()
            .unwrap();
        assert_eq!(
            eval_with("math.sum(x)", Some(&frame)).unwrap(),
            Datum::Scalar(Value::Int(7))
        );
        assert_eq!(
            eval_with("math.max(x)", Some(&frame)).unwrap(),
            Datum::Scalar(Value::Int(4))
        );
        assert_eq!(
            eval_with("math.cumsum(x)", Some(&frame)).unwrap(),
            Datum::Column(vec![Some(Value::Int(3)), None, Some(Value::Int(7))])
        );
        assert_eq!(
            eval_with("math.max(x, 3.5)", Some(&frame)).unwrap(),
            Datum::Column(vec![Some(Value::Float(3.5)), None, Some(Value::Int(4))])
        );
    }

    #[test]
    fn test_as_type_is_strict() {
        assert_eq!(scalar("as_type.int('42')"), Value::Int(42));
        assert_eq!(scalar("as_type.int(3.9)"), Value::Int(3));
        assert_eq!(scalar("as_type.float(2)"), Value::Float(2.0));
        assert_eq!(scalar("as_type.str(2.5)"), Value::from("2.5"));
        assert!(eval_with("as_type.int('forty')", None).is_err());
        assert!(eval_with("as_type.date('2009-13-45')", None).is_err());
    }

    #[test]
    fn test_elementwise_on_columns() {
        let frame = Frame::builder()
            .column("name", ["ann", "bob"])
            .build()
            .unwrap();
        assert_eq!(
            eval_with("str.combine(str.uppercase(name), '!')", Some(&frame)).unwrap(),
            Datum::Column(vec![Some(Value::from("ANN!")), Some(Value::from("BOB!"))])
        );
    }

    #[test]
    fn test_arity_checks() {
        assert!(eval_with("str.uppercase('a', 'b')", None).is_err());
        assert!(eval_with("str.replace('a', with_val='b')", None).is_err());
        assert!(eval_with("str.combine('a')", None).is_err());
    }

    #[test]
    fn test_registry() {
        let registry = FunctionRegistry::builtins();
        assert!(registry.contains("math.cumsum"));
        assert!(!registry.contains("math.median"));
        assert!(registry.names().windows(2).all(|w| w[0] <= w[1]));
    }
}
