//! Value to literal conversion
//!
//! A [`TypeConverter`] turns runtime [`Value`]s into literal text for a
//! target datatype. Conversion happens in two steps: a closed table keyed by
//! `(render type, value kind)` coerces the value into a [`Literal`], and the
//! [`Dialect`] then spells that literal in its own syntax.

use crate::dialect::Dialect;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use querygraph_core::{DATE_FORMAT, DATETIME_FORMAT, Error, Result, TIME_FORMAT, Value, ValueKind, distinct};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Datatype a parameter is rendered as
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderType {
    Int,
    Float,
    Str,
    Bool,
    DateTime,
    Date,
    Time,
    /// Format string with `{}` standing for the value's plain text
    Custom(String),
}

impl RenderType {
    pub fn name(&self) -> &str {
        match self {
            RenderType::Int => "int",
            RenderType::Float => "float",
            RenderType::Str => "str",
            RenderType::Bool => "bool",
            RenderType::DateTime => "datetime",
            RenderType::Date => "date",
            RenderType::Time => "time",
            RenderType::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for RenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderType::Custom(format) => write!(f, "custom[{}]", format),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for RenderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(format) = s
            .strip_prefix("custom[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return Ok(RenderType::Custom(format.to_string()));
        }
        match s {
            "int" => Ok(RenderType::Int),
            "float" => Ok(RenderType::Float),
            "str" => Ok(RenderType::Str),
            "bool" => Ok(RenderType::Bool),
            "datetime" => Ok(RenderType::DateTime),
            "date" => Ok(RenderType::Date),
            "time" => Ok(RenderType::Time),
            other => Err(Error::TypeConversion(format!(
                "unknown render type '{}'",
                other
            ))),
        }
    }
}

/// Whether a parameter renders one value or a list of values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Container {
    Value,
    List,
}

/// How a parameter's value is rendered
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderSpec {
    pub render_type: RenderType,
    pub container: Container,
}

impl RenderSpec {
    pub fn value(render_type: RenderType) -> Self {
        Self {
            render_type,
            container: Container::Value,
        }
    }

    pub fn list(render_type: RenderType) -> Self {
        Self {
            render_type,
            container: Container::List,
        }
    }
}

/// A coerced value, waiting to be spelled by a dialect
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Already-final text, emitted as is
    Raw(String),
}

type Coercion = fn(&Value) -> Result<Literal>;

/// Converts values to dialect literals
#[derive(Debug, Clone)]
pub struct TypeConverter {
    dialect: Dialect,
    table: HashMap<(&'static str, ValueKind), Coercion>,
}

impl TypeConverter {
    /// Build the converter table for a dialect
    pub fn new(dialect: Dialect) -> Self {
        let mut table: HashMap<(&'static str, ValueKind), Coercion> = HashMap::new();

        table.insert(("int", ValueKind::Int), |v| Ok(Literal::Int(int_of(v)?)));
        table.insert(("int", ValueKind::Float), |v| {
            let f = float_of(v)?;
            float_to_int(f.trunc())
                .map(Literal::Int)
                .ok_or_else(|| Error::TypeConversion(format!("cannot render {} as int", f)))
        });
        table.insert(("int", ValueKind::Str), |v| {
            let s = str_of(v)?;
            s.trim()
                .parse::<i64>()
                .map(Literal::Int)
                .map_err(|_| Error::TypeConversion(format!("cannot render '{}' as int", s)))
        });

        table.insert(("float", ValueKind::Int), |v| Ok(Literal::Float(float_of(v)?)));
        table.insert(("float", ValueKind::Float), |v| Ok(Literal::Float(float_of(v)?)));
        table.insert(("float", ValueKind::Str), |v| {
            let s = str_of(v)?;
            s.trim()
                .parse::<f64>()
                .map(Literal::Float)
                .map_err(|_| Error::TypeConversion(format!("cannot render '{}' as float", s)))
        });

        table.insert(("str", ValueKind::Str), |v| Ok(Literal::Text(str_of(v)?.to_string())));
        table.insert(("str", ValueKind::Int), |v| Ok(Literal::Text(v.to_string())));
        table.insert(("str", ValueKind::Float), |v| Ok(Literal::Text(v.to_string())));

        table.insert(("bool", ValueKind::Bool), |v| match v {
            Value::Bool(b) => Ok(Literal::Bool(*b)),
            other => Err(mismatch("bool", other)),
        });
        table.insert(("bool", ValueKind::Int), |v| Ok(Literal::Int(int_of(v)?)));

        table.insert(("datetime", ValueKind::DateTime), |v| match v {
            Value::DateTime(dt) => Ok(Literal::DateTime(*dt)),
            other => Err(mismatch("datetime", other)),
        });
        table.insert(("datetime", ValueKind::Date), |v| match v {
            Value::Date(d) => Ok(Literal::Date(*d)),
            other => Err(mismatch("datetime", other)),
        });
        table.insert(("datetime", ValueKind::Str), |v| {
            let s = str_of(v)?;
            parse_datetime(s)
                .map(Literal::DateTime)
                .or_else(|| parse_date(s).map(Literal::Date))
                .ok_or_else(|| Error::TypeConversion(format!("cannot render '{}' as datetime", s)))
        });

        table.insert(("date", ValueKind::DateTime), |v| match v {
            Value::DateTime(dt) => Ok(Literal::Date(dt.date())),
            other => Err(mismatch("date", other)),
        });
        table.insert(("date", ValueKind::Date), |v| match v {
            Value::Date(d) => Ok(Literal::Date(*d)),
            other => Err(mismatch("date", other)),
        });
        table.insert(("date", ValueKind::Str), |v| {
            let s = str_of(v)?;
            parse_date(s)
                .or_else(|| parse_datetime(s).map(|dt| dt.date()))
                .map(Literal::Date)
                .ok_or_else(|| Error::TypeConversion(format!("cannot render '{}' as date", s)))
        });

        table.insert(("time", ValueKind::DateTime), |v| match v {
            Value::DateTime(dt) => Ok(Literal::Time(dt.time())),
            other => Err(mismatch("time", other)),
        });
        table.insert(("time", ValueKind::Time), |v| match v {
            Value::Time(t) => Ok(Literal::Time(*t)),
            other => Err(mismatch("time", other)),
        });
        table.insert(("time", ValueKind::Str), |v| {
            let s = str_of(v)?;
            NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
                .map(Literal::Time)
                .map_err(|_| Error::TypeConversion(format!("cannot render '{}' as time", s)))
        });

        // Epoch seconds are a common timestamp encoding for these stores
        if matches!(dialect, Dialect::Sqlite | Dialect::InfluxDb) {
            table.insert(("datetime", ValueKind::Int), |v| {
                let secs = int_of(v)?;
                DateTime::from_timestamp(secs, 0)
                    .map(|dt| Literal::DateTime(dt.naive_utc()))
                    .ok_or_else(|| {
                        Error::TypeConversion(format!("timestamp {} out of range", secs))
                    })
            });
        }

        Self { dialect, table }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Convert a value, naming the target type as text (`"int"`, `"custom[...]"`, ...)
    pub fn convert(&self, render_type: &str, value: &Value) -> Result<String> {
        let render_type: RenderType = render_type.parse()?;
        self.convert_value(&render_type, value)
    }

    /// Convert a single value to literal text
    pub fn convert_value(&self, render_type: &RenderType, value: &Value) -> Result<String> {
        let literal = self.coerce(render_type, value)?;
        self.dialect.format_literal(&literal)
    }

    /// Convert a list of values into the dialect's container syntax.
    ///
    /// Duplicates are removed first, keeping first occurrences in order.
    pub fn convert_list(&self, render_type: &RenderType, values: &[Value]) -> Result<String> {
        let items = distinct(values.iter().cloned())
            .iter()
            .map(|v| self.convert_value(render_type, v))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.dialect.format_list(&items))
    }

    /// Render a value or list according to a full render spec
    pub fn render(&self, spec: &RenderSpec, value: &Value) -> Result<String> {
        match (spec.container, value) {
            (Container::List, Value::List(items)) => self.convert_list(&spec.render_type, items),
            (Container::List, scalar) => {
                self.convert_list(&spec.render_type, std::slice::from_ref(scalar))
            }
            (Container::Value, value) => self.convert_value(&spec.render_type, value),
        }
    }

    fn coerce(&self, render_type: &RenderType, value: &Value) -> Result<Literal> {
        if let RenderType::Custom(format) = render_type {
            if value.is_list() {
                return Err(mismatch("custom", value));
            }
            return Ok(Literal::Raw(format.replace("{}", &value.to_string())));
        }
        let key = (static_name(render_type), value.kind());
        let coercion = self
            .table
            .get(&key)
            .ok_or_else(|| mismatch(render_type.name(), value))?;
        coercion(value)
    }
}

impl Default for TypeConverter {
    fn default() -> Self {
        Self::new(Dialect::Generic)
    }
}

fn static_name(render_type: &RenderType) -> &'static str {
    match render_type {
        RenderType::Int => "int",
        RenderType::Float => "float",
        RenderType::Str => "str",
        RenderType::Bool => "bool",
        RenderType::DateTime => "datetime",
        RenderType::Date => "date",
        RenderType::Time => "time",
        RenderType::Custom(_) => "custom",
    }
}

fn mismatch(render_type: &str, value: &Value) -> Error {
    Error::TypeConversion(format!(
        "no {} conversion for {} value '{}'",
        render_type,
        value.type_name(),
        value
    ))
}

fn int_of(value: &Value) -> Result<i64> {
    value.as_int().ok_or_else(|| mismatch("int", value))
}

fn float_of(value: &Value) -> Result<f64> {
    value.as_float().ok_or_else(|| mismatch("float", value))
}

/// Exact float to int cast; `None` when the value is not finite or falls outside `i64`
pub fn float_to_int(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range
    if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn str_of(value: &Value) -> Result<&str> {
    value.as_str().ok_or_else(|| mismatch("str", value))
}

/// Parse `%Y-%m-%d %H:%M:%S`, also accepting a `T` separator
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Parse `%Y-%m-%d`
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_int_conversion() {
        let converter = TypeConverter::default();
        assert_eq!(converter.convert("int", &Value::from("5")).unwrap(), "5");
        assert_eq!(converter.convert("int", &Value::Float(7.9)).unwrap(), "7");
        assert!(converter.convert("int", &Value::from("five")).is_err());
    }

    #[test]
    fn test_int_rejects_out_of_range_float() {
        let converter = TypeConverter::default();
        for f in [1e300, -1e300, 9.223372036854775807e18, f64::NAN, f64::INFINITY] {
            let err = converter.convert("int", &Value::Float(f)).unwrap_err();
            assert!(matches!(err, Error::TypeConversion(_)), "{}: {:?}", f, err);
        }
        assert_eq!(converter.convert("int", &Value::Float(-2.5e15)).unwrap(), "-2500000000000000");
    }

    #[test]
    fn test_float_rejects_garbage() {
        let converter = TypeConverter::default();
        let err = converter.convert("float", &Value::from("bad")).unwrap_err();
        assert!(matches!(err, Error::TypeConversion(_)));
        assert_eq!(converter.convert("float", &Value::Int(2)).unwrap(), "2.0");
    }

    #[test]
    fn test_string_quoting_per_dialect() {
        let value = Value::from("a'b");
        assert_eq!(
            TypeConverter::new(Dialect::Postgres).convert("str", &value).unwrap(),
            "'a''b'"
        );
        assert_eq!(
            TypeConverter::new(Dialect::InfluxDb).convert("str", &value).unwrap(),
            r"'a\'b'"
        );
        assert_eq!(
            TypeConverter::new(Dialect::MongoDb).convert("str", &value).unwrap(),
            "\"a'b\""
        );
    }

    #[test]
    fn test_unknown_type_and_missing_entry() {
        let converter = TypeConverter::default();
        assert!(converter.convert("decimal", &Value::Int(1)).is_err());
        assert!(converter.convert("time", &Value::Int(1)).is_err());
        assert!(converter.convert("int", &Value::from(vec![1i64])).is_err());
    }

    #[test]
    fn test_temporal_literals() {
        let dt = parse_datetime("2009-01-06 01:02:03").unwrap();
        let value = Value::DateTime(dt);
        assert_eq!(
            TypeConverter::new(Dialect::Sqlite).convert("datetime", &value).unwrap(),
            "datetime('2009-01-06 01:02:03')"
        );
        assert_eq!(
            TypeConverter::new(Dialect::Postgres).convert("date", &value).unwrap(),
            "DATE '2009-01-06'"
        );
        assert_eq!(
            TypeConverter::new(Dialect::MongoDb).convert("datetime", &value).unwrap(),
            r#"{"$date": "2009-01-06T01:02:03Z"}"#
        );
        assert_eq!(
            TypeConverter::default().convert("time", &value).unwrap(),
            "'01:02:03'"
        );
    }

    #[test]
    fn test_epoch_seconds_for_sqlite() {
        let sqlite = TypeConverter::new(Dialect::Sqlite);
        assert_eq!(
            sqlite.convert("datetime", &Value::Int(0)).unwrap(),
            "datetime('1970-01-01 00:00:00')"
        );
        assert!(TypeConverter::new(Dialect::Postgres)
            .convert("datetime", &Value::Int(0))
            .is_err());
    }

    #[test]
    fn test_bool_and_custom() {
        assert_eq!(
            TypeConverter::new(Dialect::Sqlite).convert("bool", &Value::Bool(true)).unwrap(),
            "1"
        );
        assert_eq!(
            TypeConverter::new(Dialect::MySql).convert("bool", &Value::Bool(false)).unwrap(),
            "FALSE"
        );
        assert_eq!(
            TypeConverter::default()
                .convert("custom[x_{}_y]", &Value::Int(3))
                .unwrap(),
            "x_3_y"
        );
    }

    #[test]
    fn test_list_dedup() {
        let converter = TypeConverter::default();
        let values = [Value::Int(3), Value::Int(1), Value::Int(2)];
        assert_eq!(converter.convert_list(&RenderType::Int, &values).unwrap(), "(3, 1, 2)");

        let values = [Value::Int(1), Value::Int(1), Value::Int(2)];
        assert_eq!(converter.convert_list(&RenderType::Int, &values).unwrap(), "(1, 2)");

        let mongo = TypeConverter::new(Dialect::MongoDb);
        let values = [Value::from("a"), Value::from("b")];
        assert_eq!(
            mongo.convert_list(&RenderType::Str, &values).unwrap(),
            r#"["a", "b"]"#
        );
    }

    #[test]
    fn test_render_type_parse() {
        assert_eq!("datetime".parse::<RenderType>().unwrap(), RenderType::DateTime);
        assert_eq!(
            "custom[%{}%]".parse::<RenderType>().unwrap(),
            RenderType::Custom("%{}%".into())
        );
        assert_eq!(RenderType::Custom("{}".into()).to_string(), "custom[{}]");
    }

    proptest! {
        #[test]
        fn list_rendering_has_one_literal_per_distinct_value(
            xs in proptest::collection::vec(0i64..10, 1..32)
        ) {
            let converter = TypeConverter::default();
            let values: Vec<Value> = xs.iter().copied().map(Value::Int).collect();
            let text = converter.convert_list(&RenderType::Int, &values).unwrap();
            let distinct_count = distinct(values).len();
            prop_assert_eq!(text.split(", ").count(), distinct_count);
        }
    }
}
