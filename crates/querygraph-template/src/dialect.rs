//! Query dialects
//!
//! A [`Dialect`] decides how literals are spelled, how lists are wrapped and
//! what shape a rendered query takes before it reaches a driver.

use crate::convert::Literal;
use querygraph_core::{DATE_FORMAT, DATETIME_FORMAT, Error, Result, TIME_FORMAT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S";
const RFC3339_UTC: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Target query language of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    Generic,
    Sqlite,
    Postgres,
    MySql,
    Cassandra,
    MongoDb,
    ElasticSearch,
    InfluxDb,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Generic => "generic",
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Cassandra => "cassandra",
            Dialect::MongoDb => "mongodb",
            Dialect::ElasticSearch => "elasticsearch",
            Dialect::InfluxDb => "influxdb",
        }
    }

    /// Returns true if rendered queries are JSON documents rather than text
    pub fn is_document(&self) -> bool {
        matches!(self, Dialect::MongoDb | Dialect::ElasticSearch)
    }

    /// Quote a string literal
    pub fn quote(&self, s: &str) -> String {
        match self {
            Dialect::MongoDb | Dialect::ElasticSearch => {
                serde_json::Value::String(s.to_string()).to_string()
            }
            Dialect::InfluxDb => {
                format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
            }
            _ => format!("'{}'", s.replace('\'', "''")),
        }
    }

    /// Spell a coerced literal
    pub fn format_literal(&self, literal: &Literal) -> Result<String> {
        let text = match literal {
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) if !f.is_finite() => {
                return Err(Error::TypeConversion(format!(
                    "{} has no {} literal",
                    f,
                    self.name()
                )));
            }
            Literal::Float(f) => format!("{:?}", f),
            Literal::Text(s) => self.quote(s),
            Literal::Raw(s) => s.clone(),
            Literal::Bool(b) => match self {
                Dialect::Sqlite => if *b { "1" } else { "0" }.to_string(),
                Dialect::Cassandra
                | Dialect::MongoDb
                | Dialect::ElasticSearch
                | Dialect::InfluxDb => b.to_string(),
                _ => if *b { "TRUE" } else { "FALSE" }.to_string(),
            },
            Literal::DateTime(dt) => match self {
                Dialect::Sqlite => format!("datetime('{}')", dt.format(DATETIME_FORMAT)),
                Dialect::Postgres => format!("TIMESTAMP '{}'", dt.format(DATETIME_FORMAT)),
                Dialect::MongoDb => format!(r#"{{"$date": "{}"}}"#, dt.format(RFC3339_UTC)),
                Dialect::ElasticSearch => self.quote(&dt.format(ISO_DATETIME).to_string()),
                Dialect::InfluxDb => self.quote(&dt.format(RFC3339_UTC).to_string()),
                _ => self.quote(&dt.format(DATETIME_FORMAT).to_string()),
            },
            Literal::Date(d) => match self {
                Dialect::Sqlite => format!("date('{}')", d.format(DATE_FORMAT)),
                Dialect::Postgres => format!("DATE '{}'", d.format(DATE_FORMAT)),
                Dialect::MongoDb => format!(
                    r#"{{"$date": "{}T00:00:00Z"}}"#,
                    d.format(DATE_FORMAT)
                ),
                Dialect::InfluxDb => {
                    self.quote(&format!("{}T00:00:00Z", d.format(DATE_FORMAT)))
                }
                _ => self.quote(&d.format(DATE_FORMAT).to_string()),
            },
            Literal::Time(t) => match self {
                Dialect::Sqlite => format!("time('{}')", t.format(TIME_FORMAT)),
                Dialect::Postgres => format!("TIME '{}'", t.format(TIME_FORMAT)),
                _ => self.quote(&t.format(TIME_FORMAT).to_string()),
            },
        };
        Ok(text)
    }

    /// Wrap already-converted items in the dialect's list syntax
    pub fn format_list(&self, items: &[String]) -> String {
        let joined = items.join(", ");
        if self.is_document() {
            format!("[{}]", joined)
        } else {
            format!("({})", joined)
        }
    }

    /// Turn rendered template text into the form the driver receives
    pub fn post_render(&self, text: String) -> Result<RenderedQuery> {
        if !self.is_document() {
            return Ok(RenderedQuery::Text(text));
        }
        serde_json::from_str(&text)
            .map(RenderedQuery::Document)
            .map_err(|e| {
                Error::TypeConversion(format!(
                    "rendered {} query is not valid JSON: {}",
                    self.name(),
                    e
                ))
            })
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Dialect::Generic),
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "cassandra" | "cql" => Ok(Dialect::Cassandra),
            "mssql" | "sqlserver" => Ok(Dialect::Generic),
            "mongodb" | "mongo" => Ok(Dialect::MongoDb),
            "elasticsearch" | "elastic" => Ok(Dialect::ElasticSearch),
            "influxdb" | "influx" => Ok(Dialect::InfluxDb),
            other => Err(Error::Configuration(format!("unknown dialect '{}'", other))),
        }
    }
}

/// A fully rendered query, ready for a driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderedQuery {
    /// Query language text
    Text(String),
    /// Structured query for document stores
    Document(serde_json::Value),
}

impl RenderedQuery {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RenderedQuery::Text(text) => Some(text),
            RenderedQuery::Document(_) => None,
        }
    }

    pub fn as_document(&self) -> Option<&serde_json::Value> {
        match self {
            RenderedQuery::Document(doc) => Some(doc),
            RenderedQuery::Text(_) => None,
        }
    }
}

impl fmt::Display for RenderedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderedQuery::Text(text) => f.write_str(text),
            RenderedQuery::Document(doc) => write!(f, "{}", doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_parse() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("mongo".parse::<Dialect>().unwrap(), Dialect::MongoDb);
        assert!("oracle".parse::<Dialect>().is_err());
        assert_eq!("Cassandra".parse::<Dialect>().unwrap(), Dialect::Cassandra);
        assert_eq!("mariadb".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::Generic);
    }

    #[test]
    fn test_cassandra_literals() {
        let dt = chrono::NaiveDate::from_ymd_opt(2016, 3, 1)
            .and_then(|d| d.and_hms_opt(12, 30, 0))
            .unwrap();
        let cql = Dialect::Cassandra;
        assert_eq!(cql.format_literal(&Literal::DateTime(dt)).unwrap(), "'2016-03-01 12:30:00'");
        assert_eq!(cql.format_literal(&Literal::Bool(true)).unwrap(), "true");
        assert_eq!(cql.quote("it's"), "'it''s'");
        assert_eq!(cql.post_render("SELECT 1".into()).unwrap().as_text(), Some("SELECT 1"));
    }

    #[test]
    fn test_list_syntax() {
        let items = vec!["1".to_string(), "2".to_string()];
        assert_eq!(Dialect::Sqlite.format_list(&items), "(1, 2)");
        assert_eq!(Dialect::ElasticSearch.format_list(&items), "[1, 2]");
    }

    #[test]
    fn test_post_render() {
        let text = Dialect::Postgres.post_render("SELECT 1".into()).unwrap();
        assert_eq!(text.as_text(), Some("SELECT 1"));

        let doc = Dialect::MongoDb
            .post_render(r#"{"album": {"$in": ["a", "b"]}}"#.into())
            .unwrap();
        assert_eq!(doc.as_document().unwrap()["album"]["$in"][1], "b");

        let err = Dialect::MongoDb.post_render("{album:".into()).unwrap_err();
        assert!(matches!(err, Error::TypeConversion(_)));
    }

    #[test]
    fn test_non_finite_float() {
        assert!(Dialect::Generic.format_literal(&Literal::Float(f64::NAN)).is_err());
        assert_eq!(
            Dialect::Generic.format_literal(&Literal::Float(2.5)).unwrap(),
            "2.5"
        );
    }
}
