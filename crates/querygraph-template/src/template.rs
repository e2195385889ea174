//! Query templates
//!
//! A [`QueryTemplate`] is query text with embedded parameters:
//!
//! - `{{ name -> list:int }}` reads the parent node's frame
//! - `{% name -> str %}` reads caller-supplied values
//! - `{# ... #}` is a comment and renders to nothing
//!
//! Templates are scanned and every parameter parsed at construction, so a
//! malformed parameter is reported before anything runs.

use crate::convert::TypeConverter;
use crate::dialect::{Dialect, RenderedQuery};
use crate::parameter::{ParameterKind, TemplateParameter};
use querygraph_core::{Frame, Result, Value};
use std::collections::HashMap;
use tracing::debug;

/// A piece of a scanned template
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateToken {
    Text(String),
    Param(TemplateParameter),
}

/// Parameterized query text bound to a dialect
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    raw: String,
    tokens: Vec<TemplateToken>,
    converter: TypeConverter,
}

enum Delimiter {
    Dependent,
    Independent,
    Comment,
}

const DELIMITERS: [(&str, &str, Delimiter); 3] = [
    ("{{", "}}", Delimiter::Dependent),
    ("{%", "%}", Delimiter::Independent),
    ("{#", "#}", Delimiter::Comment),
];

/// Split template text into literal text and parameters
pub fn scan(raw: &str) -> Result<Vec<TemplateToken>> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut rest = raw;

    loop {
        let opener = DELIMITERS
            .iter()
            .filter_map(|(open, close, kind)| rest.find(open).map(|at| (at, *open, *close, kind)))
            .min_by_key(|(at, ..)| *at);

        let Some((at, open, close, kind)) = opener else {
            text.push_str(rest);
            break;
        };

        let body_start = at + open.len();
        let Some(body_len) = rest[body_start..].find(close) else {
            // An unmatched opener is ordinary text
            text.push_str(&rest[..body_start]);
            rest = &rest[body_start..];
            continue;
        };

        text.push_str(&rest[..at]);
        let body = &rest[body_start..body_start + body_len];
        let param_kind = match kind {
            Delimiter::Dependent => Some(ParameterKind::Dependent),
            Delimiter::Independent => Some(ParameterKind::Independent),
            Delimiter::Comment => None,
        };
        if let Some(param_kind) = param_kind {
            if !text.is_empty() {
                tokens.push(TemplateToken::Text(std::mem::take(&mut text)));
            }
            tokens.push(TemplateToken::Param(TemplateParameter::parse(body, param_kind)?));
        }
        rest = &rest[body_start + body_len + close.len()..];
    }

    if !text.is_empty() {
        tokens.push(TemplateToken::Text(text));
    }
    Ok(tokens)
}

impl QueryTemplate {
    /// Scan and parse a template for a dialect
    pub fn new(raw: impl Into<String>, dialect: Dialect) -> Result<Self> {
        let raw = raw.into();
        let tokens = scan(&raw)?;
        Ok(Self {
            raw,
            tokens,
            converter: TypeConverter::new(dialect),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn dialect(&self) -> Dialect {
        self.converter.dialect()
    }

    pub fn tokens(&self) -> &[TemplateToken] {
        &self.tokens
    }

    pub fn parameters(&self) -> impl Iterator<Item = &TemplateParameter> {
        self.tokens.iter().filter_map(|t| match t {
            TemplateToken::Param(p) => Some(p),
            TemplateToken::Text(_) => None,
        })
    }

    /// Returns true if any parameter reads the parent's frame
    pub fn has_dependent_parameters(&self) -> bool {
        self.parameters().any(TemplateParameter::is_dependent)
    }

    /// Substitute every parameter, producing query text
    pub fn render_text(
        &self,
        parent: Option<&Frame>,
        values: Option<&HashMap<String, Value>>,
    ) -> Result<String> {
        let mut out = String::with_capacity(self.raw.len());
        for token in &self.tokens {
            match token {
                TemplateToken::Text(text) => out.push_str(text),
                TemplateToken::Param(param) => {
                    out.push_str(&param.render(&self.converter, parent, values)?)
                }
            }
        }
        Ok(out)
    }

    /// Render and hand the text to the dialect's post-processing
    pub fn render(
        &self,
        parent: Option<&Frame>,
        values: Option<&HashMap<String, Value>>,
    ) -> Result<RenderedQuery> {
        let text = self.render_text(parent, values)?;
        debug!(dialect = %self.dialect(), query = %text, "Rendered query template");
        self.dialect().post_render(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygraph_core::Error;

    #[test]
    fn test_scan() {
        let tokens = scan("SELECT * FROM t WHERE a IN {{ a -> list:int }}{# note #} AND b = {% b -> str %}").unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0], TemplateToken::Text("SELECT * FROM t WHERE a IN ".into()));
        assert!(matches!(&tokens[1], TemplateToken::Param(p) if p.is_dependent()));
        assert_eq!(tokens[2], TemplateToken::Text(" AND b = ".into()));
        assert!(matches!(&tokens[3], TemplateToken::Param(p) if !p.is_dependent()));
    }

    #[test]
    fn test_unmatched_opener_is_text() {
        let tokens = scan("SELECT '{{' FROM t").unwrap();
        assert_eq!(tokens, vec![TemplateToken::Text("SELECT '{{' FROM t".into())]);
    }

    #[test]
    fn test_parameters_after_unmatched_opener() {
        let template = QueryTemplate::new(
            "SELECT '{{' AS x{# drop me #} WHERE id = {% id -> int %}",
            Dialect::Generic,
        )
        .unwrap();
        assert_eq!(template.parameters().count(), 1);

        let mut values = HashMap::new();
        values.insert("id".to_string(), Value::Int(7));
        assert_eq!(
            template.render_text(None, Some(&values)).unwrap(),
            "SELECT '{{' AS x WHERE id = 7"
        );
    }

    #[test]
    fn test_malformed_parameter_fails_construction() {
        let err = QueryTemplate::new("SELECT {% x -> nope %}", Dialect::Sqlite).unwrap_err();
        assert!(matches!(err, Error::ParameterParse { .. }));
    }

    #[test]
    fn test_render_sql() {
        let template = QueryTemplate::new(
            "SELECT * FROM tracks WHERE album_id IN {{ AlbumId -> list:int }} AND name = {% name -> str %}",
            Dialect::Sqlite,
        )
        .unwrap();
        assert!(template.has_dependent_parameters());

        let parent = Frame::builder().column("AlbumId", [3i64, 1, 3]).build().unwrap();
        let mut values = HashMap::new();
        values.insert("name".to_string(), Value::from("it's"));

        let rendered = template.render(Some(&parent), Some(&values)).unwrap();
        assert_eq!(
            rendered,
            RenderedQuery::Text(
                "SELECT * FROM tracks WHERE album_id IN (3, 1) AND name = 'it''s'".into()
            )
        );
    }

    #[test]
    fn test_render_mongo_document() {
        let template = QueryTemplate::new(
            r#"{"album": {"$in": {{ Title -> list:str }}}}"#,
            Dialect::MongoDb,
        )
        .unwrap();
        let parent = Frame::builder().column("Title", ["A", "B"]).build().unwrap();
        let rendered = template.render(Some(&parent), None).unwrap();
        let doc = rendered.as_document().unwrap();
        assert_eq!(doc["album"]["$in"], serde_json::json!(["A", "B"]));
    }

    #[test]
    fn test_independent_only_template() {
        let template = QueryTemplate::new("SELECT {% n -> int %}", Dialect::Generic).unwrap();
        assert!(!template.has_dependent_parameters());
        let mut values = HashMap::new();
        values.insert("n".to_string(), Value::from("5"));
        assert_eq!(template.render_text(None, Some(&values)).unwrap(), "SELECT 5");
    }
}
