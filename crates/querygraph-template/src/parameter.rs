//! Template parameters
//!
//! A parameter is written `<source> -> [value:|list:]<type>`, where the source
//! is either a bare name or an `[expression]`. Dependent parameters draw from
//! the parent node's frame; independent ones from caller-supplied values.

use crate::convert::{Container, RenderSpec, RenderType, TypeConverter};
use crate::evaluator::{Datum, Scope};
use crate::expression::Expression;
use querygraph_core::{Error, Frame, Result, Value, distinct};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a parameter's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Caller-supplied values, written `{% ... %}`
    Independent,
    /// The parent node's frame, written `{{ ... }}`
    Dependent,
}

/// What a parameter reads before conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterSource {
    Name(String),
    Expression(Expression),
}

/// One parsed `{{ }}` or `{% %}` slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    raw: String,
    kind: ParameterKind,
    source: ParameterSource,
    spec: RenderSpec,
}

fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'))
}

/// Byte offset just past the `]` closing the bracket at offset 0
fn closing_bracket(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

impl TemplateParameter {
    /// Parse the text between a parameter's delimiters
    pub fn parse(raw: &str, kind: ParameterKind) -> Result<Self> {
        let text = raw.trim();
        let fail = |message: &str| Error::parameter(text, message);

        let (source, rest) = if text.starts_with('[') {
            let end = closing_bracket(text).ok_or_else(|| fail("unclosed '[' in expression"))?;
            let expr = Expression::parse(&text[1..end - 1])
                .map_err(|e| fail(&format!("invalid expression: {}", e)))?;
            (ParameterSource::Expression(expr), &text[end..])
        } else {
            let arrow = text.find("->").ok_or_else(|| fail("expected '->'"))?;
            let name = text[..arrow].trim();
            if !is_name(name) {
                return Err(fail(&format!("invalid parameter name '{}'", name)));
            }
            (ParameterSource::Name(name.to_string()), &text[arrow..])
        };

        let type_text = rest
            .trim_start()
            .strip_prefix("->")
            .ok_or_else(|| fail("expected '->' after the parameter source"))?
            .trim();
        let (container, type_text) = if let Some(t) = type_text.strip_prefix("list:") {
            (Container::List, t)
        } else if let Some(t) = type_text.strip_prefix("value:") {
            (Container::Value, t)
        } else {
            (Container::Value, type_text)
        };
        if type_text.is_empty() {
            return Err(fail("missing datatype"));
        }
        let render_type: RenderType = type_text
            .parse()
            .map_err(|_| fail(&format!("unknown datatype '{}'", type_text.trim())))?;

        Ok(Self {
            raw: text.to_string(),
            kind,
            source,
            spec: RenderSpec {
                render_type,
                container,
            },
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    pub fn source(&self) -> &ParameterSource {
        &self.source
    }

    pub fn spec(&self) -> &RenderSpec {
        &self.spec
    }

    pub fn is_dependent(&self) -> bool {
        self.kind == ParameterKind::Dependent
    }

    /// Look up or evaluate the value before conversion
    pub fn resolve(
        &self,
        parent: Option<&Frame>,
        values: Option<&HashMap<String, Value>>,
    ) -> Result<Datum> {
        match self.kind {
            ParameterKind::Dependent => {
                let frame = parent.ok_or_else(|| {
                    Error::MissingData(format!(
                        "dependent parameter '{}' has no parent frame",
                        self.raw
                    ))
                })?;
                match &self.source {
                    ParameterSource::Name(name) => frame
                        .column(name)
                        .map(|cells| Datum::Column(cells.to_vec()))
                        .ok_or_else(|| {
                            Error::MissingData(format!(
                                "parent frame has no column '{}'",
                                name
                            ))
                        }),
                    ParameterSource::Expression(expr) => expr.evaluate(
                        &Scope::new().with_frame(Some(frame)).with_values(values),
                    ),
                }
            }
            ParameterKind::Independent => {
                let missing_values = || {
                    Error::MissingData(format!(
                        "independent parameter '{}' needs caller values",
                        self.raw
                    ))
                };
                match &self.source {
                    ParameterSource::Name(name) => {
                        let value = values.ok_or_else(missing_values)?.get(name).ok_or_else(|| {
                            Error::MissingData(format!("no value supplied for '{}'", name))
                        })?;
                        Ok(Datum::from_value(value.clone()))
                    }
                    ParameterSource::Expression(expr) => {
                        if values.is_none() && !expr.identifiers().is_empty() {
                            return Err(missing_values());
                        }
                        expr.evaluate(&Scope::new().with_values(values))
                    }
                }
            }
        }
    }

    /// Resolve and convert to literal text
    pub fn render(
        &self,
        converter: &TypeConverter,
        parent: Option<&Frame>,
        values: Option<&HashMap<String, Value>>,
    ) -> Result<String> {
        let datum = self.resolve(parent, values)?;
        match self.spec.container {
            Container::List => converter.convert_list(&self.spec.render_type, &datum.values()),
            Container::Value => {
                let value = match datum {
                    Datum::Scalar(value) => value,
                    Datum::Column(cells) => self.single(cells.into_iter().flatten())?,
                };
                converter.convert_value(&self.spec.render_type, &value)
            }
        }
    }

    fn single(&self, values: impl Iterator<Item = Value>) -> Result<Value> {
        let mut unique = distinct(values);
        match unique.len() {
            0 => Err(Error::MissingData(format!(
                "parameter '{}' resolved to no values",
                self.raw
            ))),
            1 => Ok(unique.remove(0)),
            n => Err(Error::TypeConversion(format!(
                "atomic parameter '{}' resolved to {} distinct values",
                self.raw, n
            ))),
        }
    }
}
