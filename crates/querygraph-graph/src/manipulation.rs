//! Post-query manipulations
//!
//! A node's [`ManipulationSet`] reshapes its frame after retrieval and before
//! any join: computed columns, renames, projections and list flattening.

use querygraph_core::{Frame, Result, Value};
use querygraph_template::{Expression, Scope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One reshaping step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Manipulation {
    /// Add or replace a column computed from an expression
    Mutate { column: String, expression: Expression },
    /// Rename columns, `(old, new)`
    Rename(Vec<(String, String)>),
    /// Keep only these columns, in this order
    Select(Vec<String>),
    /// Drop these columns
    Remove(Vec<String>),
    /// One row per element of a list-valued column
    Flatten(String),
}

impl Manipulation {
    pub fn name(&self) -> &'static str {
        match self {
            Manipulation::Mutate { .. } => "mutate",
            Manipulation::Rename(_) => "rename",
            Manipulation::Select(_) => "select",
            Manipulation::Remove(_) => "remove",
            Manipulation::Flatten(_) => "flatten",
        }
    }

    /// Apply to a frame; caller values are visible to `mutate` expressions
    pub fn apply(&self, frame: &Frame, values: Option<&HashMap<String, Value>>) -> Result<Frame> {
        match self {
            Manipulation::Mutate { column, expression } => {
                let scope = Scope::new().with_frame(Some(frame)).with_values(values);
                let cells = expression.evaluate(&scope)?.into_cells(frame.num_rows())?;
                frame.with_column(column, cells)
            }
            Manipulation::Rename(pairs) => {
                frame.rename(pairs.iter().map(|(old, new)| (old.as_str(), new.as_str())))
            }
            Manipulation::Select(columns) => frame.select(columns),
            Manipulation::Remove(columns) => frame.drop(columns),
            Manipulation::Flatten(column) => frame.explode(column),
        }
    }
}

impl fmt::Display for Manipulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Manipulation::Mutate { column, expression } => {
                write!(f, "mutate({} = {})", column, expression)
            }
            Manipulation::Rename(pairs) => {
                let pairs: Vec<String> = pairs.iter().map(|(o, n)| format!("{} -> {}", o, n)).collect();
                write!(f, "rename({})", pairs.join(", "))
            }
            Manipulation::Select(columns) => write!(f, "select({})", columns.join(", ")),
            Manipulation::Remove(columns) => write!(f, "remove({})", columns.join(", ")),
            Manipulation::Flatten(column) => write!(f, "flatten({})", column),
        }
    }
}

/// Ordered manipulations run on a node's result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManipulationSet {
    steps: Vec<Manipulation>,
}

impl ManipulationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Manipulation) {
        self.steps.push(step);
    }

    /// Builder: append a step
    pub fn with(mut self, step: Manipulation) -> Self {
        self.push(step);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Manipulation> {
        self.steps.iter()
    }

    /// Run every step in order
    pub fn apply(&self, frame: Frame, values: Option<&HashMap<String, Value>>) -> Result<Frame> {
        self.steps
            .iter()
            .try_fold(frame, |frame, step| step.apply(&frame, values))
    }
}

impl FromIterator<Manipulation> for ManipulationSet {
    fn from_iter<I: IntoIterator<Item = Manipulation>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ManipulationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self.steps.iter().map(ToString::to_string).collect();
        f.write_str(&steps.join(" >> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querygraph_core::Error;

    fn tracks() -> Frame {
        Frame::builder()
            .column("name", ["intro", "outro"])
            .column("ms", [60_000i64, 90_000])
            .column("tags", [Value::from(vec!["a", "b"]), Value::from(vec!["c"])])
            .build()
            .unwrap()
    }

    fn mutate(column: &str, source: &str) -> Manipulation {
        Manipulation::Mutate {
            column: column.into(),
            expression: Expression::parse(source).unwrap(),
        }
    }

    #[test]
    fn test_mutate_columns_and_scalars() {
        let set = ManipulationSet::new()
            .with(mutate("seconds", "ms / 1000"))
            .with(mutate("label", "str.uppercase(name)"))
            .with(mutate("source", "'fixture'"));
        let frame = set.apply(tracks(), None).unwrap();
        assert_eq!(frame.get(1, "seconds"), Some(&Some(Value::Float(90.0))));
        assert_eq!(frame.get(0, "label"), Some(&Some(Value::from("INTRO"))));
        assert_eq!(frame.get(1, "source"), Some(&Some(Value::from("fixture"))));
    }

    #[test]
    fn test_mutate_sees_caller_values() {
        let mut values = HashMap::new();
        values.insert("factor".to_string(), Value::Int(2));
        let frame = mutate("double", "ms * factor").apply(&tracks(), Some(&values)).unwrap();
        assert_eq!(frame.get(0, "double"), Some(&Some(Value::Int(120_000))));
    }

    #[test]
    fn test_rename_select_remove_flatten() {
        let set: ManipulationSet = vec![
            Manipulation::Flatten("tags".into()),
            Manipulation::Rename(vec![("name".into(), "track".into())]),
            Manipulation::Remove(vec!["ms".into()]),
            Manipulation::Select(vec!["tags".into(), "track".into()]),
        ]
        .into_iter()
        .collect();
        let frame = set.apply(tracks(), None).unwrap();
        assert_eq!(frame.columns(), &["tags".to_string(), "track".to_string()]);
        assert_eq!(frame.num_rows(), 3);
        assert_eq!(
            set.to_string(),
            "flatten(tags) >> rename(name -> track) >> remove(ms) >> select(tags, track)"
        );
    }

    #[test]
    fn test_failures_propagate() {
        let err = Manipulation::Select(vec!["nope".into()])
            .apply(&tracks(), None)
            .unwrap_err();
        assert!(matches!(err, Error::MissingData(_)));

        let err = mutate("x", "name * 2").apply(&tracks(), None).unwrap_err();
        assert!(matches!(err, Error::Evaluation(_)));
    }
}
