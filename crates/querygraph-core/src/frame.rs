//! Tabular frames
//!
//! [`Frame`] is the row/column structure every query returns into and every
//! join and manipulation operates on. Data is stored column-major; a missing
//! value is a `None` cell.

use crate::error::{Error, JoinSide, Result};
use crate::value::{Value, distinct};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// A single frame cell; `None` is null
pub type Cell = Option<Value>;

/// Relational merge semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// Keep only matching rows
    Inner,
    /// Keep every left row, null-padding unmatched right columns
    Left,
    /// Keep every right row, null-padding unmatched left columns
    Right,
    /// Keep every row of both sides
    Outer,
}

impl JoinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Inner => "inner",
            JoinKind::Left => "left",
            JoinKind::Right => "right",
            JoinKind::Outer => "outer",
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinKind::Inner),
            "left" => Ok(JoinKind::Left),
            "right" => Ok(JoinKind::Right),
            "outer" => Ok(JoinKind::Outer),
            other => Err(Error::Configuration(format!(
                "invalid join kind '{}'",
                other
            ))),
        }
    }
}

/// Named, ordered columns of cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameParts")]
pub struct Frame {
    columns: Vec<String>,
    data: Vec<Vec<Cell>>,
}

/// Unchecked wire shape of a [`Frame`]
#[derive(Deserialize)]
struct FrameParts {
    columns: Vec<String>,
    data: Vec<Vec<Cell>>,
}

impl TryFrom<FrameParts> for Frame {
    type Error = Error;

    fn try_from(parts: FrameParts) -> Result<Self> {
        if parts.columns.len() != parts.data.len() {
            return Err(Error::Execution(format!(
                "frame names {} columns but carries {}",
                parts.columns.len(),
                parts.data.len()
            )));
        }
        Self::from_columns(parts.columns.into_iter().zip(parts.data).collect())
    }
}

impl Frame {
    /// Create an empty frame with no columns
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a frame with the given columns and no rows
    pub fn with_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        check_unique(&columns)?;
        let data = vec![Vec::new(); columns.len()];
        Ok(Self { columns, data })
    }

    /// Start building a frame column by column
    pub fn builder() -> FrameBuilder {
        FrameBuilder::default()
    }

    /// Build a frame from named columns of equal length
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<Cell>)>) -> Result<Self> {
        let (names, data): (Vec<String>, Vec<Vec<Cell>>) = columns
            .into_iter()
            .map(|(name, cells)| (name.into(), cells))
            .unzip();
        check_unique(&names)?;
        if let Some(first) = data.first() {
            if let Some((i, col)) = data.iter().enumerate().find(|(_, c)| c.len() != first.len()) {
                return Err(Error::Execution(format!(
                    "column '{}' has {} rows, expected {}",
                    names[i],
                    col.len(),
                    first.len()
                )));
            }
        }
        Ok(Self {
            columns: names,
            data,
        })
    }

    /// Build a frame from row-major data
    pub fn from_rows<S: Into<String>>(columns: Vec<S>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let mut frame = Self::with_columns(columns)?;
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    /// Append a row
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Execution(format!(
                "row has {} cells, frame has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (col, cell) in self.data.iter_mut().zip(row) {
            col.push(cell);
        }
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.data.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cells of a column, top to bottom
    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.column_index(name).map(|i| self.data[i].as_slice())
    }

    /// Cell at a row in the named column
    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        self.column(column).and_then(|c| c.get(row))
    }

    /// Copy of a single row
    pub fn row(&self, index: usize) -> Option<Vec<Cell>> {
        (index < self.num_rows()).then(|| self.data.iter().map(|c| c[index].clone()).collect())
    }

    /// Iterate over copies of every row
    pub fn rows(&self) -> impl Iterator<Item = Vec<Cell>> + '_ {
        (0..self.num_rows()).map(move |i| self.data.iter().map(|c| c[i].clone()).collect())
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| Error::MissingData(format!("column '{}' not found", name)))
    }

    /// Distinct non-null values of a column, in first-occurrence order
    pub fn unique_values(&self, column: &str) -> Result<Vec<Value>> {
        let idx = self.require(column)?;
        Ok(distinct(self.data[idx].iter().flatten().cloned()))
    }

    /// Rename columns; every old name must exist
    pub fn rename<'a, I>(&self, mapping: I) -> Result<Frame>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut out = self.clone();
        for (old, new) in mapping {
            let idx = out.require(old)?;
            out.columns[idx] = new.to_string();
        }
        check_unique(&out.columns)?;
        Ok(out)
    }

    /// Remove columns; every name must exist
    pub fn drop<S: AsRef<str>>(&self, columns: &[S]) -> Result<Frame> {
        let mut out = self.clone();
        for name in columns {
            let idx = out.require(name.as_ref())?;
            out.columns.remove(idx);
            out.data.remove(idx);
        }
        Ok(out)
    }

    /// Keep only the given columns, in the given order
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> Result<Frame> {
        let mut names = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        for name in columns {
            let idx = self.require(name.as_ref())?;
            names.push(self.columns[idx].clone());
            data.push(self.data[idx].clone());
        }
        check_unique(&names)?;
        Ok(Frame {
            columns: names,
            data,
        })
    }

    /// Add or replace a column
    pub fn with_column(&self, name: &str, cells: Vec<Cell>) -> Result<Frame> {
        if self.num_columns() > 0 && cells.len() != self.num_rows() {
            return Err(Error::Execution(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                cells.len(),
                self.num_rows()
            )));
        }
        let mut out = self.clone();
        match out.column_index(name) {
            Some(idx) => out.data[idx] = cells,
            None => {
                out.columns.push(name.to_string());
                out.data.push(cells);
            }
        }
        Ok(out)
    }

    /// Flatten a list-valued column into one row per element.
    ///
    /// Non-list cells stay on a single row; an empty list becomes a null.
    pub fn explode(&self, column: &str) -> Result<Frame> {
        let idx = self.require(column)?;
        let mut out = Frame {
            columns: self.columns.clone(),
            data: vec![Vec::new(); self.columns.len()],
        };
        for row in self.rows() {
            let expanded: Vec<Cell> = match &row[idx] {
                Some(Value::List(items)) if items.is_empty() => vec![None],
                Some(Value::List(items)) => items.iter().cloned().map(Some).collect(),
                other => vec![other.clone()],
            };
            for cell in expanded {
                let mut new_row = row.clone();
                new_row[idx] = cell;
                out.push_row(new_row)?;
            }
        }
        Ok(out)
    }

    fn key(&self, row: usize, key_cols: &[usize]) -> Option<Vec<Value>> {
        key_cols.iter().map(|&c| self.data[c][row].clone()).collect()
    }

    fn key_index(&self, key_cols: &[usize]) -> HashMap<Vec<Value>, Vec<usize>> {
        let mut index: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        for row in 0..self.num_rows() {
            if let Some(key) = self.key(row, key_cols) {
                index.entry(key).or_default().push(row);
            }
        }
        index
    }

    /// Relational merge of `self` (the parent side) with `other`.
    ///
    /// Output columns are this frame's followed by `other`'s. A right key
    /// with the same name as its paired left key is folded into the left
    /// column; other overlapping names get `_x`/`_y` suffixes. Null keys
    /// never match.
    pub fn merge<S: AsRef<str>>(
        &self,
        other: &Frame,
        how: JoinKind,
        left_on: &[S],
        right_on: &[S],
    ) -> Result<Frame> {
        if left_on.is_empty() || left_on.len() != right_on.len() {
            return Err(Error::Configuration(format!(
                "merge needs matching key lists, got {} and {}",
                left_on.len(),
                right_on.len()
            )));
        }
        let left_keys = left_on
            .iter()
            .map(|c| {
                self.column_index(c.as_ref()).ok_or_else(|| Error::JoinColumn {
                    column: c.as_ref().to_string(),
                    side: JoinSide::Parent,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let right_keys = right_on
            .iter()
            .map(|c| {
                other.column_index(c.as_ref()).ok_or_else(|| Error::JoinColumn {
                    column: c.as_ref().to_string(),
                    side: JoinSide::Child,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // left column -> right column it is coalesced with
        let coalesced: HashMap<usize, usize> = left_keys
            .iter()
            .zip(&right_keys)
            .filter(|(l, r)| self.columns[**l] == other.columns[**r])
            .map(|(l, r)| (*l, *r))
            .collect();
        let folded_right: HashSet<usize> = coalesced.values().copied().collect();

        let pairs = self.match_rows(other, how, &left_keys, &right_keys);

        let right_kept: Vec<usize> = (0..other.num_columns())
            .filter(|c| !folded_right.contains(c))
            .collect();
        let left_names: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        let right_names: HashSet<&str> = right_kept
            .iter()
            .map(|&c| other.columns[c].as_str())
            .collect();

        let mut columns = Vec::with_capacity(self.num_columns() + right_kept.len());
        let mut data = Vec::with_capacity(columns.capacity());

        for (c, name) in self.columns.iter().enumerate() {
            let name = if right_names.contains(name.as_str()) {
                format!("{}_x", name)
            } else {
                name.clone()
            };
            let cells = pairs
                .iter()
                .map(|(l, r)| match (l, r, coalesced.get(&c)) {
                    (Some(l), _, _) => self.data[c][*l].clone(),
                    (None, Some(r), Some(rc)) => other.data[*rc][*r].clone(),
                    _ => None,
                })
                .collect();
            columns.push(name);
            data.push(cells);
        }
        for &c in &right_kept {
            let name = &other.columns[c];
            let name = if left_names.contains(name.as_str()) {
                format!("{}_y", name)
            } else {
                name.clone()
            };
            let cells = pairs
                .iter()
                .map(|(_, r)| r.and_then(|r| other.data[c][r].clone()))
                .collect();
            columns.push(name);
            data.push(cells);
        }

        Ok(Frame { columns, data })
    }

    fn match_rows(
        &self,
        other: &Frame,
        how: JoinKind,
        left_keys: &[usize],
        right_keys: &[usize],
    ) -> Vec<(Option<usize>, Option<usize>)> {
        let mut pairs = Vec::new();
        if how == JoinKind::Right {
            let index = self.key_index(left_keys);
            for r in 0..other.num_rows() {
                match other.key(r, right_keys).and_then(|k| index.get(&k)) {
                    Some(rows) => pairs.extend(rows.iter().map(|&l| (Some(l), Some(r)))),
                    None => pairs.push((None, Some(r))),
                }
            }
            return pairs;
        }

        let index = other.key_index(right_keys);
        let mut matched = vec![false; other.num_rows()];
        for l in 0..self.num_rows() {
            match self.key(l, left_keys).and_then(|k| index.get(&k)) {
                Some(rows) => {
                    for &r in rows {
                        matched[r] = true;
                        pairs.push((Some(l), Some(r)));
                    }
                }
                None if how != JoinKind::Inner => pairs.push((Some(l), None)),
                None => {}
            }
        }
        if how == JoinKind::Outer {
            pairs.extend(
                matched
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| !**m)
                    .map(|(r, _)| (None, Some(r))),
            );
        }
        pairs
    }
}

fn check_unique(columns: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for name in columns {
        if !seen.insert(name.as_str()) {
            return Err(Error::Execution(format!("duplicate column '{}'", name)));
        }
    }
    Ok(())
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |cell: &Cell| match cell {
            Some(v) => v.to_string(),
            None => "null".to_string(),
        };
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.len()).collect();
        for (i, col) in self.data.iter().enumerate() {
            for cell in col {
                widths[i] = widths[i].max(render(cell).len());
            }
        }
        for (i, name) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{:width$}", name, width = widths[i])?;
        }
        writeln!(f)?;
        for row in 0..self.num_rows() {
            for (i, col) in self.data.iter().enumerate() {
                if i > 0 {
                    f.write_str(" | ")?;
                }
                write!(f, "{:width$}", render(&col[row]), width = widths[i])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Column-by-column frame construction
#[derive(Debug, Default)]
pub struct FrameBuilder {
    columns: Vec<(String, Vec<Cell>)>,
}

impl FrameBuilder {
    /// Add a column with no nulls
    pub fn column<S, I, V>(mut self, name: S, values: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let cells = values.into_iter().map(|v| Some(v.into())).collect();
        self.columns.push((name.into(), cells));
        self
    }

    /// Add a column that may contain nulls
    pub fn nullable_column<S, I>(mut self, name: S, cells: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = Cell>,
    {
        self.columns.push((name.into(), cells.into_iter().collect()));
        self
    }

    pub fn build(self) -> Result<Frame> {
        Frame::from_columns(self.columns)
    }
}
