//! A small tabular container with named columns.
//!
//! Structure learning only needs to slice a matrix by rows and columns, group
//! rows by cluster label, and hand the matrix (or its transpose) to a
//! [`Clusterer`][crate::cluster::Clusterer].

use std::collections::HashSet;

use crate::error::{Result, SpnError};

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    /// Row-major values, every row `columns.len()` long.
    rows: Vec<Vec<f64>>,
}

impl Dataset {
    /// Column names must be distinct: each one names a variable.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let duplicate = {
            let mut seen = HashSet::with_capacity(columns.len());
            columns.iter().find(|c| !seen.insert(c.as_str())).cloned()
        };
        if let Some(name) = duplicate {
            return Err(SpnError::DuplicateColumn { name });
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(SpnError::RowLength {
                row: i,
                expected: columns.len(),
                found: row.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Builds a 0/1 dataset from boolean rows.
    pub fn from_bools<S: AsRef<str>>(columns: &[S], rows: &[Vec<bool>]) -> Result<Self> {
        let columns = columns.iter().map(|c| c.as_ref().to_string()).collect();
        let rows = rows
            .iter()
            .map(|r| r.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect())
            .collect();
        Self::new(columns, rows)
    }

    /// Parses comma-separated text: a header line of column names, then one
    /// line of numbers per row. Blank lines and lines starting with `#` are
    /// skipped.
    pub fn from_csv_str(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        let header = lines.next().ok_or_else(|| SpnError::Parse("missing header".into()))?;
        let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();

        let mut rows = Vec::new();
        for (i, line) in lines.enumerate() {
            let row = line
                .split(',')
                .map(|v| {
                    v.trim()
                        .parse::<f64>()
                        .map_err(|_| SpnError::Parse(format!("invalid number '{}' in row {}", v.trim(), i)))
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push(row);
        }
        Self::new(columns, rows)
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[j]).collect()
    }

    /// Rows as booleans (`value > 0.5`).
    pub fn bool_rows(&self) -> Vec<Vec<bool>> {
        self.rows
            .iter()
            .map(|r| r.iter().map(|&v| v > 0.5).collect())
            .collect()
    }

    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    pub fn select_columns(&self, indices: &[usize]) -> Self {
        Self {
            columns: indices.iter().map(|&j| self.columns[j].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| indices.iter().map(|&j| r[j]).collect())
                .collect(),
        }
    }

    /// Columns as observations: `n_cols` vectors of length `n_rows`.
    pub fn transpose(&self) -> Vec<Vec<f64>> {
        (0..self.n_cols()).map(|j| self.column(j)).collect()
    }
}

/// Groups indices `0..labels.len()` by label, in increasing label order.
/// Labels without members produce no group.
pub fn partition(labels: &[usize]) -> Vec<Vec<usize>> {
    let k = labels.iter().max().map_or(0, |&m| m + 1);
    let mut groups = vec![Vec::new(); k];
    for (i, &label) in labels.iter().enumerate() {
        groups[label].push(i);
    }
    groups.retain(|g| !g.is_empty());
    groups
}
