//! Error types for SPN construction, evaluation and learning.
//!
//! Structural problems (no root, dangling handles, bad weights) and training
//! configuration problems (missing negated leaves, ragged rows) are reported
//! as [`SpnError`] values, so callers can match on them.

use std::io;

use thiserror::Error;

use crate::reference::NodeId;

/// Errors produced by the `spn-rs` crate.
#[derive(Debug, Error)]
pub enum SpnError {
    /// No node in the graph is parentless.
    #[error("graph has no root (no node without parents)")]
    NoRoot,

    /// More than one node in the graph is parentless.
    #[error("graph has {} roots: {}", roots.len(), roots.join(", "))]
    MultipleRoots { roots: Vec<String> },

    /// A node name is already taken in this graph.
    #[error("duplicate node name: '{name}'")]
    DuplicateName { name: String },

    /// A node name is empty or contains whitespace.
    #[error("invalid node name: '{name}'")]
    InvalidName { name: String },

    /// A handle does not point into this graph.
    #[error("unknown node: {id}")]
    UnknownNode { id: NodeId },

    /// No leaf observes the given variable.
    #[error("no leaf for variable '{name}'")]
    UnknownLeaf { name: String },

    /// An internal node was requested without children.
    #[error("node '{name}' must have at least one child")]
    EmptyChildren { name: String },

    /// The same child was listed twice under one parent.
    #[error("node '{name}' lists child {child} more than once")]
    DuplicateChild { name: String, child: NodeId },

    /// A weight operation targeted a non-Sum node.
    #[error("node '{name}' is not a sum node")]
    NotASum { name: String },

    /// A weight was negative or not finite, or all weights were zero.
    #[error("invalid weight for '{name}': {reason}")]
    InvalidWeight { name: String, reason: String },

    /// A training variable has no negated indicator leaf.
    #[error("variable '{variable}' has no negated leaf '{expected}'")]
    MissingNegation { variable: String, expected: String },

    /// A variable is listed more than once for training or evidence.
    #[error("variable '{variable}' is listed more than once")]
    DuplicateVariable { variable: String },

    /// The negated indicator of one listed variable is itself listed.
    #[error("negated indicator '{negated}' of '{variable}' is also listed as a variable")]
    IndicatorCollision { variable: String, negated: String },

    /// Two dataset columns share a name.
    #[error("duplicate column name: '{name}'")]
    DuplicateColumn { name: String },

    /// A clusterer returned the wrong number of labels.
    #[error("clusterer returned {found} labels for {expected} observations")]
    ClusterLabels { expected: usize, found: usize },

    /// A training or data row has the wrong number of entries.
    #[error("row {row} has {found} values, expected {expected}")]
    RowLength { row: usize, expected: usize, found: usize },

    /// Structure learning was given no rows or no columns.
    #[error("dataset is empty ({rows} rows, {cols} columns)")]
    EmptyData { rows: usize, cols: usize },

    /// Malformed serialized graph.
    #[error("parse error: {0}")]
    Parse(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, SpnError>;
