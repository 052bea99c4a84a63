//! Structure learning: growing an SPN from data.
//!
//! The learner recursively splits a [`Dataset`]:
//!
//! - **Row split**: the clusterer groups the rows (at least two clusters when
//!   there are enough rows); each group becomes a child of a new Sum node,
//!   weighted by its share of the rows.
//! - **Column split**: the clusterer groups the *columns* (rows of the
//!   transposed matrix); each group becomes a child of a new Product node.
//!   If the clusterer keeps all columns together, they are split in two
//!   halves instead.
//! - **Leaf**: a subset with a single column ends the recursion.
//!
//! The root is always a row split. Below it, [`SplitPolicy`] picks the mode.
//! Every call either strictly reduces the number of rows (a successful row
//! split) or strictly reduces the number of columns (a column split, which
//! is also the fallback when the rows cannot be split), so the recursion
//! terminates on any finite dataset.

use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::cluster::Clusterer;
use crate::data::{partition, Dataset};
use crate::error::{Result, SpnError};
use crate::reference::NodeId;
use crate::spn::Spn;

/// How the split mode is chosen below the root.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum SplitPolicy {
    /// Row and column splits alternate level by level.
    #[default]
    Alternate,
    /// Each call flips a fair coin.
    Random,
}

/// What a single-column subset turns into.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum LeafEncoding {
    /// One Leaf observing the column.
    #[default]
    Single,
    /// A Sum over the indicator pair `v` / `v` + suffix, weighted by the
    /// Laplace-smoothed frequency of `v` in the subset. Graphs learned this
    /// way can be trained with [`Spn::fit`] directly.
    Indicators,
}

#[derive(Debug, Clone)]
pub struct StructureConfig {
    pub policy: SplitPolicy,
    pub leaf_encoding: LeafEncoding,
    /// Suffix naming the negated indicator under [`LeafEncoding::Indicators`].
    pub negation_suffix: String,
    /// Seeds the random split policy and the Sum weights of the result.
    pub seed: u64,
    /// Row splits on fewer rows than this fall back to a column split.
    pub min_rows_for_row_split: usize,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            policy: SplitPolicy::Alternate,
            leaf_encoding: LeafEncoding::Single,
            negation_suffix: "_".to_string(),
            seed: 0,
            min_rows_for_row_split: 2,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Split {
    Rows,
    Columns,
}

struct Learner<'a, C: Clusterer> {
    spn: Spn,
    clusterer: &'a mut C,
    config: &'a StructureConfig,
    rng: ChaCha8Rng,
}

/// Learns an SPN over the columns of `data`.
pub fn learn_structure<C: Clusterer>(data: &Dataset, clusterer: &mut C, config: &StructureConfig) -> Result<Spn> {
    if data.n_rows() == 0 || data.n_cols() == 0 {
        return Err(SpnError::EmptyData {
            rows: data.n_rows(),
            cols: data.n_cols(),
        });
    }
    debug!(
        "learn_structure: {} rows, {} columns, {:?}",
        data.n_rows(),
        data.n_cols(),
        config.policy
    );
    let mut learner = Learner {
        spn: Spn::with_seed(config.seed),
        clusterer,
        config,
        rng: ChaCha8Rng::seed_from_u64(config.seed),
    };
    learner.build(data, Split::Rows, 0)?;
    debug!("learn_structure: {:?}", learner.spn);
    Ok(learner.spn)
}

impl Spn {
    /// See [`learn_structure`].
    pub fn learn<C: Clusterer>(data: &Dataset, clusterer: &mut C, config: &StructureConfig) -> Result<Spn> {
        learn_structure(data, clusterer, config)
    }
}

impl<C: Clusterer> Learner<'_, C> {
    fn next_split(&mut self, after: Split) -> Split {
        match self.config.policy {
            SplitPolicy::Alternate => match after {
                Split::Rows => Split::Columns,
                Split::Columns => Split::Rows,
            },
            SplitPolicy::Random => {
                if self.rng.gen_bool(0.5) {
                    Split::Rows
                } else {
                    Split::Columns
                }
            }
        }
    }

    fn build(&mut self, data: &Dataset, split: Split, depth: usize) -> Result<NodeId> {
        if data.n_cols() == 1 {
            return self.leaf(data);
        }
        if split == Split::Rows {
            if let Some(id) = self.split_rows(data, depth)? {
                return Ok(id);
            }
        }
        self.split_columns(data, depth)
    }

    /// Returns `None` when the rows cannot be split in two or more groups.
    fn split_rows(&mut self, data: &Dataset, depth: usize) -> Result<Option<NodeId>> {
        if data.n_rows() < self.config.min_rows_for_row_split.max(2) {
            return Ok(None);
        }
        let labels = self.clusterer.cluster(data.rows(), 2);
        check_labels(&labels, data.n_rows())?;
        let groups = partition(&labels);
        if groups.len() < 2 {
            debug!("depth {}: rows did not split, trying columns", depth);
            return Ok(None);
        }
        debug!(
            "depth {}: row split {} rows -> {:?}",
            depth,
            data.n_rows(),
            groups.iter().map(Vec::len).collect::<Vec<_>>()
        );

        let total = data.n_rows() as f64;
        let mut weighted = Vec::with_capacity(groups.len());
        for group in &groups {
            let split = self.next_split(Split::Rows);
            let child = self.build(&data.select_rows(group), split, depth + 1)?;
            weighted.push((child, group.len() as f64 / total));
        }
        self.spn.mk_sum_with_weights(&weighted).map(Some)
    }

    fn split_columns(&mut self, data: &Dataset, depth: usize) -> Result<NodeId> {
        let labels = self.clusterer.cluster(&data.transpose(), 1);
        check_labels(&labels, data.n_cols())?;
        let mut groups = partition(&labels);
        if groups.len() < 2 {
            warn!(
                "depth {}: columns {:?} did not split, forcing two halves",
                depth,
                data.column_names()
            );
            let columns: Vec<usize> = (0..data.n_cols()).collect();
            let (left, right) = columns.split_at(columns.len() / 2);
            groups = vec![left.to_vec(), right.to_vec()];
        }
        debug!(
            "depth {}: column split {:?} -> {} groups",
            depth,
            data.column_names(),
            groups.len()
        );

        let mut children = Vec::with_capacity(groups.len());
        for group in &groups {
            let split = self.next_split(Split::Columns);
            children.push(self.build(&data.select_columns(group), split, depth + 1)?);
        }
        self.spn.mk_product(&children)
    }

    fn leaf(&mut self, data: &Dataset) -> Result<NodeId> {
        let variable = &data.column_names()[0];
        match self.config.leaf_encoding {
            LeafEncoding::Single => self.spn.mk_leaf(variable),
            LeafEncoding::Indicators => {
                let ones = data.column(0).iter().filter(|&&v| v > 0.5).count() as f64;
                let p = (ones + 1.0) / (data.n_rows() as f64 + 2.0);
                let pos = self.spn.mk_leaf(variable)?;
                let neg = self.spn.mk_leaf(&format!("{}{}", variable, self.config.negation_suffix))?;
                self.spn.mk_sum_with_weights(&[(pos, p), (neg, 1.0 - p)])
            }
        }
    }
}

/// A clusterer must label every observation exactly once.
fn check_labels(labels: &[usize], expected: usize) -> Result<()> {
    if labels.len() != expected {
        return Err(SpnError::ClusterLabels {
            expected,
            found: labels.len(),
        });
    }
    Ok(())
}
