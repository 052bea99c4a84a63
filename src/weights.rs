//! Hard-EM weight learning.
//!
//! Each epoch sets the evidence of every training row, runs a max-mode pass
//! and credits the most probable route ([`Spn::accumulate_counts`]). At the
//! end of the epoch the counts of every Sum node are turned into weights:
//!
//! ```text
//! w_c = count_c / Σ count
//! ```
//!
//! A Sum node whose links were never credited has `Σ count = 0`; what
//! happens to it is decided by [`DegeneratePolicy`].

use log::{debug, warn};

use crate::bitset::BitSet;
use crate::error::{Result, SpnError};
use crate::reference::NodeId;
use crate::spn::Spn;

/// What to do with a Sum node that received no counts during an epoch.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum DegeneratePolicy {
    /// Set all of its weights to zero. The node then contributes nothing to
    /// its ancestors, which can zero out the whole model if it lies on every
    /// route from the root.
    #[default]
    Zero,
    /// Keep its current weights and only reset the counts.
    Preserve,
}

/// Options for [`Spn::fit`].
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    /// Suffix naming the negated indicator of a variable (`x1` -> `x1_`).
    pub negation_suffix: String,
    pub degenerate: DegeneratePolicy,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            negation_suffix: "_".to_string(),
            degenerate: DegeneratePolicy::Zero,
        }
    }
}

impl Spn {
    /// Turns the link counts of one Sum node into weights and resets the
    /// counts. Returns `true` if the node had no counts at all.
    pub fn normalize_node_counts(&mut self, sum: NodeId, policy: DegeneratePolicy) -> Result<bool> {
        let node = self.get(sum).ok_or(SpnError::UnknownNode { id: sum })?;
        if !node.is_sum() {
            return Err(SpnError::NotASum {
                name: node.name().to_string(),
            });
        }
        let links = self.node_mut(sum).links_mut();
        let total: f64 = links.iter().map(|l| l.count).sum();
        let degenerate = total == 0.0;
        for link in links.iter_mut() {
            if !degenerate {
                link.weight = link.count / total;
            } else if policy == DegeneratePolicy::Zero {
                link.weight = 0.0;
            }
            link.count = 0.0;
        }
        Ok(degenerate)
    }

    /// Normalises the counts of every Sum node reachable from the root, each
    /// node exactly once. Returns the number of degenerate (uncredited) nodes.
    pub fn normalize_counts(&mut self, policy: DegeneratePolicy) -> Result<usize> {
        let root = self.root()?;
        let mut visited = BitSet::new(self.len());
        let mut stack = vec![root];
        let mut degenerate = 0;

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            stack.extend(self.node(id).children().iter().rev());
            if self.node(id).is_sum() && self.normalize_node_counts(id, policy)? {
                warn!("sum node {} received no counts, policy {:?}", self.node(id).name(), policy);
                degenerate += 1;
            }
        }

        debug!("normalize_counts: {} nodes visited, {} degenerate", visited.len(), degenerate);
        Ok(degenerate)
    }

    /// Learns Sum weights from boolean rows with hard EM.
    ///
    /// Every variable must be observed by a positive leaf `v` and a negated
    /// leaf `v` + `config.negation_suffix`; this is checked before the first
    /// epoch. Returns, per epoch, the sum over rows of `ln` of the max-mode
    /// root value computed with that epoch's starting weights.
    pub fn fit<S: AsRef<str>>(&mut self, variables: &[S], rows: &[Vec<bool>], config: &TrainConfig) -> Result<Vec<f64>> {
        let suffix = config.negation_suffix.as_str();
        self.check_indicators(variables, suffix)?;
        Spn::check_rows(variables.len(), rows)?;
        let root = self.root()?;

        let mut scores = Vec::with_capacity(config.epochs);
        for epoch in 0..config.epochs {
            let mut score = 0.0;
            for row in rows {
                self.set_evidence(variables, row, suffix)?;
                score += self.evaluate_node(root, true).ln();
                self.accumulate_node(root);
            }
            let degenerate = self.normalize_counts(config.degenerate)?;
            debug!(
                "fit: epoch {}/{}, map score {:.6}, {} degenerate sum nodes",
                epoch + 1,
                config.epochs,
                score,
                degenerate
            );
            scores.push(score);
        }
        Ok(scores)
    }
}
