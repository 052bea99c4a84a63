//! Bottom-up evaluation and top-down route-count accumulation.
//!
//! # Evaluation
//!
//! Every visited node caches its value, so after a pass the whole graph
//! reflects the current leaf evidence:
//!
//! - **Leaf**: its evidence value, unchanged.
//! - **Product**: product of its children.
//! - **Sum**: `Σ w·child` in marginal mode, `max w·child` in max mode.
//!
//! # Route accumulation
//!
//! After a max-mode pass, [`Spn::accumulate_counts`] walks the most probable
//! route from the root: every child of a Product, and the single best child
//! of a Sum, whose link count is incremented.
//!
//! Both passes select the best Sum child with the same rule: the *first*
//! child attaining the maximum score wins, later equal scores do not replace
//! it. The accumulation recomputes scores from cached values, so it always
//! credits the child that won during evaluation.

use log::trace;

use crate::error::Result;
use crate::reference::NodeId;
use crate::spn::Spn;

/// Running arg-max keeping the first maximum.
#[derive(Debug, Copy, Clone)]
struct FirstMax {
    index: usize,
    score: f64,
}

impl FirstMax {
    fn offer(best: Option<Self>, index: usize, score: f64) -> Option<Self> {
        match best {
            Some(b) if !(score > b.score) => Some(b),
            _ => Some(FirstMax { index, score }),
        }
    }
}

impl Spn {
    /// Evaluates the graph at its root, in marginal (`max_mode = false`) or
    /// max mode.
    ///
    /// Leaf values must have been set beforehand.
    pub fn evaluate(&mut self, max_mode: bool) -> Result<f64> {
        let root = self.root()?;
        Ok(self.evaluate_node(root, max_mode))
    }

    /// Evaluates the subgraph under `id`, caching values on every visited node.
    pub fn evaluate_node(&mut self, id: NodeId, max_mode: bool) -> f64 {
        let node = self.node(id);
        if node.is_leaf() {
            return node.value();
        }

        let value = if node.is_product() {
            let mut value = 1.0;
            for i in 0..self.node(id).children().len() {
                let child = self.node(id).children()[i];
                value *= self.evaluate_node(child, max_mode);
            }
            value
        } else if max_mode {
            let mut best = None;
            for i in 0..self.node(id).links().len() {
                let link = self.node(id).links()[i];
                let score = link.weight * self.evaluate_node(link.child, true);
                best = FirstMax::offer(best, i, score);
            }
            best.map_or(0.0, |b| b.score)
        } else {
            let mut value = 0.0;
            for i in 0..self.node(id).links().len() {
                let link = self.node(id).links()[i];
                value += link.weight * self.evaluate_node(link.child, false);
            }
            value
        };

        trace!("evaluate({}, max_mode = {}) = {}", self.node(id).name(), max_mode, value);
        self.node_mut(id).set_value(value);
        value
    }

    /// Index into `links()` of the Sum child with the best cached score.
    pub(crate) fn best_cached_link(&self, sum: NodeId) -> Option<usize> {
        let mut best = None;
        for (i, link) in self.node(sum).links().iter().enumerate() {
            let score = self.node(link.child).value() * link.weight;
            best = FirstMax::offer(best, i, score);
        }
        best.map(|b| b.index)
    }

    /// Credits the most probable route found by the latest max-mode pass.
    ///
    /// Must follow [`evaluate(true)`][Spn::evaluate] on the same evidence.
    pub fn accumulate_counts(&mut self) -> Result<()> {
        let root = self.root()?;
        self.accumulate_node(root);
        Ok(())
    }

    pub(crate) fn accumulate_node(&mut self, id: NodeId) {
        let node = self.node(id);
        if node.is_leaf() {
            return;
        }
        if node.is_product() {
            for i in 0..self.node(id).children().len() {
                let child = self.node(id).children()[i];
                self.accumulate_node(child);
            }
            return;
        }
        if let Some(best) = self.best_cached_link(id) {
            let link = &mut self.node_mut(id).links_mut()[best];
            link.count += 1.0;
            let child = link.child;
            trace!("accumulate({}) -> {}", self.node(id).name(), self.node(child).name());
            self.accumulate_node(child);
        }
    }

    /// Sum of `ln P(row)` under marginal evaluation, using the indicator pair
    /// convention of [`set_evidence`][Spn::set_evidence].
    pub fn log_likelihood<S: AsRef<str>>(&mut self, variables: &[S], rows: &[Vec<bool>], suffix: &str) -> Result<f64> {
        self.check_indicators(variables, suffix)?;
        Spn::check_rows(variables.len(), rows)?;
        let root = self.root()?;
        let mut total = 0.0;
        for row in rows {
            self.set_evidence(variables, row, suffix)?;
            total += self.evaluate_node(root, false).ln();
        }
        Ok(total)
    }
}
