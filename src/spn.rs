//! The SPN manager: node arena, naming and construction.
//!
//! All nodes live in one [`Spn`] and are addressed by [`NodeId`] handles.
//! Children are always created before their parents, so the arena order is a
//! topological order and cycles cannot be built.
//!
//! # Example
//!
//! ```
//! use spn_rs::spn::Spn;
//!
//! let mut spn = Spn::with_seed(42);
//! let x = spn.add_leaf("x").unwrap();
//! let x_ = spn.add_leaf("x_").unwrap();
//! let s = spn.add_sum_with_weights("s", &[(x, 0.8), (x_, 0.2)]).unwrap();
//!
//! spn.update_leaf("x", 1.0).unwrap();
//! spn.update_leaf("x_", 0.0).unwrap();
//! assert_eq!(spn.root().unwrap(), s);
//! assert!((spn.evaluate(false).unwrap() - 0.8).abs() < 1e-12);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Debug;

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{Result, SpnError};
use crate::node::{Link, Node, NodeKind};
use crate::reference::NodeId;

/// Per-variant counters for generated node names.
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    leaves: u32,
    products: u32,
    sums: u32,
}

pub struct Spn {
    nodes: Vec<Node>,
    names: HashMap<String, NodeId>,
    /// Variable name -> every leaf observing it.
    leaves: HashMap<String, Vec<NodeId>>,
    counters: Counters,
    rng: ChaCha8Rng,
}

impl Spn {
    /// Creates an empty graph whose random Sum weights come from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            names: HashMap::new(),
            leaves: HashMap::new(),
            counters: Counters::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Default for Spn {
    fn default() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            ..Spn::with_seed(0)
        }
    }
}

impl Debug for Spn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spn")
            .field("nodes", &self.nodes.len())
            .field("leaves", &self.counters.leaves)
            .field("products", &self.counters.products)
            .field("sums", &self.counters.sums)
            .finish()
    }
}

// Access
impl Spn {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the node behind `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn node(&self, id: NodeId) -> &Node {
        assert!(id.index() < self.nodes.len(), "Node {} is not in this graph", id);
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        assert!(id.index() < self.nodes.len(), "Node {} is not in this graph", id);
        &mut self.nodes[id.index()]
    }

    /// Iterates over all nodes in creation (topological) order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId::new(i as u32), n))
    }

    pub fn sum_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes().filter(|(_, n)| n.is_sum()).map(|(id, _)| id)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Every leaf observing `variable`.
    pub fn leaves_of(&self, variable: &str) -> &[NodeId] {
        self.leaves.get(variable).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of all observed variables, sorted.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.leaves.keys().map(String::as_str).collect();
        vars.sort_unstable();
        vars
    }

    /// Returns the unique parentless node.
    pub fn root(&self) -> Result<NodeId> {
        let mut roots = self.nodes().filter(|(_, n)| n.is_root()).map(|(id, _)| id);
        let root = roots.next().ok_or(SpnError::NoRoot)?;
        let rest: Vec<NodeId> = roots.collect();
        if !rest.is_empty() {
            let roots = std::iter::once(root)
                .chain(rest)
                .map(|id| self.node(id).name().to_string())
                .collect();
            return Err(SpnError::MultipleRoots { roots });
        }
        Ok(root)
    }

    /// The set of variables the subgraph under `id` depends on.
    pub fn scope(&self, id: NodeId) -> BTreeSet<String> {
        let mut scopes: Vec<Option<BTreeSet<String>>> = vec![None; id.index() + 1];
        self.scope_rec(id, &mut scopes)
    }

    fn scope_rec(&self, id: NodeId, scopes: &mut [Option<BTreeSet<String>>]) -> BTreeSet<String> {
        if let Some(scope) = &scopes[id.index()] {
            return scope.clone();
        }
        let node = self.node(id);
        let scope = match node.variable() {
            Some(variable) => BTreeSet::from([variable.to_string()]),
            None => node
                .children()
                .iter()
                .flat_map(|&c| self.scope_rec(c, scopes))
                .collect(),
        };
        scopes[id.index()] = Some(scope.clone());
        scope
    }

    fn check(&self, id: NodeId) -> Result<()> {
        if id.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(SpnError::UnknownNode { id })
        }
    }
}

// Construction
impl Spn {
    fn check_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(SpnError::InvalidName { name: name.to_string() });
        }
        if self.names.contains_key(name) {
            return Err(SpnError::DuplicateName { name: name.to_string() });
        }
        Ok(())
    }

    fn check_children(&self, name: &str, children: &[NodeId]) -> Result<()> {
        if children.is_empty() {
            return Err(SpnError::EmptyChildren { name: name.to_string() });
        }
        for (i, &child) in children.iter().enumerate() {
            self.check(child)?;
            if children[..i].contains(&child) {
                return Err(SpnError::DuplicateChild {
                    name: name.to_string(),
                    child,
                });
            }
        }
        Ok(())
    }

    fn fresh_name(&self, prefix: &str, mut counter: u32) -> String {
        loop {
            let name = format!("{}{}", prefix, counter);
            if !self.names.contains_key(&name) {
                return name;
            }
            counter += 1;
        }
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        for &child in node.children() {
            self.nodes[child.index()].add_parent(id);
        }
        match node.kind() {
            NodeKind::Leaf { variable } => {
                self.counters.leaves += 1;
                self.leaves.entry(variable.clone()).or_default().push(id);
            }
            NodeKind::Product => self.counters.products += 1,
            NodeKind::Sum { .. } => self.counters.sums += 1,
        }
        debug!("insert({} = {})", id, node);
        self.names.insert(node.name().to_string(), id);
        self.nodes.push(node);
        id
    }

    /// Adds a leaf named `name` that observes the variable of the same name.
    ///
    /// Leaves start with value 1.0.
    pub fn add_leaf(&mut self, name: &str) -> Result<NodeId> {
        self.check_name(name)?;
        Ok(self.insert(Node::leaf(name.to_string(), name.to_string(), 1.0)))
    }

    /// Adds a leaf observing `variable` under a generated name.
    pub fn mk_leaf(&mut self, variable: &str) -> Result<NodeId> {
        if variable.is_empty() || variable.chars().any(char::is_whitespace) {
            return Err(SpnError::InvalidName { name: variable.to_string() });
        }
        let name = self.fresh_name("leaf", self.counters.leaves);
        Ok(self.insert(Node::leaf(name, variable.to_string(), 1.0)))
    }

    pub fn add_product(&mut self, name: &str, children: &[NodeId]) -> Result<NodeId> {
        self.check_name(name)?;
        self.check_children(name, children)?;
        Ok(self.insert(Node::product(name.to_string(), children.to_vec())))
    }

    pub fn mk_product(&mut self, children: &[NodeId]) -> Result<NodeId> {
        let name = self.fresh_name("prod", self.counters.products);
        self.add_product(&name, children)
    }

    /// Adds a Sum node with random positive weights normalised to 1.
    pub fn add_sum(&mut self, name: &str, children: &[NodeId]) -> Result<NodeId> {
        self.check_name(name)?;
        self.check_children(name, children)?;
        // Uniform over (0, 1], never zero.
        let weighted: Vec<(NodeId, f64)> = children
            .iter()
            .map(|&c| (c, 1.0 - self.rng.gen::<f64>()))
            .collect();
        self.add_sum_with_weights(name, &weighted)
    }

    pub fn mk_sum(&mut self, children: &[NodeId]) -> Result<NodeId> {
        let name = self.fresh_name("sum", self.counters.sums);
        self.add_sum(&name, children)
    }

    /// Adds a Sum node with the given (non-negative, not all zero) weights,
    /// normalised to sum to 1.
    pub fn add_sum_with_weights(&mut self, name: &str, weighted: &[(NodeId, f64)]) -> Result<NodeId> {
        self.check_name(name)?;
        let children: Vec<NodeId> = weighted.iter().map(|&(c, _)| c).collect();
        self.check_children(name, &children)?;
        let weights: Vec<f64> = weighted.iter().map(|&(_, w)| w).collect();
        let weights = normalized(name, &weights)?;
        let links = children
            .into_iter()
            .zip(weights)
            .map(|(c, w)| Link::new(c, w))
            .collect();
        Ok(self.insert(Node::sum(name.to_string(), links)))
    }

    pub fn mk_sum_with_weights(&mut self, weighted: &[(NodeId, f64)]) -> Result<NodeId> {
        let name = self.fresh_name("sum", self.counters.sums);
        self.add_sum_with_weights(&name, weighted)
    }

    /// Inserts a Sum node with weights taken verbatim (used when restoring a
    /// saved graph, where weights may legitimately be all zero).
    pub(crate) fn add_sum_raw(&mut self, name: &str, links: Vec<Link>) -> Result<NodeId> {
        self.check_name(name)?;
        let children: Vec<NodeId> = links.iter().map(|l| l.child).collect();
        self.check_children(name, &children)?;
        if let Some(bad) = links.iter().find(|l| !l.weight.is_finite() || l.weight < 0.0) {
            return Err(SpnError::InvalidWeight {
                name: name.to_string(),
                reason: format!("weight {} is not a finite non-negative number", bad.weight),
            });
        }
        Ok(self.insert(Node::sum(name.to_string(), links)))
    }

    pub(crate) fn add_leaf_raw(&mut self, name: &str, variable: &str, value: f64) -> Result<NodeId> {
        self.check_name(name)?;
        Ok(self.insert(Node::leaf(name.to_string(), variable.to_string(), value)))
    }
}

fn normalized(name: &str, weights: &[f64]) -> Result<Vec<f64>> {
    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(SpnError::InvalidWeight {
            name: name.to_string(),
            reason: format!("weight {} is not a finite non-negative number", bad),
        });
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(SpnError::InvalidWeight {
            name: name.to_string(),
            reason: "weights sum to zero".to_string(),
        });
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

// Weights and evidence
impl Spn {
    fn sum_links_mut(&mut self, sum: NodeId) -> Result<&mut [Link]> {
        self.check(sum)?;
        let node = self.node_mut(sum);
        if !node.is_sum() {
            return Err(SpnError::NotASum {
                name: node.name().to_string(),
            });
        }
        Ok(node.links_mut())
    }

    /// Weight of the link `sum -> child`, if such a link exists.
    pub fn weight(&self, sum: NodeId, child: NodeId) -> Option<f64> {
        self.get(sum)?.link(child).map(|l| l.weight)
    }

    /// Route count of the link `sum -> child`, if such a link exists.
    pub fn count(&self, sum: NodeId, child: NodeId) -> Option<f64> {
        self.get(sum)?.link(child).map(|l| l.count)
    }

    /// Overwrites one link weight. The node's weights are not renormalised;
    /// call [`normalize_weights`][Spn::normalize_weights] when done.
    pub fn set_weight(&mut self, sum: NodeId, child: NodeId, weight: f64) -> Result<()> {
        self.check(sum)?;
        let name = self.node(sum).name().to_string();
        if !weight.is_finite() || weight < 0.0 {
            return Err(SpnError::InvalidWeight {
                name,
                reason: format!("weight {} is not a finite non-negative number", weight),
            });
        }
        let link = self
            .sum_links_mut(sum)?
            .iter_mut()
            .find(|l| l.child == child)
            .ok_or(SpnError::UnknownNode { id: child })?;
        link.weight = weight;
        Ok(())
    }

    /// Rescales the weights of one Sum node to sum to 1.
    pub fn normalize_weights(&mut self, sum: NodeId) -> Result<()> {
        self.check(sum)?;
        let name = self.node(sum).name().to_string();
        let links = self.sum_links_mut(sum)?;
        let weights: Vec<f64> = links.iter().map(|l| l.weight).collect();
        for (link, w) in links.iter_mut().zip(normalized(&name, &weights)?) {
            link.weight = w;
        }
        Ok(())
    }

    /// Sets the value of every leaf observing `variable`.
    pub fn update_leaf(&mut self, variable: &str, value: f64) -> Result<()> {
        let ids = self.leaves.get(variable).ok_or_else(|| SpnError::UnknownLeaf {
            name: variable.to_string(),
        })?;
        for &id in ids {
            self.nodes[id.index()].set_value(value);
        }
        Ok(())
    }

    /// Checks that every variable has both its positive leaf and its negated
    /// counterpart (`variable` + `suffix`), that no variable is listed twice,
    /// and that no listed variable is the negated indicator of another.
    pub fn check_indicators<S: AsRef<str>>(&self, variables: &[S], suffix: &str) -> Result<()> {
        let mut listed: HashSet<&str> = HashSet::with_capacity(variables.len());
        for variable in variables {
            let variable = variable.as_ref();
            if !listed.insert(variable) {
                return Err(SpnError::DuplicateVariable {
                    variable: variable.to_string(),
                });
            }
        }
        for variable in variables {
            let variable = variable.as_ref();
            let negated = format!("{}{}", variable, suffix);
            if negated != variable && listed.contains(negated.as_str()) {
                return Err(SpnError::IndicatorCollision {
                    variable: variable.to_string(),
                    negated,
                });
            }
        }
        for variable in variables {
            let variable = variable.as_ref();
            if self.leaves_of(variable).is_empty() {
                return Err(SpnError::UnknownLeaf {
                    name: variable.to_string(),
                });
            }
            let negated = format!("{}{}", variable, suffix);
            if negated == variable || self.leaves_of(&negated).is_empty() {
                return Err(SpnError::MissingNegation {
                    variable: variable.to_string(),
                    expected: negated,
                });
            }
        }
        Ok(())
    }

    /// Checks that every row has one value per variable.
    pub(crate) fn check_rows(n_variables: usize, rows: &[Vec<bool>]) -> Result<()> {
        match rows.iter().enumerate().find(|(_, r)| r.len() != n_variables) {
            Some((i, row)) => Err(SpnError::RowLength {
                row: i,
                expected: n_variables,
                found: row.len(),
            }),
            None => Ok(()),
        }
    }

    /// Sets the indicator pair of each variable from a boolean row:
    /// `true` gives `(v, v̄) = (1, 0)`, `false` gives `(0, 1)`.
    pub fn set_evidence<S: AsRef<str>>(&mut self, variables: &[S], row: &[bool], suffix: &str) -> Result<()> {
        if row.len() != variables.len() {
            return Err(SpnError::RowLength {
                row: 0,
                expected: variables.len(),
                found: row.len(),
            });
        }
        for (variable, &observed) in variables.iter().zip(row) {
            let variable = variable.as_ref();
            let (pos, neg) = if observed { (1.0, 0.0) } else { (0.0, 1.0) };
            self.update_leaf(variable, pos)?;
            self.update_leaf(&format!("{}{}", variable, suffix), neg)?;
        }
        Ok(())
    }

    /// Sums `variable` out by setting both of its indicators to 1.
    pub fn marginalize(&mut self, variable: &str, suffix: &str) -> Result<()> {
        self.update_leaf(variable, 1.0)?;
        self.update_leaf(&format!("{}{}", variable, suffix), 1.0)
    }

    /// Renders the subgraph under `id` as a nested bracket expression,
    /// e.g. `s5(0.35*p1(s1(..) s3(..)) 0.65*p2(..))`.
    pub fn to_bracket_string(&self, id: NodeId) -> String {
        let node = self.node(id);
        match node.kind() {
            NodeKind::Leaf { .. } => node.name().to_string(),
            NodeKind::Product => {
                let inner: Vec<String> = node.children().iter().map(|&c| self.to_bracket_string(c)).collect();
                format!("{}({})", node.name(), inner.join(" "))
            }
            NodeKind::Sum { links } => {
                let inner: Vec<String> = links
                    .iter()
                    .map(|l| format!("{}*{}", l.weight, self.to_bracket_string(l.child)))
                    .collect();
                format!("{}({})", node.name(), inner.join(" "))
            }
        }
    }
}
