use std::fmt::{Display, Formatter};

use crate::reference::NodeId;

/// An edge record on a Sum node: the learnable weight of one child together
/// with the number of times that child was on the most probable route during
/// the current training epoch.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Link {
    pub child: NodeId,
    pub weight: f64,
    pub count: f64,
}

impl Link {
    pub fn new(child: NodeId, weight: f64) -> Self {
        Self {
            child,
            weight,
            count: 0.0,
        }
    }
}

/// The closed set of node variants.
///
/// # Semantics
///
/// ```text
/// Leaf(v)        = current evidence value of v
/// Product(c..)   = Π value(c)
/// Sum(c.., w..)  = Σ w_c · value(c)      (marginal mode)
///                = max w_c · value(c)    (max mode)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Indicator of a variable (or of its negation). Has no children.
    Leaf { variable: String },
    /// Unweighted factorisation over disjoint scopes.
    Product,
    /// Weighted mixture. `links[i].child == children[i]` for every `i`.
    Sum { links: Vec<Link> },
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Leaf { .. } => "LEAF",
            NodeKind::Product => "PRODUCT",
            NodeKind::Sum { .. } => "SUM",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    kind: NodeKind,
    children: Vec<NodeId>,
    parents: Vec<NodeId>,
    /// Leaf: the evidence value. Internal: value from the latest evaluation.
    value: f64,
}

impl Node {
    pub(crate) fn leaf(name: String, variable: String, value: f64) -> Self {
        Self {
            name,
            kind: NodeKind::Leaf { variable },
            children: Vec::new(),
            parents: Vec::new(),
            value,
        }
    }

    pub(crate) fn product(name: String, children: Vec<NodeId>) -> Self {
        Self {
            name,
            kind: NodeKind::Product,
            children,
            parents: Vec::new(),
            value: 0.0,
        }
    }

    pub(crate) fn sum(name: String, links: Vec<Link>) -> Self {
        let children = links.iter().map(|l| l.child).collect();
        Self {
            name,
            kind: NodeKind::Sum { links },
            children,
            parents: Vec::new(),
            value: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }
    pub fn is_product(&self) -> bool {
        matches!(self.kind, NodeKind::Product)
    }
    pub fn is_sum(&self) -> bool {
        matches!(self.kind, NodeKind::Sum { .. })
    }
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// The variable a leaf observes, `None` for internal nodes.
    pub fn variable(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Leaf { variable } => Some(variable),
            _ => None,
        }
    }

    /// Outgoing links of a Sum node; empty for other variants.
    pub fn links(&self) -> &[Link] {
        match &self.kind {
            NodeKind::Sum { links } => links,
            _ => &[],
        }
    }

    pub fn link(&self, child: NodeId) -> Option<&Link> {
        self.links().iter().find(|l| l.child == child)
    }

    pub(crate) fn links_mut(&mut self) -> &mut [Link] {
        match &mut self.kind {
            NodeKind::Sum { links } => links,
            _ => &mut [],
        }
    }

    pub(crate) fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    pub(crate) fn add_parent(&mut self, parent: NodeId) {
        self.parents.push(parent);
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} node {}", self.kind.type_name(), self.name)
    }
}
