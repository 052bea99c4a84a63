//! # spn-rs: Sum-Product Networks in Rust
//!
//! **`spn-rs`** is a small, manager-centric library for building, evaluating,
//! training and learning **Sum-Product Networks (SPNs)** over binary variables.
//!
//! ## What is an SPN?
//!
//! A Sum-Product Network is a rooted directed acyclic graph whose leaves are
//! indicators of variables and whose internal nodes are either weighted sums
//! (mixtures) or products (factorisations). Evaluated bottom-up, it yields
//! the probability of the evidence placed on its leaves. Replacing sums by
//! maxima yields the most probable explanation, which drives hard-EM training.
//!
//! ## Key Features
//!
//! - **Manager-Centric Architecture**: All nodes live in one [`Spn`][crate::spn::Spn]
//!   and are addressed by [`NodeId`][crate::reference::NodeId] handles.
//!   Children are created before parents, so the graph is acyclic by construction.
//! - **Marginal and Max Evaluation**: one bottom-up pass, with per-node value caching.
//! - **Hard EM**: route-count accumulation along the most probable route, then
//!   graph-wide count normalisation ([`Spn::fit`][crate::spn::Spn::fit]).
//! - **Structure Learning**: recursive row/column splitting driven by a
//!   pluggable [`Clusterer`][crate::cluster::Clusterer], with a Gaussian
//!   mixture oracle selected by BIC.
//! - **Persistence**: a plain-text, bottom-up node file format.
//!
//! ## Basic Usage
//!
//! ```rust
//! use spn_rs::spn::Spn;
//! use spn_rs::weights::TrainConfig;
//!
//! let mut spn = Spn::with_seed(7);
//!
//! // Indicator pair for one variable: `x` and its negation `x_`.
//! let x = spn.add_leaf("x").unwrap();
//! let x_ = spn.add_leaf("x_").unwrap();
//! let s = spn.add_sum("s", &[x, x_]).unwrap();
//!
//! // Hard EM on observations of x.
//! let rows = vec![vec![true], vec![true], vec![true], vec![false]];
//! spn.fit(&["x"], &rows, &TrainConfig::default()).unwrap();
//! assert_eq!(spn.weight(s, x), Some(0.75));
//!
//! // P(x = true)
//! spn.set_evidence(&["x"], &[true], "_").unwrap();
//! assert_eq!(spn.evaluate(false).unwrap(), 0.75);
//! ```
//!
//! ## Core Components
//!
//! - **[`spn`]**: the [`Spn`][crate::spn::Spn] manager, construction and evidence.
//! - **[`eval`]**: marginal and max evaluation, route accumulation.
//! - **[`weights`]**: count normalisation and hard-EM training.
//! - **[`structure`]**: structure learning from a [`Dataset`][crate::data::Dataset].
//! - **[`cluster`]**: the clustering oracle.
//! - **[`io`]**: saving and loading graphs.

mod bitset;
pub mod cluster;
pub mod data;
pub mod error;
pub mod eval;
pub mod io;
pub mod node;
pub mod reference;
pub mod spn;
pub mod structure;
pub mod weights;

pub use error::{Result, SpnError};
pub use reference::NodeId;
pub use spn::Spn;
