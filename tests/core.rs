//! Core tests for the SPN library.
//!
//! Tests cover graph construction, evaluation, hard-EM training, structure
//! learning and persistence through the public API.

use std::collections::BTreeSet;

use spn_rs::cluster::{Clusterer, GaussianMixture};
use spn_rs::data::Dataset;
use spn_rs::structure::{LeafEncoding, SplitPolicy, StructureConfig};
use spn_rs::weights::{DegeneratePolicy, TrainConfig};
use spn_rs::{NodeId, Spn, SpnError};

const EPS: f64 = 1e-12;

/// The fixed two-variable network, leaf evidence `x1 = 1, x2 = 0`.
fn literal() -> Spn {
    let mut spn = Spn::with_seed(0);
    let x1 = spn.add_leaf("x1").unwrap();
    let x1_ = spn.add_leaf("x1_").unwrap();
    let x2 = spn.add_leaf("x2").unwrap();
    let x2_ = spn.add_leaf("x2_").unwrap();
    let s1 = spn.add_sum_with_weights("s1", &[(x1, 0.8), (x1_, 0.2)]).unwrap();
    let s2 = spn.add_sum_with_weights("s2", &[(x1, 0.6), (x1_, 0.4)]).unwrap();
    let s3 = spn.add_sum_with_weights("s3", &[(x2, 0.3), (x2_, 0.7)]).unwrap();
    let s4 = spn.add_sum_with_weights("s4", &[(x2, 0.4), (x2_, 0.6)]).unwrap();
    let p1 = spn.add_product("p1", &[s1, s3]).unwrap();
    let p2 = spn.add_product("p2", &[s2, s4]).unwrap();
    spn.add_sum_with_weights("s5", &[(p1, 0.35), (p2, 0.65)]).unwrap();
    spn.set_evidence(&["x1", "x2"], &[true, false], "_").unwrap();
    spn
}

fn id(spn: &Spn, name: &str) -> NodeId {
    spn.find(name).unwrap()
}

fn assert_weights_normalized(spn: &Spn) {
    for sum in spn.sum_nodes() {
        let total: f64 = spn.node(sum).links().iter().map(|l| l.weight).sum();
        assert!((total - 1.0).abs() < 1e-9, "{} weights sum to {}", spn.node(sum).name(), total);
        assert!(spn.node(sum).links().iter().all(|l| l.weight >= 0.0));
    }
}

fn assert_valid(spn: &Spn, node: NodeId) {
    let n = spn.node(node);
    if n.is_sum() {
        for &c in n.children() {
            assert_eq!(spn.scope(c), spn.scope(node));
        }
    }
    if n.is_product() {
        let mut seen = BTreeSet::new();
        for &c in n.children() {
            for v in spn.scope(c) {
                assert!(seen.insert(v));
            }
        }
    }
    for &c in n.children() {
        assert_valid(spn, c);
    }
}

// ─── Construction Tests ────────────────────────────────────────────────────────

#[test]
fn construction_links_parents() {
    let spn = literal();
    assert_eq!(spn.len(), 11);
    assert_eq!(spn.root().unwrap(), id(&spn, "s5"));

    let x1 = id(&spn, "x1");
    let parents: Vec<&str> = spn.node(x1).parents().iter().map(|&p| spn.node(p).name()).collect();
    assert_eq!(parents, vec!["s1", "s2"]);
    assert!(spn.node(id(&spn, "s5")).is_root());
    assert!(!spn.node(id(&spn, "p1")).is_root());
    assert_weights_normalized(&spn);
}

#[test]
fn construction_rejects_bad_input() {
    let mut spn = Spn::with_seed(0);
    let a = spn.add_leaf("a").unwrap();
    assert!(matches!(spn.add_leaf("a"), Err(SpnError::DuplicateName { .. })));
    assert!(matches!(spn.add_product("p", &[]), Err(SpnError::EmptyChildren { .. })));
    assert!(matches!(spn.add_sum("s", &[a, a]), Err(SpnError::DuplicateChild { .. })));
    assert!(matches!(
        spn.add_sum_with_weights("s", &[(a, -1.0)]),
        Err(SpnError::InvalidWeight { .. })
    ));
    assert!(matches!(
        spn.add_product("p", &[NodeId::new(42)]),
        Err(SpnError::UnknownNode { .. })
    ));
    assert_eq!(spn.len(), 1);
}

#[test]
fn construction_random_weights_are_seeded() {
    let build = |seed| {
        let mut spn = Spn::with_seed(seed);
        let a = spn.add_leaf("a").unwrap();
        let b = spn.add_leaf("b").unwrap();
        let s = spn.add_sum("s", &[a, b]).unwrap();
        (spn.weight(s, a).unwrap(), spn.weight(s, b).unwrap())
    };
    let (wa, wb) = build(5);
    assert_eq!((wa, wb), build(5));
    assert!(wa > 0.0 && wb > 0.0);
    assert!((wa + wb - 1.0).abs() < EPS);
}

// ─── Evaluation Tests ──────────────────────────────────────────────────────────

#[test]
fn evaluation_marginal() {
    let mut spn = literal();
    let root = spn.evaluate(false).unwrap();
    let expected = 0.35 * (0.8 * 0.7) + 0.65 * (0.6 * 0.6);
    assert!((root - expected).abs() < EPS);
    assert_eq!(spn.node(id(&spn, "s1")).value(), 0.8);
    assert_eq!(spn.node(id(&spn, "s4")).value(), 0.6);
}

#[test]
fn evaluation_max_and_route() {
    let mut spn = literal();
    let root = spn.evaluate(true).unwrap();
    assert!((root - 0.65 * 0.36).abs() < EPS);

    spn.accumulate_counts().unwrap();
    let credited: Vec<(String, String)> = spn
        .sum_nodes()
        .flat_map(|s| {
            let spn = &spn;
            spn.node(s)
                .links()
                .iter()
                .filter(|l| l.count > 0.0)
                .map(move |l| (spn.node(s).name().to_string(), spn.node(l.child).name().to_string()))
        })
        .collect();
    let credited: Vec<(&str, &str)> = credited.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    assert_eq!(credited, vec![("s2", "x1"), ("s4", "x2_"), ("s5", "p2")]);
}

#[test]
fn evaluation_marginal_sums_to_one() {
    let mut spn = literal();
    let mut total = 0.0;
    for row in [[false, false], [false, true], [true, false], [true, true]] {
        spn.set_evidence(&["x1", "x2"], &row, "_").unwrap();
        total += spn.evaluate(false).unwrap();
    }
    assert!((total - 1.0).abs() < EPS);

    // Marginalising both variables gives the total mass.
    spn.marginalize("x1", "_").unwrap();
    spn.marginalize("x2", "_").unwrap();
    assert!((spn.evaluate(false).unwrap() - 1.0).abs() < EPS);
}

// ─── Training Tests ────────────────────────────────────────────────────────────

#[test]
fn training_learns_frequencies() {
    let mut spn = Spn::with_seed(11);
    let x = spn.add_leaf("x").unwrap();
    let x_ = spn.add_leaf("x_").unwrap();
    let s = spn.add_sum("s", &[x, x_]).unwrap();

    let rows = vec![vec![true], vec![false], vec![true], vec![true], vec![false]];
    let scores = spn.fit(&["x"], &rows, &TrainConfig::default()).unwrap();
    assert_eq!(scores.len(), 10);
    assert!((spn.weight(s, x).unwrap() - 0.6).abs() < EPS);
    assert!((spn.weight(s, x_).unwrap() - 0.4).abs() < EPS);
    assert_eq!(spn.count(s, x), Some(0.0));
}

#[test]
fn training_literal_network() {
    let mut spn = literal();
    let rows = vec![
        vec![true, true],
        vec![true, false],
        vec![true, false],
        vec![false, false],
    ];
    let config = TrainConfig {
        epochs: 5,
        ..TrainConfig::default()
    };
    let before = spn.log_likelihood(&["x1", "x2"], &rows, "_").unwrap();
    let scores = spn.fit(&["x1", "x2"], &rows, &config).unwrap();
    let after = spn.log_likelihood(&["x1", "x2"], &rows, "_").unwrap();

    assert_eq!(scores.len(), 5);
    assert!(scores.windows(2).all(|w| w[1] >= w[0] - EPS));
    assert!(after.is_finite());
    assert!(after > before);
    assert_weights_normalized_or_zero(&spn);
}

fn assert_weights_normalized_or_zero(spn: &Spn) {
    for sum in spn.sum_nodes() {
        let total: f64 = spn.node(sum).links().iter().map(|l| l.weight).sum();
        assert!(total == 0.0 || (total - 1.0).abs() < 1e-9);
        assert!(spn.node(sum).links().iter().all(|l| l.count == 0.0));
    }
}

#[test]
fn training_degenerate_policies() {
    let rows = vec![vec![true, true]];

    let mut zero = literal();
    zero.fit(&["x1", "x2"], &rows, &TrainConfig::default()).unwrap();
    let s1 = id(&zero, "s1");
    let x1 = id(&zero, "x1");
    // p1 loses to p2 on this row, so s1 is never credited.
    assert_eq!(zero.weight(s1, x1), Some(0.0));

    let mut keep = literal();
    let config = TrainConfig {
        degenerate: DegeneratePolicy::Preserve,
        ..TrainConfig::default()
    };
    keep.fit(&["x1", "x2"], &rows, &config).unwrap();
    assert_eq!(keep.weight(id(&keep, "s1"), id(&keep, "x1")), Some(0.8));
}

#[test]
fn training_requires_negated_leaves() {
    let mut spn = Spn::with_seed(0);
    let a = spn.add_leaf("a").unwrap();
    let b = spn.add_leaf("b").unwrap();
    spn.add_sum("s", &[a, b]).unwrap();
    let err = spn.fit(&["a"], &[vec![true]], &TrainConfig::default()).unwrap_err();
    assert!(matches!(err, SpnError::MissingNegation { .. }));
}

// ─── Structure Learning Tests ──────────────────────────────────────────────────

fn clustered_data() -> Dataset {
    // Two regimes: (a, b) copy each other, (c, d) copy each other.
    let mut rows = Vec::new();
    for i in 0..24 {
        let left = i % 2 == 0;
        let right = i % 3 == 0;
        rows.push(vec![left, left, right, right]);
    }
    Dataset::from_bools(&["a", "b", "c", "d"], &rows).unwrap()
}

#[test]
fn structure_with_gaussian_mixture() {
    let data = clustered_data();
    let mut gmm = GaussianMixture::with_seed(3);
    gmm.max_components = 3;

    let spn = Spn::learn(&data, &mut gmm, &StructureConfig::default()).unwrap();
    let root = spn.root().unwrap();
    assert_valid(&spn, root);
    assert_weights_normalized(&spn);

    let expected: BTreeSet<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    assert_eq!(spn.scope(root), expected);
    let vars: BTreeSet<&str> = spn.variables().into_iter().collect();
    assert_eq!(vars, ["a", "b", "c", "d"].into_iter().collect());
}

#[test]
fn structure_random_policy_then_train() {
    let data = clustered_data();
    let config = StructureConfig {
        policy: SplitPolicy::Random,
        leaf_encoding: LeafEncoding::Indicators,
        seed: 9,
        ..StructureConfig::default()
    };
    let mut spn = Spn::learn(&data, &mut GaussianMixture::with_seed(9), &config).unwrap();
    assert_valid(&spn, spn.root().unwrap());

    let vars = data.column_names().to_vec();
    let rows = data.bool_rows();
    let before = spn.log_likelihood(&vars, &rows, "_").unwrap();
    assert!(before.is_finite() && before < 0.0);

    let scores = spn.fit(&vars, &rows, &TrainConfig::default()).unwrap();
    assert!(scores.iter().all(|s| s.is_finite()));
    assert!(scores.windows(2).skip(1).all(|w| w[1] >= w[0] - 1e-9));
    assert!(spn.log_likelihood(&vars, &rows, "_").unwrap().is_finite());
}

#[test]
fn structure_custom_clusterer() {
    struct Halves;
    impl Clusterer for Halves {
        fn cluster(&mut self, data: &[Vec<f64>], _min_components: usize) -> Vec<usize> {
            (0..data.len()).map(|i| 2 * i / data.len()).collect()
        }
    }

    let data = clustered_data();
    let spn = Spn::learn(&data, &mut Halves, &StructureConfig::default()).unwrap();
    let root = spn.root().unwrap();
    assert!(spn.node(root).is_sum());
    assert_eq!(spn.node(root).links().iter().map(|l| l.weight).collect::<Vec<_>>(), vec![0.5, 0.5]);
    assert_valid(&spn, root);
}

// ─── Persistence Tests ─────────────────────────────────────────────────────────

#[test]
fn persistence_preserves_evaluation() {
    let mut spn = literal();
    let expected = spn.evaluate(false).unwrap();

    let mut loaded = Spn::from_spn_string(&spn.to_spn_string()).unwrap();
    assert_eq!(loaded.evaluate(false).unwrap().to_bits(), expected.to_bits());
}

#[test]
fn persistence_of_learned_model() {
    let data = clustered_data();
    let config = StructureConfig {
        leaf_encoding: LeafEncoding::Indicators,
        ..StructureConfig::default()
    };
    let mut spn = Spn::learn(&data, &mut GaussianMixture::with_seed(1), &config).unwrap();
    let vars = data.column_names().to_vec();
    let rows = data.bool_rows();
    spn.fit(&vars, &rows, &TrainConfig::default()).unwrap();

    let mut loaded = Spn::from_spn_string(&spn.to_spn_string()).unwrap();
    let a = spn.log_likelihood(&vars, &rows, "_").unwrap();
    let b = loaded.log_likelihood(&vars, &rows, "_").unwrap();
    assert_eq!(a.to_bits(), b.to_bits());
}
