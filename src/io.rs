//! Reading and writing SPN files.
//!
//! # File format (.spn)
//!
//! ```text
//! spn <node_count>
//! L <id> <name> <variable> <value>                 # leaf
//! P <id> <name> <size> <child>*                    # product
//! S <id> <name> <size> {<child> <weight> <count>}* # sum
//! ```
//!
//! Nodes appear bottom-up (children before parents). Lines starting with `c`
//! are comments. Weights, counts and leaf values are written with Rust's
//! shortest round-tripping float formatting, so a saved graph loads back with
//! bit-identical parameters.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::{FromStr, SplitWhitespace};

use log::debug;

use crate::error::{Result, SpnError};
use crate::node::{Link, NodeKind};
use crate::reference::NodeId;
use crate::spn::Spn;

const HEADER: &[&str] = &[
    "c ids of spn nodes start at 0",
    "c spn nodes appear bottom-up, children before parents",
    "c",
    "c file syntax:",
    "c spn count-of-spn-nodes",
    "c L id-of-leaf name variable value",
    "c P id-of-product name number-of-children {id-of-child}*",
    "c S id-of-sum name number-of-children {id-of-child weight count}*",
    "c",
];

impl Spn {
    /// Writes the whole graph to `path`.
    ///
    /// ```no_run
    /// use spn_rs::spn::Spn;
    ///
    /// let mut spn = Spn::with_seed(0);
    /// let x = spn.add_leaf("x").unwrap();
    /// let x_ = spn.add_leaf("x_").unwrap();
    /// spn.add_sum("s", &[x, x_]).unwrap();
    /// spn.save("model.spn").unwrap();
    /// ```
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_spn_string())?;
        Ok(())
    }

    pub fn to_spn_string(&self) -> String {
        let mut lines: Vec<String> = HEADER.iter().map(|s| s.to_string()).collect();
        lines.push(format!("spn {}", self.len()));
        for (id, node) in self.nodes() {
            let line = match node.kind() {
                NodeKind::Leaf { variable } => {
                    format!("L {} {} {} {}", id.raw(), node.name(), variable, node.value())
                }
                NodeKind::Product => {
                    let children: Vec<String> = node.children().iter().map(|c| c.raw().to_string()).collect();
                    format!("P {} {} {} {}", id.raw(), node.name(), children.len(), children.join(" "))
                }
                NodeKind::Sum { links } => {
                    let elements: Vec<String> = links
                        .iter()
                        .map(|l| format!("{} {} {}", l.child.raw(), l.weight, l.count))
                        .collect();
                    format!("S {} {} {} {}", id.raw(), node.name(), links.len(), elements.join(" "))
                }
            };
            lines.push(line);
        }
        lines.push(String::new());
        lines.join("\n")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_spn_string(&content)
    }

    /// Parses a graph written by [`to_spn_string`][Spn::to_spn_string].
    ///
    /// Sum weights are restored verbatim, without renormalisation.
    pub fn from_spn_string(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('c'));

        let header = lines.next().ok_or_else(|| parse_error("missing header"))?;
        let mut parts = header.split_whitespace();
        if parts.next() != Some("spn") {
            return Err(parse_error(format!("invalid header: {}", header)));
        }
        let count: usize = field(&mut parts, header)?;
        if parts.next().is_some() {
            return Err(parse_error(format!("invalid header: {}", header)));
        }

        let mut spn = Spn::with_seed(0);
        let mut ids: HashMap<u32, NodeId> = HashMap::with_capacity(count);

        for line in lines {
            let mut parts = line.split_whitespace();
            let tag = parts.next().unwrap_or_default();
            let file_id: u32 = field(&mut parts, line)?;
            let name: String = field(&mut parts, line)?;
            if ids.contains_key(&file_id) {
                return Err(parse_error(format!("duplicate id {} in: {}", file_id, line)));
            }

            let id = match tag {
                "L" => {
                    let variable: String = field(&mut parts, line)?;
                    let value: f64 = field(&mut parts, line)?;
                    spn.add_leaf_raw(&name, &variable, value)?
                }
                "P" => {
                    let size: usize = field(&mut parts, line)?;
                    let mut children = Vec::with_capacity(size);
                    for _ in 0..size {
                        children.push(child(&ids, &mut parts, line)?);
                    }
                    spn.add_product(&name, &children)?
                }
                "S" => {
                    let size: usize = field(&mut parts, line)?;
                    let mut links = Vec::with_capacity(size);
                    for _ in 0..size {
                        let child = child(&ids, &mut parts, line)?;
                        let weight: f64 = field(&mut parts, line)?;
                        let count: f64 = field(&mut parts, line)?;
                        links.push(Link { child, weight, count });
                    }
                    spn.add_sum_raw(&name, links)?
                }
                _ => return Err(parse_error(format!("unknown node type '{}' in: {}", tag, line))),
            };
            if parts.next().is_some() {
                return Err(parse_error(format!("trailing fields in: {}", line)));
            }
            ids.insert(file_id, id);
        }

        if spn.len() != count {
            return Err(parse_error(format!("header declares {} nodes, found {}", count, spn.len())));
        }
        debug!("from_spn_string: {:?}", spn);
        Ok(spn)
    }
}

fn parse_error(message: impl Into<String>) -> SpnError {
    SpnError::Parse(message.into())
}

fn field<T: FromStr>(parts: &mut SplitWhitespace<'_>, line: &str) -> Result<T> {
    let token = parts
        .next()
        .ok_or_else(|| parse_error(format!("missing field in: {}", line)))?;
    token
        .parse()
        .map_err(|_| parse_error(format!("invalid field '{}' in: {}", token, line)))
}

fn child(ids: &HashMap<u32, NodeId>, parts: &mut SplitWhitespace<'_>, line: &str) -> Result<NodeId> {
    let raw: u32 = field(parts, line)?;
    ids.get(&raw)
        .copied()
        .ok_or_else(|| parse_error(format!("unknown child {} in: {}", raw, line)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn sample() -> Spn {
        let mut spn = Spn::with_seed(3);
        let a = spn.add_leaf("a").unwrap();
        let a_ = spn.add_leaf("a_").unwrap();
        let b = spn.add_leaf("b").unwrap();
        let b_ = spn.add_leaf("b_").unwrap();
        let sa = spn.add_sum("sa", &[a, a_]).unwrap();
        let sb = spn.add_sum("sb", &[b, b_]).unwrap();
        let p = spn.add_product("p", &[sa, sb]).unwrap();
        let q = spn.add_product("q", &[sb, sa]).unwrap();
        spn.add_sum_with_weights("root", &[(p, 0.1), (q, 0.9)]).unwrap();
        spn.update_leaf("a", 0.0).unwrap();
        spn
    }

    #[test]
    fn test_string_roundtrip() {
        let mut spn = sample();
        spn.evaluate(true).unwrap();
        spn.accumulate_counts().unwrap();

        let text = spn.to_spn_string();
        assert!(text.contains("spn 9"));
        let loaded = Spn::from_spn_string(&text).unwrap();

        assert_eq!(loaded.len(), spn.len());
        assert_eq!(loaded.to_spn_string(), text);
        let root = loaded.root().unwrap();
        assert_eq!(loaded.node(root).name(), "root");
        assert_eq!(loaded.to_bracket_string(root), spn.to_bracket_string(spn.root().unwrap()));

        let sa = loaded.find("sa").unwrap();
        let a = loaded.find("a").unwrap();
        assert_eq!(loaded.node(sa).parents().len(), 2);
        assert_eq!(loaded.node(a).value(), 0.0);
        assert_eq!(loaded.weight(sa, a), spn.weight(spn.find("sa").unwrap(), spn.find("a").unwrap()));
        assert_eq!(loaded.leaves_of("a"), &[a]);
    }

    #[test]
    fn test_file_roundtrip() {
        let spn = sample();
        let path = std::env::temp_dir().join(format!("spn-rs-io-{}.spn", std::process::id()));
        spn.save(&path).unwrap();
        let loaded = Spn::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.to_spn_string(), spn.to_spn_string());
    }

    #[test]
    fn test_generated_names_survive() {
        let mut spn = Spn::with_seed(0);
        let x = spn.mk_leaf("x").unwrap();
        let x_ = spn.mk_leaf("x_").unwrap();
        spn.mk_sum_with_weights(&[(x, 1.0), (x_, 3.0)]).unwrap();

        let mut loaded = Spn::from_spn_string(&spn.to_spn_string()).unwrap();
        assert_eq!(loaded.leaves_of("x").len(), 1);
        // Fresh names skip the restored ones.
        let y = loaded.mk_leaf("y").unwrap();
        assert_eq!(loaded.node(y).name(), "leaf2");
    }

    #[test]
    fn test_parse_errors() {
        let bad = [
            "",
            "sdd 1\nL 0 a a 1\n",
            "spn 2\nL 0 a a 1\n",
            "spn 1\nL 0 a a\n",
            "spn 1\nX 0 a a 1\n",
            "spn 2\nL 0 a a 1\nP 1 p 1 7\n",
            "spn 2\nL 0 a a 1\nS 1 s 1 0 0.5\n",
            "spn 2\nL 0 a a 1\nS 1 s 1 0 -1 0\n",
            "spn 2\nL 0 a a 1\nL 0 b b 1\n",
            "spn 1\nL 0 a a 1 extra\n",
        ];
        for text in bad {
            assert!(Spn::from_spn_string(text).is_err(), "accepted: {:?}", text);
        }
    }
}
