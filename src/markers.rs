//! Marker constants and the slash-path arg resolver.
//!
//! `resolve_parameters` turns a flat sequence of `(path, raw value)` pairs —
//! as produced by the streaming parser reading `!!!ARG:` lines — into a
//! nested [`ParameterTree`]. It has no parsing concerns of its own; it is a
//! pure function over already-split path/value pairs, kept separate from
//! the parser so it can be re-run with a different coercion policy without
//! re-scanning the wire text.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// A JSON-like value tree, preserving the raw string form of every leaf.
///
/// Not `serde_json::Value`: the spec requires that a coerced numeric leaf
/// keep its original string representation alongside the parsed number, so
/// a caller can disambiguate `"007"` from `7`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterTree {
    Object(BTreeMap<String, ParameterTree>),
    Array(Vec<ParameterTree>),
    String(String),
    Number { raw: String, value: f64 },
}

impl ParameterTree {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterTree::String(s) => Some(s),
            ParameterTree::Number { raw, .. } => Some(raw),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, ParameterTree>> {
        match self {
            ParameterTree::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ParameterTree]> {
        match self {
            ParameterTree::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Renders the tree back into `serde_json::Value`, for gadgets that want
    /// a conventional JSON view of their parameters.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParameterTree::Object(m) => {
                serde_json::Value::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
            ParameterTree::Array(v) => {
                serde_json::Value::Array(v.iter().map(|x| x.to_json()).collect())
            }
            ParameterTree::String(s) => serde_json::Value::String(s.clone()),
            ParameterTree::Number { value, .. } => serde_json::json!(value),
        }
    }

    /// Inverse of [`Self::to_json`], for deserializing a tree that was
    /// serialized by this crate (tree-node snapshots, replayed gadget
    /// calls). A JSON number's original text is reconstructed via its
    /// canonical `serde_json` rendering, since `serde_json::Value` does not
    /// retain the source literal; bools and null collapse to their string
    /// forms since `ParameterTree` has no such variants.
    fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(m) => {
                ParameterTree::Object(m.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect())
            }
            serde_json::Value::Array(v) => {
                ParameterTree::Array(v.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::String(s) => ParameterTree::String(s),
            serde_json::Value::Number(n) => {
                let raw = n.to_string();
                let value = n.as_f64().unwrap_or_default();
                ParameterTree::Number { raw, value }
            }
            serde_json::Value::Bool(b) => ParameterTree::String(b.to_string()),
            serde_json::Value::Null => ParameterTree::String(String::new()),
        }
    }
}

/// A single intermediate write target: either a nested map or a nested list.
enum Container {
    Object(BTreeMap<String, Node>),
    Array(Vec<Option<Node>>),
}

enum Node {
    Container(Container),
    Leaf(String),
}

fn is_array_index(segment: &str) -> bool {
    !segment.is_empty()
        && segment.bytes().all(|b| b.is_ascii_digit())
        && (segment == "0" || !segment.starts_with('0'))
}

/// Builds a [`ParameterTree`] from flattened `(path, raw_value)` pairs.
///
/// Rules (spec §4.A), applied in order:
/// 1. A verbatim-duplicate path fails with `duplicate-pointer`.
/// 2. Each `/`-separated segment is an array index iff it is a run of ASCII
///    digits with no leading zero (unless the segment is exactly `"0"`).
/// 3. Writing descends, creating objects/arrays as needed; a container-kind
///    mismatch at a shared prefix fails with `type-conflict`.
/// 4. Every array's indices must end up exactly `0..n-1`; a gap fails with
///    `array-index-gap`.
pub fn resolve_parameters(pairs: &[(String, String)]) -> Result<ParameterTree, Error> {
    let mut seen = std::collections::HashSet::new();
    for (path, _) in pairs {
        if !seen.insert(path.clone()) {
            return Err(Error::ParseDuplicatePointer(path.clone()));
        }
    }

    let mut root = Container::Object(BTreeMap::new());

    for (path, value) in pairs {
        let segments: Vec<&str> = path.split('/').collect();
        write_path(&mut root, path, &segments, value)?;
    }

    container_to_tree(path_root_label(), root)
}

fn path_root_label() -> &'static str {
    ""
}

fn write_path(root: &mut Container, full_path: &str, segments: &[&str], value: &str) -> Result<(), Error> {
    write_segment(root, full_path, segments, value)
}

fn write_segment(
    container: &mut Container,
    full_path: &str,
    segments: &[&str],
    value: &str,
) -> Result<(), Error> {
    let (head, rest) = segments.split_first().expect("non-empty path");
    let is_index = is_array_index(head);

    match (container, is_index) {
        (Container::Object(_), true) | (Container::Array(_), false) => {
            let found = if is_index { "object" } else { "array" };
            let expected = if is_index { "array" } else { "object" };
            return Err(Error::ParseTypeConflict {
                path: full_path.to_string(),
                expected,
                found,
            });
        }
        _ => {}
    }

    if rest.is_empty() {
        match container {
            Container::Object(map) => {
                map.insert(head.to_string(), Node::Leaf(value.to_string()));
            }
            Container::Array(vec) => {
                let idx: usize = head.parse().expect("validated digit run");
                if vec.len() <= idx {
                    vec.resize_with(idx + 1, || None);
                }
                vec[idx] = Some(Node::Leaf(value.to_string()));
            }
        }
        return Ok(());
    }

    let next_is_index = is_array_index(rest[0]);

    match container {
        Container::Object(map) => {
            let entry = map.entry(head.to_string()).or_insert_with(|| {
                Node::Container(if next_is_index {
                    Container::Array(Vec::new())
                } else {
                    Container::Object(BTreeMap::new())
                })
            });
            match entry {
                Node::Container(c) => write_segment(c, full_path, rest, value)?,
                Node::Leaf(_) => {
                    return Err(Error::ParseTypeConflict {
                        path: full_path.to_string(),
                        expected: "container",
                        found: "leaf",
                    })
                }
            }
        }
        Container::Array(vec) => {
            let idx: usize = head.parse().expect("validated digit run");
            if vec.len() <= idx {
                vec.resize_with(idx + 1, || None);
            }
            let slot = vec[idx].get_or_insert_with(|| {
                Node::Container(if next_is_index {
                    Container::Array(Vec::new())
                } else {
                    Container::Object(BTreeMap::new())
                })
            });
            match slot {
                Node::Container(c) => write_segment(c, full_path, rest, value)?,
                Node::Leaf(_) => {
                    return Err(Error::ParseTypeConflict {
                        path: full_path.to_string(),
                        expected: "container",
                        found: "leaf",
                    })
                }
            }
        }
    }

    Ok(())
}

fn container_to_tree(path_for_errors: &str, container: Container) -> Result<ParameterTree, Error> {
    match container {
        Container::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k, node_to_tree(path_for_errors, v)?);
            }
            Ok(ParameterTree::Object(out))
        }
        Container::Array(vec) => array_to_tree(path_for_errors, vec),
    }
}

fn array_to_tree(path_for_errors: &str, vec: Vec<Option<Node>>) -> Result<ParameterTree, Error> {
    let expected = vec.len();
    let mut out = Vec::with_capacity(expected);
    for (i, slot) in vec.into_iter().enumerate() {
        match slot {
            Some(node) => out.push(node_to_tree(path_for_errors, node)?),
            None => {
                return Err(Error::ParseArrayGap {
                    path: path_for_errors.to_string(),
                    expected: i,
                    got: expected,
                })
            }
        }
    }
    Ok(ParameterTree::Array(out))
}

fn node_to_tree(path_for_errors: &str, node: Node) -> Result<ParameterTree, Error> {
    match node {
        Node::Leaf(s) => Ok(ParameterTree::String(s)),
        Node::Container(c) => container_to_tree(path_for_errors, c),
    }
}

/// Best-effort coercion pass: walks a [`ParameterTree`], turning any
/// `String` leaf that parses cleanly as a decimal integer or float into a
/// `Number`, preserving the raw text. Multi-line string leaves are left
/// untouched regardless of their content (a value containing a newline is
/// never coerced, matching the spec's "preserve whitespace in multi-line
/// leaves verbatim" rule).
pub fn coerce_scalars(tree: ParameterTree) -> ParameterTree {
    match tree {
        ParameterTree::Object(map) => ParameterTree::Object(
            map.into_iter().map(|(k, v)| (k, coerce_scalars(v))).collect(),
        ),
        ParameterTree::Array(vec) => {
            ParameterTree::Array(vec.into_iter().map(coerce_scalars).collect())
        }
        ParameterTree::String(s) => {
            if !s.contains('\n') {
                if let Ok(value) = s.parse::<f64>() {
                    return ParameterTree::Number { raw: s, value };
                }
            }
            ParameterTree::String(s)
        }
        other @ ParameterTree::Number { .. } => other,
    }
}

impl Serialize for ParameterTree {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ParameterTree {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(ParameterTree::from_json(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(v: &[(&str, &str)]) -> Vec<(String, String)> {
        v.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    #[test]
    fn nested_object_path() {
        let tree = resolve_parameters(&pairs(&[("config/timeout", "30")])).unwrap();
        let obj = tree.as_object().unwrap();
        let config = obj.get("config").unwrap().as_object().unwrap();
        assert_eq!(config.get("timeout").unwrap().as_str(), Some("30"));
    }

    #[test]
    fn array_path() {
        let tree = resolve_parameters(&pairs(&[("items/0", "a"), ("items/1", "b")])).unwrap();
        let obj = tree.as_object().unwrap();
        let items = obj.get("items").unwrap().as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_str(), Some("a"));
        assert_eq!(items[1].as_str(), Some("b"));
    }

    #[test]
    fn duplicate_path_fails() {
        let err = resolve_parameters(&pairs(&[("x", "1"), ("x", "2")])).unwrap_err();
        assert!(matches!(err, Error::ParseDuplicatePointer(_)));
    }

    #[test]
    fn array_gap_fails() {
        let err = resolve_parameters(&pairs(&[("items/0", "a"), ("items/2", "c")])).unwrap_err();
        assert!(matches!(err, Error::ParseArrayGap { expected: 1, .. }));
    }

    #[test]
    fn type_conflict_fails() {
        let err =
            resolve_parameters(&pairs(&[("x/0", "a"), ("x/key", "b")])).unwrap_err();
        assert!(matches!(err, Error::ParseTypeConflict { .. }));
    }

    #[test]
    fn bare_zero_is_an_index_but_leading_zero_is_not() {
        assert!(is_array_index("0"));
        assert!(!is_array_index("00"));
        assert!(!is_array_index("01"));
    }

    #[test]
    fn coercion_parses_clean_numbers() {
        let tree = resolve_parameters(&pairs(&[("n", "42")])).unwrap();
        let coerced = coerce_scalars(tree);
        match coerced.as_object().unwrap().get("n").unwrap() {
            ParameterTree::Number { raw, value } => {
                assert_eq!(raw, "42");
                assert_eq!(*value, 42.0);
            }
            _ => panic!("expected Number"),
        }
    }

    #[test]
    fn coercion_skips_multiline_values() {
        let tree = resolve_parameters(&pairs(&[("n", "42\n")])).unwrap();
        let coerced = coerce_scalars(tree);
        assert!(matches!(
            coerced.as_object().unwrap().get("n").unwrap(),
            ParameterTree::String(_)
        ));
    }

    #[test]
    fn round_trip_identity_on_flattener() {
        let original = pairs(&[
            ("a/b", "1"),
            ("a/c/0", "x"),
            ("a/c/1", "y"),
            ("d", "z"),
        ]);
        let tree = resolve_parameters(&original).unwrap();
        let mut flattened = Vec::new();
        flatten(&tree, String::new(), &mut flattened);
        flattened.sort();
        let mut expected = original.clone();
        expected.sort();
        assert_eq!(flattened, expected);
    }

    fn flatten(tree: &ParameterTree, prefix: String, out: &mut Vec<(String, String)>) {
        match tree {
            ParameterTree::Object(map) => {
                for (k, v) in map {
                    let next = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{prefix}/{k}")
                    };
                    flatten(v, next, out);
                }
            }
            ParameterTree::Array(vec) => {
                for (i, v) in vec.iter().enumerate() {
                    let next = format!("{prefix}/{i}");
                    flatten(v, next, out);
                }
            }
            ParameterTree::String(s) => out.push((prefix, s.clone())),
            ParameterTree::Number { raw, .. } => out.push((prefix, raw.clone())),
        }
    }
}
