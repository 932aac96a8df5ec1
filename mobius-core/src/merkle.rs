//! Merkle encoding of tagged trees (ASTON)
//!
//! A tree flattens into a post-order sequence of quads
//! `(node_hash, field, index, value)`. A node's hash is the SHA-256 of the
//! key-sorted JSON object `{"_type": kind, field: value, ...}` in which every
//! child is replaced by its own hash, so identical subtrees hash identically
//! and are emitted once.

use crate::error::{PoolError, Result};
use crate::object::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Field name carrying the node's type label
pub const TYPE_FIELD: &str = "_type";

/// Scalar literal stored in a field or sequence slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Scalar::Str(s) => serde_json::Value::from(s.as_str()),
            Scalar::Int(i) => serde_json::Value::from(*i),
            Scalar::Bool(b) => serde_json::Value::from(*b),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| PoolError::Schema(format!("non-finite float {} in tree", f)))?,
        })
    }
}

/// One slot of a sequence-valued field
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Null,
    Scalar(Scalar),
    Node(Node),
}

/// Value of a node field
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Null,
    Scalar(Scalar),
    Child(Box<Node>),
    Seq(Vec<Item>),
}

impl Field {
    pub fn str(s: impl Into<String>) -> Self {
        Field::Scalar(Scalar::Str(s.into()))
    }

    pub fn int(i: i64) -> Self {
        Field::Scalar(Scalar::Int(i))
    }

    pub fn bool(b: bool) -> Self {
        Field::Scalar(Scalar::Bool(b))
    }

    pub fn child(node: Node) -> Self {
        Field::Child(Box::new(node))
    }

    pub fn nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        Field::Seq(nodes.into_iter().map(Item::Node).collect())
    }
}

/// Tagged tree node
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: String,
    pub fields: BTreeMap<String, Field>,
}

impl Node {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion
    pub fn with(mut self, name: impl Into<String>, value: Field) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Structural hash of this node
    pub fn hash(&self) -> Result<ContentHash> {
        let mut sink = Encoder::default();
        sink.encode(self)
    }
}

/// Value slot of a quad
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuadValue {
    Null,
    Scalar(Scalar),
    /// Reference to a child node by hash
    Ref(ContentHash),
    /// Marks a sequence field with no elements
    EmptySeq,
}

/// Flat, context-free unit of an encoded tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub node: ContentHash,
    pub field: String,
    pub index: Option<usize>,
    pub value: QuadValue,
}

#[derive(Default)]
struct Encoder {
    quads: Vec<Quad>,
    seen: HashSet<ContentHash>,
}

impl Encoder {
    fn encode(&mut self, node: &Node) -> Result<ContentHash> {
        if node.fields.contains_key(TYPE_FIELD) {
            return Err(PoolError::Schema(format!(
                "node {} uses reserved field name {}",
                node.kind, TYPE_FIELD
            )));
        }

        let mut canonical = BTreeMap::new();
        canonical.insert(TYPE_FIELD.to_string(), serde_json::Value::from(node.kind.as_str()));
        // (field, index, value) rows, finalized once the node hash is known
        let mut rows: Vec<(&str, Option<usize>, QuadValue)> = Vec::new();

        for (name, field) in &node.fields {
            let json = match field {
                Field::Null => {
                    rows.push((name.as_str(), None, QuadValue::Null));
                    serde_json::Value::Null
                }
                Field::Scalar(s) => {
                    rows.push((name.as_str(), None, QuadValue::Scalar(s.clone())));
                    s.to_json()?
                }
                Field::Child(child) => {
                    let h = self.encode(child)?;
                    rows.push((name.as_str(), None, QuadValue::Ref(h)));
                    serde_json::Value::from(h.to_hex())
                }
                Field::Seq(items) if items.is_empty() => {
                    rows.push((name.as_str(), None, QuadValue::EmptySeq));
                    serde_json::Value::Array(Vec::new())
                }
                Field::Seq(items) => {
                    let mut arr = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        let (json, value) = match item {
                            Item::Null => (serde_json::Value::Null, QuadValue::Null),
                            Item::Scalar(s) => (s.to_json()?, QuadValue::Scalar(s.clone())),
                            Item::Node(child) => {
                                let h = self.encode(child)?;
                                (serde_json::Value::from(h.to_hex()), QuadValue::Ref(h))
                            }
                        };
                        arr.push(json);
                        rows.push((name.as_str(), Some(i), value));
                    }
                    serde_json::Value::Array(arr)
                }
            };
            canonical.insert(name.clone(), json);
        }

        let hash = digest(&canonical)?;

        if self.seen.insert(hash) {
            self.quads.push(Quad {
                node: hash,
                field: TYPE_FIELD.to_string(),
                index: None,
                value: QuadValue::Scalar(Scalar::Str(node.kind.clone())),
            });
            for (field, index, value) in rows {
                self.quads.push(Quad {
                    node: hash,
                    field: field.to_string(),
                    index,
                    value,
                });
            }
        }
        Ok(hash)
    }
}

/// Hash of a node's canonical JSON object
fn digest(canonical: &BTreeMap<String, serde_json::Value>) -> Result<ContentHash> {
    let bytes =
        serde_json::to_vec(canonical).map_err(|e| PoolError::Serialization(e.to_string()))?;
    Ok(ContentHash::from_data(&bytes))
}

/// How a quad value appears in its node's canonical JSON object
fn slot_json(value: &QuadValue) -> Result<serde_json::Value> {
    Ok(match value {
        QuadValue::Null => serde_json::Value::Null,
        QuadValue::Scalar(s) => s.to_json()?,
        QuadValue::Ref(h) => serde_json::Value::from(h.to_hex()),
        QuadValue::EmptySeq => serde_json::Value::Array(Vec::new()),
    })
}

/// Encode a tree into its root hash and post-order quad sequence
pub fn encode(root: &Node) -> Result<(ContentHash, Vec<Quad>)> {
    let mut encoder = Encoder::default();
    let hash = encoder.encode(root)?;
    Ok((hash, encoder.quads))
}

/// Decode a quad sequence whose root is the single unreferenced node
pub fn decode(quads: &[Quad]) -> Result<Node> {
    let groups = group(quads);
    let referenced: HashSet<ContentHash> = quads
        .iter()
        .filter_map(|q| match q.value {
            QuadValue::Ref(h) => Some(h),
            _ => None,
        })
        .collect();
    let roots: Vec<ContentHash> = groups
        .keys()
        .filter(|h| !referenced.contains(h))
        .copied()
        .collect();

    match roots.as_slice() {
        [root] => Decoder::new(groups).build(*root),
        [] => Err(PoolError::Schema("quad set has no root node".into())),
        _ => Err(PoolError::Schema(format!(
            "quad set has {} unreferenced nodes",
            roots.len()
        ))),
    }
}

/// Decode the tree rooted at `root` from a quad sequence
pub fn decode_root(quads: &[Quad], root: ContentHash) -> Result<Node> {
    Decoder::new(group(quads)).build(root)
}

fn group(quads: &[Quad]) -> HashMap<ContentHash, Vec<&Quad>> {
    let mut groups: HashMap<ContentHash, Vec<&Quad>> = HashMap::new();
    for quad in quads {
        groups.entry(quad.node).or_default().push(quad);
    }
    groups
}

/// Rebuilds nodes from grouped quads
///
/// Each node is hashed from its own rows, with children standing in by the
/// hashes they were already verified under, and is built once however many
/// parents reference it.
struct Decoder<'a> {
    groups: HashMap<ContentHash, Vec<&'a Quad>>,
    active: HashSet<ContentHash>,
    built: HashMap<ContentHash, Node>,
}

impl<'a> Decoder<'a> {
    fn new(groups: HashMap<ContentHash, Vec<&'a Quad>>) -> Self {
        Self {
            groups,
            active: HashSet::new(),
            built: HashMap::new(),
        }
    }

    fn build(&mut self, hash: ContentHash) -> Result<Node> {
        if let Some(node) = self.built.get(&hash) {
            return Ok(node.clone());
        }
        if !self.active.insert(hash) {
            return Err(PoolError::Schema(format!("node {} references itself", hash)));
        }
        let (node, actual) = self.build_fields(hash)?;
        self.active.remove(&hash);

        if actual != hash {
            return Err(PoolError::Schema(format!(
                "node {} reconstructs to {}",
                hash, actual
            )));
        }
        self.built.insert(hash, node.clone());
        Ok(node)
    }

    /// The node stored under `hash` and the digest of its rows
    fn build_fields(&mut self, hash: ContentHash) -> Result<(Node, ContentHash)> {
        let quads = self
            .groups
            .get(&hash)
            .cloned()
            .ok_or_else(|| PoolError::Schema(format!("missing node {}", hash)))?;

        let mut kind = None;
        let mut scalars: BTreeMap<&str, &QuadValue> = BTreeMap::new();
        let mut seqs: BTreeMap<&str, BTreeMap<usize, &QuadValue>> = BTreeMap::new();

        for quad in &quads {
            let field = quad.field.as_str();
            match (field, quad.index) {
                (TYPE_FIELD, None) => match &quad.value {
                    QuadValue::Scalar(Scalar::Str(k)) => kind = Some(k.clone()),
                    other => {
                        return Err(PoolError::Schema(format!(
                            "node {} has non-string type {:?}",
                            hash, other
                        )));
                    }
                },
                (_, None) => {
                    if scalars.insert(field, &quad.value).is_some() {
                        return Err(PoolError::Schema(format!(
                            "node {} repeats field {}",
                            hash, field
                        )));
                    }
                }
                (_, Some(i)) => {
                    if seqs.entry(field).or_default().insert(i, &quad.value).is_some() {
                        return Err(PoolError::Schema(format!(
                            "node {} repeats {}[{}]",
                            hash, field, i
                        )));
                    }
                }
            }
        }

        let kind = kind.ok_or_else(|| PoolError::Schema(format!("node {} has no type", hash)))?;
        let mut canonical = BTreeMap::new();
        canonical.insert(TYPE_FIELD.to_string(), serde_json::Value::from(kind.as_str()));
        let mut node = Node::new(kind);

        for (name, value) in scalars {
            if seqs.contains_key(name) {
                return Err(PoolError::Schema(format!(
                    "node {} field {} is both scalar and sequence",
                    hash, name
                )));
            }
            let field = match value {
                QuadValue::Null => Field::Null,
                QuadValue::Scalar(s) => Field::Scalar(s.clone()),
                QuadValue::Ref(child) => Field::Child(Box::new(self.build(*child)?)),
                QuadValue::EmptySeq => Field::Seq(Vec::new()),
            };
            canonical.insert(name.to_string(), slot_json(value)?);
            node.fields.insert(name.to_string(), field);
        }

        for (name, slots) in seqs {
            let mut items = Vec::with_capacity(slots.len());
            let mut json = Vec::with_capacity(slots.len());
            for (expected, (index, value)) in slots.into_iter().enumerate() {
                if index != expected {
                    return Err(PoolError::Schema(format!(
                        "node {} field {} is missing index {}",
                        hash, name, expected
                    )));
                }
                items.push(match value {
                    QuadValue::Null => Item::Null,
                    QuadValue::Scalar(s) => Item::Scalar(s.clone()),
                    QuadValue::Ref(child) => Item::Node(self.build(*child)?),
                    QuadValue::EmptySeq => {
                        return Err(PoolError::Schema(format!(
                            "node {} field {} has empty marker at index {}",
                            hash, name, index
                        )));
                    }
                });
                json.push(slot_json(value)?);
            }
            canonical.insert(name.to_string(), serde_json::Value::Array(json));
            node.fields.insert(name.to_string(), Field::Seq(items));
        }

        Ok((node, digest(&canonical)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(id: &str) -> Node {
        Node::new("Name").with("id", Field::str(id))
    }

    fn sample() -> Node {
        Node::new("FunctionDef")
            .with("name", Field::str("f"))
            .with("returns", Field::Null)
            .with("decorators", Field::Seq(vec![]))
            .with(
                "body",
                Field::nodes(vec![Node::new("Return").with(
                    "value",
                    Field::child(
                        Node::new("BinOp")
                            .with("left", Field::child(name("x")))
                            .with("op", Field::str("+"))
                            .with("right", Field::child(name("x"))),
                    ),
                )]),
            )
            .with(
                "mixed",
                Field::Seq(vec![
                    Item::Null,
                    Item::Scalar(Scalar::Int(3)),
                    Item::Scalar(Scalar::Float(1.5)),
                    Item::Scalar(Scalar::Bool(true)),
                ]),
            )
    }

    #[test]
    fn test_roundtrip() {
        let tree = sample();
        let (hash, quads) = encode(&tree).unwrap();
        assert_eq!(decode(&quads).unwrap(), tree);
        assert_eq!(decode_root(&quads, hash).unwrap(), tree);
    }

    #[test]
    fn test_post_order_root_last() {
        let (hash, quads) = encode(&sample()).unwrap();
        assert_eq!(quads.last().unwrap().node, hash);
        assert_eq!(quads[0].field, TYPE_FIELD);
    }

    #[test]
    fn test_hash_is_structural() {
        let a = Node::new("Pair")
            .with("left", Field::int(1))
            .with("right", Field::int(2));
        let b = Node::new("Pair")
            .with("right", Field::int(2))
            .with("left", Field::int(1));
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
        assert_ne!(a.hash().unwrap(), Node::new("Pair").hash().unwrap());
    }

    #[test]
    fn test_identical_subtrees_emitted_once() {
        let (_, quads) = encode(&sample()).unwrap();
        let x = name("x").hash().unwrap();
        let type_quads = quads
            .iter()
            .filter(|q| q.node == x && q.field == TYPE_FIELD)
            .count();
        assert_eq!(type_quads, 1);
    }

    #[test]
    fn test_index_only_on_sequences() {
        let (_, quads) = encode(&sample()).unwrap();
        for q in &quads {
            if q.field == "body" || q.field == "mixed" {
                assert!(q.index.is_some());
            } else {
                assert!(q.index.is_none());
            }
        }
    }

    #[test]
    fn test_missing_child_fails() {
        let (hash, quads) = encode(&sample()).unwrap();
        let x = name("x").hash().unwrap();
        let partial: Vec<Quad> = quads.into_iter().filter(|q| q.node != x).collect();
        let err = decode_root(&partial, hash).unwrap_err();
        assert!(matches!(err, PoolError::Schema(ref m) if m.contains("missing node")));
    }

    #[test]
    fn test_tampered_scalar_fails() {
        let (hash, mut quads) = encode(&sample()).unwrap();
        for q in quads.iter_mut() {
            if q.field == "name" {
                q.value = QuadValue::Scalar(Scalar::Str("g".into()));
            }
        }
        assert!(matches!(decode_root(&quads, hash), Err(PoolError::Schema(_))));
    }

    #[test]
    fn test_tampered_shared_child_fails_everywhere() {
        let (hash, mut quads) = encode(&sample()).unwrap();
        let x = name("x").hash().unwrap();
        for q in quads.iter_mut() {
            if q.node == x && q.field == "id" {
                q.value = QuadValue::Scalar(Scalar::Str("y".into()));
            }
        }
        let err = decode_root(&quads, hash).unwrap_err();
        assert!(matches!(err, PoolError::Schema(ref m) if m.contains(&x.to_hex())));
    }

    #[test]
    fn test_deeply_shared_tree() {
        // Every level references the level below twice.
        let mut tree = name("leaf");
        for depth in 0..12 {
            tree = Node::new("Pair")
                .with("depth", Field::int(depth))
                .with("left", Field::child(tree.clone()))
                .with("right", Field::child(tree));
        }
        let (hash, quads) = encode(&tree).unwrap();
        // Two quads for the leaf, four per level
        assert_eq!(quads.len(), 2 + 4 * 12);
        assert_eq!(decode_root(&quads, hash).unwrap(), tree);
        assert_eq!(decode(&quads).unwrap(), tree);
    }

    #[test]
    fn test_reserved_field_rejected() {
        let node = Node::new("Bad").with(TYPE_FIELD, Field::str("x"));
        assert!(encode(&node).is_err());
    }

    #[test]
    fn test_non_finite_float_rejected() {
        let node = Node::new("F").with("v", Field::Scalar(Scalar::Float(f64::NAN)));
        assert!(encode(&node).is_err());
    }

    #[test]
    fn test_quads_serialize_as_json() {
        let (_, quads) = encode(&name("x")).unwrap();
        let json = serde_json::to_string(&quads).unwrap();
        let back: Vec<Quad> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, quads);
    }
}
