/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The directed, node-and-edge-labeled prefix-tree graph and its merge
//! algebra.
//!
//! Every call-stack sample becomes a tree rooted at the synthetic node `/`;
//! merging two such trees (whether two processes in one daemon, or two
//! daemons at an interior overlay node) is just "union the node sets, union
//! or combine the edge labels". The edge-label *shape* — full bit vector or
//! the lossy count-and-representative form — is carried as a tag on the
//! graph rather than dispatched through a vtable, so every operation below
//! matches on [`EdgeVariant`] once and never again per edge.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write as _};
use std::path::Path;

use crate::bitvector::{BitVector, CountAndRepresentative};
use crate::error::{Result, StatError};

/// The 64-bit hash of a frame's full path from the root, used as a node's
/// identity. Two distinct paths hashing to the same value collide; see
/// [`Graph::add_node_checked`].
pub type NodeId = u64;

/// FNV-1a, the hash the reference implementation's node identity is
/// modeled on: fast, stable across runs, no per-process random seed (the
/// same path must hash identically on every daemon).
pub fn hash_path(path: &str) -> NodeId {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for byte in path.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// The root node's fixed path and ID. The root's ID is always 0, not
/// hash-derived like every other node's.
pub const ROOT_PATH: &str = "/";

pub fn root_id() -> NodeId {
    0
}

/// Which edge-label shape a graph carries. Fixed for the graph's lifetime;
/// merging two graphs of different variants is a defect upstream (a flags
/// mismatch) and is rejected rather than silently coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EdgeVariant {
    Bitvector,
    CountAndRepresentative,
}

/// A graph edge's label, tagged with the variant it belongs to.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EdgeLabel {
    Bitvector(BitVector),
    CountAndRepresentative(CountAndRepresentative),
}

impl EdgeLabel {
    pub fn variant(&self) -> EdgeVariant {
        match self {
            EdgeLabel::Bitvector(_) => EdgeVariant::Bitvector,
            EdgeLabel::CountAndRepresentative(_) => EdgeVariant::CountAndRepresentative,
        }
    }

    /// Merge `other` into `self` per the variant's merge rule. Fails if the
    /// two labels are not the same variant.
    pub fn merge(&mut self, other: &EdgeLabel) -> Result<()> {
        match (self, other) {
            (EdgeLabel::Bitvector(a), EdgeLabel::Bitvector(b)) => a.merge(b),
            (EdgeLabel::CountAndRepresentative(a), EdgeLabel::CountAndRepresentative(b)) => {
                a.merge(b);
                Ok(())
            }
            (a, b) => Err(StatError::FatalInternal(format!(
                "edge variant mismatch in merge: {:?} vs {:?}",
                a.variant(),
                b.variant()
            ))),
        }
    }

    /// Pretty-print for DOT export: rank-range string for bit vectors, the
    /// count/representative/checksum triple otherwise.
    pub fn to_text(&self) -> String {
        match self {
            EdgeLabel::Bitvector(bv) => bv.pretty_print(),
            EdgeLabel::CountAndRepresentative(cr) => cr.to_text(),
        }
    }

    /// Downgrade a bit-vector label to the count-and-representative form,
    /// the way the reference implementation's `getBitVectorCountRep` trades
    /// rank-level detail for a constant per-edge footprint: `count` becomes
    /// the set-bit count, `representative` is caller-supplied (the daemon
    /// picks its own lowest local rank), and `checksum` folds the vector's
    /// words.
    pub fn to_count_rep(&self, representative: i64) -> Result<EdgeLabel> {
        match self {
            EdgeLabel::Bitvector(bv) => Ok(EdgeLabel::CountAndRepresentative(CountAndRepresentative {
                count: bv.count_ones() as i64,
                representative,
                checksum: bv.checksum_fold(),
            })),
            EdgeLabel::CountAndRepresentative(_) => Err(StatError::FatalInternal(
                "to_count_rep called on a label that is already count-and-representative".into(),
            )),
        }
    }
}

/// A node's stored attributes. `path` is kept alongside the hashed
/// [`NodeId`] per the collision-as-logged-defect design: a hash alone
/// cannot distinguish two colliding paths, but a stored path lets
/// [`Graph::add_node_checked`] notice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeAttrs {
    pub path: String,
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
}

impl NodeAttrs {
    pub fn new(path: impl Into<String>) -> Self {
        NodeAttrs {
            path: path.into(),
            source_file: None,
            source_line: None,
        }
    }

    /// The node's display label: its last path component, or `/` for the
    /// root.
    pub fn display_name(&self) -> &str {
        if self.path == ROOT_PATH {
            return ROOT_PATH;
        }
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A directed, node- and edge-labeled prefix-tree graph.
///
/// Nodes and edges are kept in [`BTreeMap`]s, not hash maps: traversal and
/// DOT export need a stable, deterministic order, and this graph is small
/// (one call-stack tree per sample) so the ordering cost is immaterial.
#[derive(Debug, Clone)]
pub struct Graph {
    variant: EdgeVariant,
    nodes: BTreeMap<NodeId, NodeAttrs>,
    edges: BTreeMap<(NodeId, NodeId), EdgeLabel>,
}

impl Graph {
    /// An empty graph tagged with `variant`, pre-populated with the root
    /// `/` node.
    pub fn new(variant: EdgeVariant) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(root_id(), NodeAttrs::new(ROOT_PATH));
        Graph {
            variant,
            nodes,
            edges: BTreeMap::new(),
        }
    }

    pub fn variant(&self) -> EdgeVariant {
        self.variant
    }

    pub fn nodes(&self) -> &BTreeMap<NodeId, NodeAttrs> {
        &self.nodes
    }

    pub fn edges(&self) -> &BTreeMap<(NodeId, NodeId), EdgeLabel> {
        &self.edges
    }

    pub fn root(&self) -> NodeId {
        root_id()
    }

    /// Insert `id` with `attrs` if absent; idempotent, first-writer wins.
    pub fn add_node(&mut self, id: NodeId, attrs: NodeAttrs) {
        self.nodes.entry(id).or_insert(attrs);
    }

    /// Like [`Graph::add_node`], but logs when an existing node's stored
    /// path disagrees with the incoming one — the only externally visible
    /// sign of a 64-bit hash collision.
    pub fn add_node_checked(&mut self, id: NodeId, attrs: NodeAttrs) {
        if let Some(existing) = self.nodes.get(&id) {
            if existing.path != attrs.path {
                log::error!(
                    "node id collision at {:#x}: existing path {:?}, incoming path {:?}",
                    id,
                    existing.path,
                    attrs.path
                );
            }
            return;
        }
        self.nodes.insert(id, attrs);
    }

    /// Insert the edge `parent -> child` with `label` if absent; otherwise
    /// merge `label` into the existing one per the variant's merge rule.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId, label: EdgeLabel) -> Result<()> {
        match self.edges.get_mut(&(parent, child)) {
            Some(existing) => existing.merge(&label),
            None => {
                self.edges.insert((parent, child), label);
                Ok(())
            }
        }
    }

    /// Merge `from` into `self`: union the node sets (first-writer wins per
    /// node) and union-or-merge the edge sets.
    pub fn merge(&mut self, from: &Graph) -> Result<()> {
        if self.variant != from.variant {
            return Err(StatError::FatalInternal(format!(
                "cannot merge graphs of differing variant: {:?} into {:?}",
                from.variant, self.variant
            )));
        }
        for (&id, attrs) in &from.nodes {
            self.add_node_checked(id, attrs.clone());
        }
        for (&(parent, child), label) in &from.edges {
            self.add_edge(parent, child, label.clone())?;
        }
        Ok(())
    }

    /// Serialize per the graph wire format (§6): a header (variant tag,
    /// node count, edge count), then node records, then edge records.
    /// See [`crate::wire`] for the exact byte layout.
    pub fn serialize(&self) -> Vec<u8> {
        crate::wire::serialize_graph(self)
    }

    /// Deserialize a graph, using `edge_deserializer` to decode each edge's
    /// label bytes. Injecting the deserializer is what lets the reduction
    /// filter (C4) plug in the width-expanding variant from
    /// [`crate::bitvector::BitVector::deserialize_at_offset`] without this
    /// module knowing about reduction at all.
    pub fn deserialize(
        buf: &[u8],
        edge_deserializer: impl FnMut(&[u8]) -> Result<EdgeLabel>,
    ) -> Result<Self> {
        crate::wire::deserialize_graph(buf, edge_deserializer)
    }

    /// Assign a stable color index per distinct leading-edge (root-child)
    /// label value, for visualization. Returns a map from child [`NodeId`]
    /// (the far end of a leading edge) to a color index; nodes reachable
    /// only through non-leading edges are unmapped.
    pub fn color_by_leading_edge(&self) -> BTreeMap<NodeId, usize> {
        let root = self.root();
        let mut colors_by_text: BTreeMap<String, usize> = BTreeMap::new();
        let mut out = BTreeMap::new();
        for (&(parent, child), label) in &self.edges {
            if parent != root {
                continue;
            }
            let text = label.to_text();
            let next_color = colors_by_text.len();
            let color = *colors_by_text.entry(text).or_insert(next_color);
            out.insert(child, color);
        }
        out
    }

    /// Write the graph as a DOT file at `path`: one node statement per
    /// node (labeled with its display name), one edge statement per edge
    /// (labeled with the edge's pretty-printed text and colored by leading
    /// edge identity).
    pub fn export_dot(&self, path: &Path) -> io::Result<()> {
        let mut file = File::create(path)?;
        self.write_dot(&mut file)
    }

    /// Render the graph as a DOT string, for callers that want it without
    /// going through a file (e.g. printing to stdout).
    pub fn dot_string(&self) -> String {
        let mut buf = Vec::new();
        self.write_dot(&mut buf).expect("writing to a Vec<u8> is infallible");
        String::from_utf8(buf).expect("DOT output is always valid UTF-8")
    }

    fn write_dot(&self, w: &mut impl io::Write) -> io::Result<()> {
        let colors = self.color_by_leading_edge();
        let palette = [
            "red", "blue", "green", "orange", "purple", "brown", "cyan", "magenta",
        ];

        writeln!(w, "digraph G {{")?;
        for (&id, attrs) in &self.nodes {
            writeln!(w, "  n{} [label=\"{}\"];", id, escape(attrs.display_name()))?;
        }
        for (&(parent, child), label) in &self.edges {
            let color = colors
                .get(&child)
                .map(|&i| palette[i % palette.len()])
                .unwrap_or("black");
            writeln!(
                w,
                "  n{} -> n{} [label=\"{}\", color=\"{}\"];",
                parent,
                child,
                escape(&label.to_text()),
                color
            )?;
        }
        writeln!(w, "}}")
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
