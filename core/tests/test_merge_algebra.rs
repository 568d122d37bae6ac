/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! §8 invariants: graph merge is commutative and associative, for both
//! edge-label variants.

use stat_graph::bitvector::{BitVector, CountAndRepresentative};
use stat_graph::graph::{hash_path, EdgeLabel, EdgeVariant, Graph, NodeAttrs};

fn bv_graph(path: &str, bit: usize, width_words: usize) -> Graph {
    let mut g = Graph::new(EdgeVariant::Bitvector);
    let root = g.root();
    let node = hash_path(path);
    g.add_node(node, NodeAttrs::new(path));
    let mut bv = BitVector::zeroed(width_words);
    bv.set_bit(bit);
    g.add_edge(root, node, EdgeLabel::Bitvector(bv)).unwrap();
    g
}

fn count_rep_graph(path: &str, rank: i64) -> Graph {
    let mut g = Graph::new(EdgeVariant::CountAndRepresentative);
    let root = g.root();
    let node = hash_path(path);
    g.add_node(node, NodeAttrs::new(path));
    g.add_edge(
        root,
        node,
        EdgeLabel::CountAndRepresentative(CountAndRepresentative::singleton(rank)),
    )
    .unwrap();
    g
}

fn edges_equal(a: &Graph, b: &Graph) -> bool {
    a.nodes() == b.nodes() && a.edges() == b.edges()
}

#[test]
fn bitvector_merge_is_commutative() {
    let a = bv_graph("/main", 0, 1);
    let b = bv_graph("/main", 1, 1);

    let mut ab = a.clone();
    ab.merge(&b).unwrap();
    let mut ba = b.clone();
    ba.merge(&a).unwrap();

    assert!(edges_equal(&ab, &ba));
}

#[test]
fn bitvector_merge_is_associative() {
    let a = bv_graph("/main", 0, 1);
    let b = bv_graph("/main", 1, 1);
    let c = bv_graph("/main", 2, 1);

    let mut ab_c = a.clone();
    ab_c.merge(&b).unwrap();
    ab_c.merge(&c).unwrap();

    let mut bc = b.clone();
    bc.merge(&c).unwrap();
    let mut a_bc = a.clone();
    a_bc.merge(&bc).unwrap();

    assert!(edges_equal(&ab_c, &a_bc));
}

#[test]
fn count_rep_merge_is_commutative_and_associative() {
    let a = count_rep_graph("/main", 0);
    let b = count_rep_graph("/main", 1);
    let c = count_rep_graph("/main", 2);

    let mut ab = a.clone();
    ab.merge(&b).unwrap();
    let mut ba = b.clone();
    ba.merge(&a).unwrap();
    assert!(edges_equal(&ab, &ba));

    let mut ab_c = ab.clone();
    ab_c.merge(&c).unwrap();
    let mut bc = b.clone();
    bc.merge(&c).unwrap();
    let mut a_bc = a.clone();
    a_bc.merge(&bc).unwrap();
    assert!(edges_equal(&ab_c, &a_bc));
}

#[test]
fn merge_rejects_mismatched_variants() {
    let mut bv = bv_graph("/main", 0, 1);
    let cr = count_rep_graph("/main", 0);
    assert!(bv.merge(&cr).is_err());
}
