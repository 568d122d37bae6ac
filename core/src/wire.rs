/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The length-prefixed graph wire format shared by daemons, the reduction
//! filter, and the front end.
//!
//! Layout: a header (variant tag, node count, edge count), then that many
//! node records, then that many edge records. Every record is
//! self-describing (length-prefixed) so a reader never needs a schema
//! beyond this module.

use crate::error::{Result, StatError};
use crate::graph::{EdgeLabel, EdgeVariant, Graph, NodeAttrs, NodeId};

const TAG_BITVECTOR: u8 = 0;
const TAG_COUNT_AND_REPRESENTATIVE: u8 = 1;

fn variant_tag(variant: EdgeVariant) -> u8 {
    match variant {
        EdgeVariant::Bitvector => TAG_BITVECTOR,
        EdgeVariant::CountAndRepresentative => TAG_COUNT_AND_REPRESENTATIVE,
    }
}

fn variant_from_tag(tag: u8) -> Result<EdgeVariant> {
    match tag {
        TAG_BITVECTOR => Ok(EdgeVariant::Bitvector),
        TAG_COUNT_AND_REPRESENTATIVE => Ok(EdgeVariant::CountAndRepresentative),
        other => Err(StatError::FatalInternal(format!(
            "unknown edge variant tag {other}"
        ))),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(StatError::MalformedPayload {
                expected: self.pos + n,
                actual: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Serialize `graph` into the wire format described above.
pub fn serialize_graph(graph: &Graph) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.push(variant_tag(graph.variant()));
    buf.extend_from_slice(&(graph.nodes().len() as u32).to_le_bytes());
    buf.extend_from_slice(&(graph.edges().len() as u32).to_le_bytes());

    for (&id, attrs) in graph.nodes() {
        buf.extend_from_slice(&id.to_le_bytes());
        let name_bytes = attrs.path.as_bytes();
        buf.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(name_bytes);

        let mut flags = 0u8;
        if attrs.source_file.is_some() {
            flags |= 0x1;
        }
        if attrs.source_line.is_some() {
            flags |= 0x2;
        }
        buf.push(flags);
        if let Some(source_file) = &attrs.source_file {
            let bytes = source_file.as_bytes();
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(bytes);
        }
        if let Some(line) = attrs.source_line {
            buf.extend_from_slice(&line.to_le_bytes());
        }
    }

    for (&(parent, child), label) in graph.edges() {
        buf.extend_from_slice(&parent.to_le_bytes());
        buf.extend_from_slice(&child.to_le_bytes());
        let label_bytes = match label {
            EdgeLabel::Bitvector(bv) => bv.serialize(),
            EdgeLabel::CountAndRepresentative(cr) => cr.serialize().to_vec(),
        };
        buf.extend_from_slice(&(label_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&label_bytes);
    }

    buf
}

/// Deserialize a graph, decoding each edge label's bytes with
/// `edge_deserializer` — injected so callers can plug in the
/// width-expanding variant during in-network reduction without this
/// module depending on that concern.
pub fn deserialize_graph(
    buf: &[u8],
    mut edge_deserializer: impl FnMut(&[u8]) -> Result<EdgeLabel>,
) -> Result<Graph> {
    let mut r = Reader::new(buf);

    let variant = variant_from_tag(r.u8()?)?;
    let node_count = r.u32()? as usize;
    let edge_count = r.u32()? as usize;

    let mut graph = Graph::new(variant);

    for _ in 0..node_count {
        let id: NodeId = r.u64()?;
        let name_len = r.u32()? as usize;
        let name = String::from_utf8(r.take(name_len)?.to_vec())
            .map_err(|e| StatError::FatalInternal(format!("invalid utf-8 node name: {e}")))?;

        let flags = r.u8()?;
        let source_file = if flags & 0x1 != 0 {
            let len = r.u32()? as usize;
            Some(
                String::from_utf8(r.take(len)?.to_vec())
                    .map_err(|e| StatError::FatalInternal(format!("invalid utf-8 source file: {e}")))?,
            )
        } else {
            None
        };
        let source_line = if flags & 0x2 != 0 {
            Some(r.u32()?)
        } else {
            None
        };

        graph.add_node_checked(
            id,
            NodeAttrs {
                path: name,
                source_file,
                source_line,
            },
        );
    }

    for _ in 0..edge_count {
        let parent: NodeId = r.u64()?;
        let child: NodeId = r.u64()?;
        let label_len = r.u32()? as usize;
        let label_bytes = r.take(label_len)?;
        let label = edge_deserializer(label_bytes)?;
        graph.add_edge(parent, child, label)?;
    }

    if r.remaining() != 0 {
        return Err(StatError::MalformedPayload {
            expected: r.pos,
            actual: buf.len(),
        });
    }

    Ok(graph)
}

/// Decode an edge label the ordinary (non-width-expanding) way, dispatched
/// on `variant`. This is the deserializer most callers inject — everywhere
/// except the reduction filter's width-expanding path.
pub fn plain_edge_deserializer(variant: EdgeVariant) -> impl FnMut(&[u8]) -> Result<EdgeLabel> {
    move |bytes: &[u8]| match variant {
        EdgeVariant::Bitvector => Ok(EdgeLabel::Bitvector(crate::bitvector::BitVector::deserialize(
            bytes,
        )?)),
        EdgeVariant::CountAndRepresentative => Ok(EdgeLabel::CountAndRepresentative(
            crate::bitvector::CountAndRepresentative::deserialize(bytes)?,
        )),
    }
}
