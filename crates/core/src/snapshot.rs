// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::runtime::{HeapSnapshot, OutputStream, RuntimeError, SerializationFormat, WriteResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::io;
use tracing::debug;

pub const NODE_FIELDS: [&str; 5] = ["type", "name", "id", "self_size", "edge_count"];
pub const EDGE_FIELDS: [&str; 3] = ["type", "name_or_index", "to_node"];

const NODE_TYPE_NAMES: [&str; 10] = [
    "hidden", "array", "string", "object", "code", "closure", "regexp", "number", "native",
    "synthetic",
];
const EDGE_TYPE_NAMES: [&str; 7] = [
    "context", "element", "property", "internal", "hidden", "shortcut", "weak",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Hidden = 0,
    Array = 1,
    String = 2,
    Object = 3,
    Code = 4,
    Closure = 5,
    Regexp = 6,
    Number = 7,
    Native = 8,
    Synthetic = 9,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    Context = 0,
    Element = 1,
    Property = 2,
    Internal = 3,
    Hidden = 4,
    Shortcut = 5,
    Weak = 6,
}

impl EdgeType {
    /// Element and hidden edges carry an index instead of a name.
    fn is_indexed(self) -> bool {
        matches!(self, EdgeType::Element | EdgeType::Hidden)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeName {
    Named(String),
    Index(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub kind: EdgeType,
    pub name: EdgeName,
    /// Index of the target in `HeapGraph::nodes`
    pub to: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub kind: NodeType,
    pub name: String,
    pub id: u64,
    pub self_size: u64,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapGraph {
    pub nodes: Vec<GraphNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotMeta {
    pub node_fields: Vec<String>,
    pub node_types: Vec<serde_json::Value>,
    pub edge_fields: Vec<String>,
    pub edge_types: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotHeader {
    pub meta: SnapshotMeta,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Flat `.heapsnapshot` layout: each node is `NODE_FIELDS.len()` integers in
/// `nodes`, each edge `EDGE_FIELDS.len()` integers in `edges`. Names index
/// into `strings` and `to_node` is the target's offset in `nodes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotDocument {
    pub snapshot: SnapshotHeader,
    pub nodes: Vec<u64>,
    pub edges: Vec<u64>,
    pub strings: Vec<String>,
}

impl SnapshotDocument {
    /// Name of the node starting at `offset` in `nodes`.
    pub fn node_name(&self, offset: usize) -> Option<&str> {
        let idx = *self.nodes.get(offset + 1)? as usize;
        self.strings.get(idx).map(String::as_str)
    }
}

fn meta() -> SnapshotMeta {
    SnapshotMeta {
        node_fields: NODE_FIELDS.iter().map(|s| s.to_string()).collect(),
        node_types: vec![
            json!(NODE_TYPE_NAMES),
            json!("string"),
            json!("number"),
            json!("number"),
            json!("number"),
        ],
        edge_fields: EDGE_FIELDS.iter().map(|s| s.to_string()).collect(),
        edge_types: vec![json!(EDGE_TYPE_NAMES), json!("string_or_number"), json!("node")],
    }
}

#[derive(Default)]
struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, u64>,
}

impl StringTable {
    fn intern(&mut self, s: &str) -> u64 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u64;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }
}

impl HeapGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge_total(&self) -> usize {
        self.nodes.iter().map(|n| n.edges.len()).sum()
    }

    pub fn to_document(&self) -> SnapshotDocument {
        let mut strings = StringTable::default();
        strings.intern("");

        let mut nodes = Vec::with_capacity(self.nodes.len() * NODE_FIELDS.len());
        let mut edges = Vec::with_capacity(self.edge_total() * EDGE_FIELDS.len());

        for node in &self.nodes {
            nodes.push(node.kind as u64);
            nodes.push(strings.intern(&node.name));
            nodes.push(node.id);
            nodes.push(node.self_size);
            nodes.push(node.edges.len() as u64);

            for edge in &node.edges {
                edges.push(edge.kind as u64);
                edges.push(match (&edge.name, edge.kind.is_indexed()) {
                    (EdgeName::Index(i), true) => *i as u64,
                    (EdgeName::Index(i), false) => strings.intern(&i.to_string()),
                    (EdgeName::Named(name), false) => strings.intern(name),
                    // Indexed edge kinds never carry a string name.
                    (EdgeName::Named(_), true) => 0,
                });
                edges.push((edge.to * NODE_FIELDS.len()) as u64);
            }
        }

        SnapshotDocument {
            snapshot: SnapshotHeader {
                meta: meta(),
                node_count: self.nodes.len(),
                edge_count: self.edge_total(),
            },
            nodes,
            edges,
            strings: strings.strings,
        }
    }

    /// Encodes the graph as JSON and pushes it through `stream` in chunks of
    /// at most `stream.chunk_size()` bytes. Stops at the first `Abort`.
    pub fn write_json(&self, stream: &mut dyn OutputStream) -> Result<u64, RuntimeError> {
        let document = self.to_document();
        let mut writer = ChunkWriter::new(stream);
        let encoded = serde_json::to_writer(&mut writer, &document);
        match encoded {
            Ok(()) => writer.finish(),
            Err(_) if writer.aborted => Err(RuntimeError::StreamAborted {
                written: writer.pushed,
            }),
            Err(e) => Err(RuntimeError::Encode(e)),
        }
    }
}

impl HeapSnapshot for HeapGraph {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn edge_count(&self) -> usize {
        self.edge_total()
    }

    fn serialize(
        &self,
        stream: &mut dyn OutputStream,
        format: SerializationFormat,
    ) -> Result<(), RuntimeError> {
        match format {
            SerializationFormat::Json => {
                let bytes = self.write_json(stream)?;
                debug!("Serialized heap snapshot: {} bytes", bytes);
                Ok(())
            }
        }
    }
}

/// `io::Write` front for an `OutputStream`: gathers bytes into chunks of the
/// stream's preferred size.
struct ChunkWriter<'a> {
    stream: &'a mut dyn OutputStream,
    buf: Vec<u8>,
    limit: usize,
    pushed: u64,
    aborted: bool,
}

impl<'a> ChunkWriter<'a> {
    fn new(stream: &'a mut dyn OutputStream) -> Self {
        let limit = stream.chunk_size().max(1);
        Self {
            stream,
            buf: Vec::with_capacity(limit),
            limit,
            pushed: 0,
            aborted: false,
        }
    }

    fn push(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        match self.stream.write_chunk(&self.buf) {
            WriteResult::Continue => {
                self.pushed += self.buf.len() as u64;
                self.buf.clear();
                Ok(())
            }
            WriteResult::Abort => {
                self.aborted = true;
                Err(io::Error::new(io::ErrorKind::WriteZero, "output stream aborted"))
            }
        }
    }

    fn finish(mut self) -> Result<u64, RuntimeError> {
        if self.push().is_err() {
            return Err(RuntimeError::StreamAborted {
                written: self.pushed,
            });
        }
        self.stream.end_of_stream();
        Ok(self.pushed)
    }
}

impl io::Write for ChunkWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.aborted {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "output stream aborted"));
        }
        let room = self.limit - self.buf.len();
        let n = data.len().min(room);
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() == self.limit {
            self.push()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
