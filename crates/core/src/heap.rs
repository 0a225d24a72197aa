// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::runtime::{
    FatalErrorHandler, FatalErrorHooks, FatalNotification, HeapProfiler, HeapSnapshot,
    RuntimeError,
};
use crate::snapshot::{EdgeName, EdgeType, GraphEdge, GraphNode, HeapGraph, NodeType};
use std::fmt;
use tracing::{debug, error};

pub const OOM_LOCATION: &str = "CALL_AND_RETRY_LAST";
pub const OOM_MESSAGE: &str = "Allocation failed - JavaScript heap out of memory";

const ROOT_NAME: &str = "(GC roots)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u32);

impl ObjectId {
    fn index(self) -> usize {
        self.0 as usize
    }

    /// Stable id reported in snapshots. Odd numbers, 1 is the root.
    pub fn snapshot_id(self) -> u64 {
        (self.0 as u64 + 1) * 2 + 1
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.snapshot_id())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeapError {
    #[error("Out of memory: requested {requested} bytes with {used} of {limit} in use")]
    OutOfMemory { requested: u64, used: u64, limit: u64 },
    #[error("Unknown object {0}")]
    UnknownObject(ObjectId),
}

#[derive(Debug)]
struct Reference {
    kind: EdgeType,
    name: EdgeName,
    to: ObjectId,
}

#[derive(Debug)]
struct HeapObject {
    kind: NodeType,
    name: String,
    self_size: u64,
    refs: Vec<Reference>,
}

/// A bounded in-process heap of named objects and references.
///
/// Allocation past the limit is a fatal condition: the registered fatal-error
/// handler runs, or without one the process aborts.
pub struct ManagedHeap {
    objects: Vec<HeapObject>,
    roots: Vec<ObjectId>,
    limit: u64,
    used: u64,
    fatal_handler: Option<FatalErrorHandler>,
    snapshot_failure: Option<String>,
}

impl fmt::Debug for ManagedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedHeap")
            .field("objects", &self.objects.len())
            .field("roots", &self.roots.len())
            .field("limit", &self.limit)
            .field("used", &self.used)
            .field("armed", &self.fatal_handler.is_some())
            .finish()
    }
}

impl ManagedHeap {
    pub fn new(limit: u64) -> Self {
        Self {
            objects: Vec::new(),
            roots: Vec::new(),
            limit,
            used: 0,
            fatal_handler: None,
            snapshot_failure: None,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used_bytes(&self) -> u64 {
        self.used
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn has_fatal_handler(&self) -> bool {
        self.fatal_handler.is_some()
    }

    /// Makes every later snapshot request fail with `reason`.
    pub fn fail_snapshots(&mut self, reason: impl Into<String>) {
        self.snapshot_failure = Some(reason.into());
    }

    pub fn allocate(
        &mut self,
        kind: NodeType,
        name: impl Into<String>,
        size: u64,
    ) -> Result<ObjectId, HeapError> {
        if self.used.saturating_add(size) > self.limit {
            debug!(
                "Allocation of {} bytes exceeds heap limit ({} of {} in use)",
                size, self.used, self.limit
            );
            self.report_fatal(Some(OOM_LOCATION), OOM_MESSAGE);
            return Err(HeapError::OutOfMemory {
                requested: size,
                used: self.used,
                limit: self.limit,
            });
        }

        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(HeapObject {
            kind,
            name: name.into(),
            self_size: size,
            refs: Vec::new(),
        });
        self.used += size;
        Ok(id)
    }

    pub fn add_reference(
        &mut self,
        from: ObjectId,
        kind: EdgeType,
        name: &str,
        to: ObjectId,
    ) -> Result<(), HeapError> {
        self.push_reference(from, kind, EdgeName::Named(name.to_string()), to)
    }

    pub fn add_element(
        &mut self,
        from: ObjectId,
        index: u32,
        to: ObjectId,
    ) -> Result<(), HeapError> {
        self.push_reference(from, EdgeType::Element, EdgeName::Index(index), to)
    }

    pub fn add_root(&mut self, id: ObjectId) -> Result<(), HeapError> {
        self.check(id)?;
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
        Ok(())
    }

    /// Reports a fatal condition to the registered handler. Handlers are not
    /// expected to return; if one does, control comes back to the caller.
    pub fn report_fatal(&self, location: Option<&str>, message: &str) {
        let notification = FatalNotification::new(location, message);
        match self.fatal_handler.clone() {
            Some(handler) => handler(self as &dyn HeapProfiler, &notification),
            None => {
                error!("No fatal error handler installed");
                eprintln!("{}", notification);
                std::process::abort();
            }
        }
    }

    /// Builds the graph: node 0 is the synthetic root, object `i` is node `i + 1`.
    pub fn heap_graph(&self) -> HeapGraph {
        let mut nodes = Vec::with_capacity(self.objects.len() + 1);

        nodes.push(GraphNode {
            kind: NodeType::Synthetic,
            name: ROOT_NAME.to_string(),
            id: 1,
            self_size: 0,
            edges: self
                .roots
                .iter()
                .enumerate()
                .map(|(i, root)| GraphEdge {
                    kind: EdgeType::Element,
                    name: EdgeName::Index(i as u32),
                    to: root.index() + 1,
                })
                .collect(),
        });

        for (i, obj) in self.objects.iter().enumerate() {
            nodes.push(GraphNode {
                kind: obj.kind,
                name: obj.name.clone(),
                id: ObjectId(i as u32).snapshot_id(),
                self_size: obj.self_size,
                edges: obj
                    .refs
                    .iter()
                    .map(|r| GraphEdge {
                        kind: r.kind,
                        name: r.name.clone(),
                        to: r.to.index() + 1,
                    })
                    .collect(),
            });
        }

        HeapGraph { nodes }
    }

    fn push_reference(
        &mut self,
        from: ObjectId,
        kind: EdgeType,
        name: EdgeName,
        to: ObjectId,
    ) -> Result<(), HeapError> {
        self.check(to)?;
        let obj = self
            .objects
            .get_mut(from.index())
            .ok_or(HeapError::UnknownObject(from))?;
        obj.refs.push(Reference { kind, name, to });
        Ok(())
    }

    fn check(&self, id: ObjectId) -> Result<(), HeapError> {
        if id.index() < self.objects.len() {
            Ok(())
        } else {
            Err(HeapError::UnknownObject(id))
        }
    }
}

impl HeapProfiler for ManagedHeap {
    fn take_heap_snapshot(&self) -> Result<Box<dyn HeapSnapshot + '_>, RuntimeError> {
        if let Some(reason) = &self.snapshot_failure {
            return Err(RuntimeError::SnapshotUnavailable(reason.clone()));
        }
        let graph = self.heap_graph();
        debug!(
            "Captured heap graph: {} nodes, {} edges",
            graph.nodes.len(),
            graph.edge_total()
        );
        Ok(Box::new(graph))
    }
}

impl FatalErrorHooks for ManagedHeap {
    fn set_fatal_error_handler(&mut self, handler: FatalErrorHandler) {
        self.fatal_handler = Some(handler);
    }

    fn clear_fatal_error_handler(&mut self) {
        self.fatal_handler = None;
    }
}
