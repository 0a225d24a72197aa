// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::fmt;
use std::sync::Arc;

/// Reply of an [`OutputStream`] to a pushed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    #[default]
    Json,
}

/// Destination for a runtime-driven push of serialized bytes.
pub trait OutputStream {
    /// Preferred upper bound for a single pushed chunk.
    fn chunk_size(&self) -> usize;

    fn write_chunk(&mut self, data: &[u8]) -> WriteResult;

    /// Called once after the last chunk of a successful serialization.
    fn end_of_stream(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Heap snapshot unavailable: {0}")]
    SnapshotUnavailable(String),
    #[error("Output stream aborted after {written} bytes")]
    StreamAborted { written: u64 },
    #[error("Failed to encode heap snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A captured graph of live heap objects. Only valid while the runtime that
/// produced it is borrowed.
pub trait HeapSnapshot {
    fn node_count(&self) -> usize;
    fn edge_count(&self) -> usize;
    fn serialize(
        &self,
        stream: &mut dyn OutputStream,
        format: SerializationFormat,
    ) -> Result<(), RuntimeError>;
}

/// Source of heap snapshots. The hook never walks the heap itself.
pub trait HeapProfiler {
    fn take_heap_snapshot(&self) -> Result<Box<dyn HeapSnapshot + '_>, RuntimeError>;
}

/// What the runtime knows about a fatal condition when it gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatalNotification<'a> {
    pub location: Option<&'a str>,
    pub message: &'a str,
}

impl<'a> FatalNotification<'a> {
    pub fn new(location: Option<&'a str>, message: &'a str) -> Self {
        Self { location, message }
    }
}

impl fmt::Display for FatalNotification<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(location) => write!(f, "FATAL ERROR: {} {}", location, self.message),
            None => write!(f, "FATAL ERROR: {}", self.message),
        }
    }
}

/// Callback run by the runtime on a fatal condition. Handlers are not
/// expected to return.
pub type FatalErrorHandler =
    Arc<dyn Fn(&dyn HeapProfiler, &FatalNotification<'_>) + Send + Sync>;

/// Wraps a closure as a [`FatalErrorHandler`].
pub fn fatal_handler<F>(f: F) -> FatalErrorHandler
where
    F: Fn(&dyn HeapProfiler, &FatalNotification<'_>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The runtime's single fatal-error handler slot.
pub trait FatalErrorHooks {
    /// Replaces any previously registered handler.
    fn set_fatal_error_handler(&mut self, handler: FatalErrorHandler);
    fn clear_fatal_error_handler(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_with_location() {
        let n = FatalNotification::new(Some("here"), "and there");
        assert_eq!(n.to_string(), "FATAL ERROR: here and there");
    }

    #[test]
    fn test_notification_without_location() {
        let n = FatalNotification::new(None, "heap corrupted");
        assert_eq!(n.to_string(), "FATAL ERROR: heap corrupted");
    }
}
