// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod filename;
pub mod heap;
pub mod hook;
pub mod metrics;
pub mod runtime;
pub mod sink;
pub mod snapshot;

use std::path::Path;

mod tests;

pub use hook::{DumpError, DumpOutcome, FatalHookController, HookState, ProcessExit, Terminator};
pub use runtime::{FatalNotification, HeapProfiler, OutputStream, WriteResult};
pub use sink::ChunkedFileSink;

/// Trait for observing a heap dump as it is written.
pub trait DumpObserver: std::fmt::Debug + Send + Sync {
    fn on_dump_start(&self, _path: &Path) {}
    fn on_chunk(&self, _bytes: usize, _result: WriteResult) {}
    fn on_dump_end(&self, _outcome: &DumpOutcome) {}
}
