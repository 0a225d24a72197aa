// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::hook::DumpOutcome;
use crate::runtime::WriteResult;
use crate::DumpObserver;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Default)]
pub struct DumpMetrics {
    chunk_count: AtomicU64,
    byte_count: AtomicU64,
    aborted_chunks: AtomicU64,
    started_at: Mutex<Option<Instant>>,
    last_duration: Mutex<Option<Duration>>,
}

impl DumpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.chunk_count.store(0, Ordering::SeqCst);
        self.byte_count.store(0, Ordering::SeqCst);
        self.aborted_chunks.store(0, Ordering::SeqCst);
    }

    pub fn get_chunks(&self) -> u64 {
        self.chunk_count.load(Ordering::SeqCst)
    }

    pub fn get_bytes(&self) -> u64 {
        self.byte_count.load(Ordering::SeqCst)
    }

    pub fn get_aborted_chunks(&self) -> u64 {
        self.aborted_chunks.load(Ordering::SeqCst)
    }

    /// Duration of the last finished dump, if any.
    pub fn last_duration(&self) -> Option<Duration> {
        self.last_duration.lock().ok().and_then(|d| *d)
    }

    pub fn get_bytes_per_sec(&self) -> f64 {
        match self.last_duration() {
            Some(d) if d.as_secs_f64() > 0.0 => self.get_bytes() as f64 / d.as_secs_f64(),
            _ => 0.0,
        }
    }
}

impl DumpObserver for DumpMetrics {
    fn on_dump_start(&self, _path: &Path) {
        self.reset();
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Instant::now());
        }
    }

    fn on_chunk(&self, bytes: usize, result: WriteResult) {
        self.chunk_count.fetch_add(1, Ordering::SeqCst);
        self.byte_count.fetch_add(bytes as u64, Ordering::SeqCst);
        if result == WriteResult::Abort {
            self.aborted_chunks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_dump_end(&self, outcome: &DumpOutcome) {
        let elapsed = self
            .started_at
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|start| start.elapsed());
        if let Ok(mut last) = self.last_duration.lock() {
            *last = elapsed;
        }

        info!(
            "Heap dump {} ({:?}): {} chunks, {} bytes in {:?} ({:.0} bytes/s)",
            outcome.label(),
            outcome.path(),
            self.get_chunks(),
            self.get_bytes(),
            elapsed.unwrap_or_default(),
            self.get_bytes_per_sec()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_counts_and_aborts() {
        let metrics = DumpMetrics::new();
        metrics.on_dump_start(Path::new("heapdump-1.2.heapsnapshot"));
        metrics.on_chunk(100, WriteResult::Continue);
        metrics.on_chunk(40, WriteResult::Abort);
        assert_eq!(metrics.get_chunks(), 2);
        assert_eq!(metrics.get_bytes(), 140);
        assert_eq!(metrics.get_aborted_chunks(), 1);

        metrics.on_dump_end(&DumpOutcome::Complete {
            path: PathBuf::from("heapdump-1.2.heapsnapshot"),
            bytes: 140,
        });
        assert!(metrics.last_duration().is_some());
    }

    #[test]
    fn test_start_resets_counters() {
        let metrics = DumpMetrics::new();
        metrics.on_chunk(10, WriteResult::Continue);
        metrics.on_dump_start(Path::new("x.heapsnapshot"));
        assert_eq!(metrics.get_chunks(), 0);
        assert_eq!(metrics.get_bytes(), 0);
        assert_eq!(metrics.get_bytes_per_sec(), 0.0);
    }
}
