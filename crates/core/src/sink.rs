// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::runtime::{OutputStream, WriteResult};
use crate::DumpObserver;
use oomdump_config::DEFAULT_CHUNK_SIZE;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// Persists serializer chunks to a borrowed file handle.
///
/// The sink never owns the handle: closing it is up to whoever opened it.
/// A short write aborts the stream and every later chunk is refused.
pub struct ChunkedFileSink<'a, W: Write> {
    file: &'a mut W,
    chunk_size: usize,
    written: u64,
    aborted: bool,
    observers: &'a [Arc<dyn DumpObserver>],
}

impl<'a, W: Write> ChunkedFileSink<'a, W> {
    pub fn new(file: &'a mut W) -> Self {
        Self {
            file,
            chunk_size: DEFAULT_CHUNK_SIZE,
            written: 0,
            aborted: false,
            observers: &[],
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_observers(mut self, observers: &'a [Arc<dyn DumpObserver>]) -> Self {
        self.observers = observers;
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Drives `Write::write` until `data` is fully written or the stream
    /// stops accepting bytes. Returns how many bytes made it.
    fn write_all_or_stop(&mut self, data: &[u8]) -> usize {
        let mut off = 0;
        while off < data.len() {
            match self.file.write(&data[off..]) {
                Ok(0) => {
                    debug!("Snapshot stream reached end of file after {} bytes", off);
                    break;
                }
                Ok(n) => off += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Snapshot write failed after {} of {} bytes: {}", off, data.len(), e);
                    break;
                }
            }
        }
        off
    }
}

impl<W: Write> OutputStream for ChunkedFileSink<'_, W> {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn write_chunk(&mut self, data: &[u8]) -> WriteResult {
        if self.aborted {
            return WriteResult::Abort;
        }

        let off = self.write_all_or_stop(data);
        self.written += off as u64;

        let result = if off == data.len() {
            WriteResult::Continue
        } else {
            self.aborted = true;
            WriteResult::Abort
        };

        for observer in self.observers {
            observer.on_chunk(off, result);
        }
        result
    }

    fn end_of_stream(&mut self) {
        if let Err(e) = self.file.flush() {
            warn!("Failed to flush snapshot stream: {}", e);
        }
    }
}
