// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::filename::{disambiguate, snapshot_file_name};
use crate::runtime::{
    fatal_handler, FatalErrorHooks, FatalNotification, HeapProfiler, RuntimeError,
    SerializationFormat,
};
use crate::sink::ChunkedFileSink;
use crate::DumpObserver;
use anyhow::Result;
use oomdump_config::HookConfig;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Acknowledgment returned by [`FatalHookController::install`].
pub const INSTALL_ACK: &str = "done";

pub const TRIGGER_LOCATION: &str = "here";
pub const TRIGGER_MESSAGE: &str = "and there";

/// Same-tick collisions tolerated before giving up on a filename.
const MAX_NAME_ATTEMPTS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HookState {
    Disarmed = 0,
    Armed = 1,
    Terminating = 2,
}

impl HookState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => HookState::Armed,
            2 => HookState::Terminating,
            _ => HookState::Disarmed,
        }
    }
}

impl fmt::Display for HookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookState::Disarmed => write!(f, "disarmed"),
            HookState::Armed => write!(f, "armed"),
            HookState::Terminating => write!(f, "terminating"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("Failed to open snapshot file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Runtime could not produce a heap snapshot: {0}")]
    Snapshot(#[source] RuntimeError),
    #[error("Snapshot stream aborted after {written} bytes")]
    Aborted { written: u64 },
    #[error("Snapshot serialization failed: {0}")]
    Serialize(#[source] RuntimeError),
    #[error("Failed to close snapshot file: {0}")]
    Close(#[source] io::Error),
}

/// What the dump phase left on disk.
#[derive(Debug)]
pub enum DumpOutcome {
    Complete {
        path: PathBuf,
        bytes: u64,
    },
    Partial {
        path: PathBuf,
        bytes: u64,
        reason: DumpError,
    },
    NotWritten {
        reason: DumpError,
    },
}

impl DumpOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            DumpOutcome::Complete { path, .. } | DumpOutcome::Partial { path, .. } => Some(path),
            DumpOutcome::NotWritten { .. } => None,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        match self {
            DumpOutcome::Complete { bytes, .. } | DumpOutcome::Partial { bytes, .. } => *bytes,
            DumpOutcome::NotWritten { .. } => 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, DumpOutcome::Complete { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            DumpOutcome::Complete { .. } => "complete",
            DumpOutcome::Partial { .. } => "partial",
            DumpOutcome::NotWritten { .. } => "not written",
        }
    }
}

/// Ends the process once the fatal sequence is over.
pub trait Terminator: Send + Sync {
    fn terminate(&self, code: i32);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl Terminator for ProcessExit {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Snapshot destination that can be made durable before the process exits.
trait SnapshotFile: Write {
    fn sync(&mut self) -> io::Result<()>;
}

impl SnapshotFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Turns a fatal notification into a heap snapshot file, then ends the
/// process. Every failure skips the remaining dump steps but never skips
/// termination.
pub struct FatalHookController {
    config: HookConfig,
    chunk_size: usize,
    state: AtomicU8,
    dumping_thread: Mutex<Option<ThreadId>>,
    terminator: Arc<dyn Terminator>,
    observers: Vec<Arc<dyn DumpObserver>>,
}

impl fmt::Debug for FatalHookController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatalHookController")
            .field("config", &self.config)
            .field("chunk_size", &self.chunk_size)
            .field("state", &self.state())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl FatalHookController {
    pub fn new(config: HookConfig, terminator: Arc<dyn Terminator>) -> Result<Self> {
        config.validate()?;
        let chunk_size = config.chunk_size_bytes()?;
        Ok(Self {
            config,
            chunk_size,
            state: AtomicU8::new(HookState::Disarmed as u8),
            dumping_thread: Mutex::new(None),
            terminator,
            observers: Vec::new(),
        })
    }

    /// Controller that exits the process after the dump.
    pub fn from_config(config: HookConfig) -> Result<Self> {
        Self::new(config, Arc::new(ProcessExit))
    }

    pub fn with_observer(mut self, observer: Arc<dyn DumpObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    pub fn state(&self) -> HookState {
        HookState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Registers this controller as the runtime's fatal-error handler,
    /// replacing whatever was there.
    pub fn install(self: &Arc<Self>, hooks: &mut dyn FatalErrorHooks) -> &'static str {
        let controller = Arc::clone(self);
        hooks.set_fatal_error_handler(fatal_handler(move |profiler, notification| {
            controller.on_fatal(profiler, notification)
        }));
        let _ = self.state.compare_exchange(
            HookState::Disarmed as u8,
            HookState::Armed as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        info!(
            "Fatal error hook armed (output dir {:?}, {} naming)",
            self.config.output_dir, self.config.filename_policy
        );
        INSTALL_ACK
    }

    pub fn uninstall(&self, hooks: &mut dyn FatalErrorHooks) {
        hooks.clear_fatal_error_handler();
        let _ = self.state.compare_exchange(
            HookState::Armed as u8,
            HookState::Disarmed as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        debug!("Fatal error hook removed");
    }

    /// Runs the fatal sequence with a synthetic notification.
    pub fn trigger(&self, profiler: &dyn HeapProfiler) {
        self.on_fatal(
            profiler,
            &FatalNotification::new(Some(TRIGGER_LOCATION), TRIGGER_MESSAGE),
        );
    }

    /// The installed callback. Always ends in `Terminator::terminate`.
    pub fn on_fatal(&self, profiler: &dyn HeapProfiler, notification: &FatalNotification<'_>) {
        self.run_fatal(notification, || self.dump_heap(profiler));
    }

    fn run_fatal(
        &self,
        notification: &FatalNotification<'_>,
        dump: impl FnOnce() -> DumpOutcome,
    ) {
        let previous = HookState::from_u8(
            self.state
                .swap(HookState::Terminating as u8, Ordering::SeqCst),
        );

        emit_stderr(format_args!("{}", notification));

        if previous == HookState::Terminating {
            if self.is_dumping_thread() {
                warn!("Fatal error raised during a heap dump on the same thread; skipping dump");
                self.terminator.terminate(self.config.exit_code);
                return;
            }
            // The first sequence ends the process once its dump is closed.
            warn!("Fatal error raised on another thread during a heap dump; waiting");
            park_forever();
        }

        if let Ok(mut owner) = self.dumping_thread.lock() {
            *owner = Some(thread::current().id());
        }
        emit_stderr(format_args!("Generating HeapDump"));

        let outcome = dump();
        match &outcome {
            DumpOutcome::Complete { path, bytes } => {
                info!("Heap snapshot written to {:?} ({} bytes)", path, bytes)
            }
            DumpOutcome::Partial {
                path,
                bytes,
                reason,
            } => warn!(
                "Heap snapshot {:?} is incomplete ({} bytes): {}",
                path, bytes, reason
            ),
            DumpOutcome::NotWritten { reason } => error!("Heap snapshot not written: {}", reason),
        }

        self.terminator.terminate(self.config.exit_code);
    }

    fn is_dumping_thread(&self) -> bool {
        self.dumping_thread
            .lock()
            .map(|owner| *owner == Some(thread::current().id()))
            .unwrap_or(true)
    }

    /// Creates the snapshot file and streams a fresh heap graph into it.
    /// Never terminates the process.
    pub fn dump_heap(&self, profiler: &dyn HeapProfiler) -> DumpOutcome {
        let name = snapshot_file_name(
            self.config.filename_policy,
            &self.config.file_prefix,
            SystemTime::now(),
        );

        match self.create_snapshot_file(&name) {
            Ok((path, file)) => self.dump_into(profiler, path, file),
            Err(reason) => self.finish(DumpOutcome::NotWritten { reason }),
        }
    }

    fn dump_into<F: SnapshotFile>(
        &self,
        profiler: &dyn HeapProfiler,
        path: PathBuf,
        mut file: F,
    ) -> DumpOutcome {
        for observer in &self.observers {
            observer.on_dump_start(&path);
        }

        let (bytes, written) = self.write_snapshot(profiler, &mut file);
        let closed = close(file);

        let outcome = match (written, closed) {
            (Err(reason @ DumpError::Snapshot(_)), _) => {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove empty snapshot file {:?}: {}", path, e);
                }
                DumpOutcome::NotWritten { reason }
            }
            (Err(reason), _) => DumpOutcome::Partial {
                path,
                bytes,
                reason,
            },
            (Ok(()), Err(e)) => DumpOutcome::Partial {
                path,
                bytes,
                reason: DumpError::Close(e),
            },
            (Ok(()), Ok(())) => DumpOutcome::Complete { path, bytes },
        };
        self.finish(outcome)
    }

    fn finish(&self, outcome: DumpOutcome) -> DumpOutcome {
        for observer in &self.observers {
            observer.on_dump_end(&outcome);
        }
        outcome
    }

    fn write_snapshot<W: Write>(
        &self,
        profiler: &dyn HeapProfiler,
        out: &mut W,
    ) -> (u64, Result<(), DumpError>) {
        let snapshot = match profiler.take_heap_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => return (0, Err(DumpError::Snapshot(e))),
        };
        debug!(
            "Serializing heap snapshot: {} nodes, {} edges, {} byte chunks",
            snapshot.node_count(),
            snapshot.edge_count(),
            self.chunk_size
        );

        let mut sink = ChunkedFileSink::new(out)
            .with_chunk_size(self.chunk_size)
            .with_observers(&self.observers);
        let result = snapshot.serialize(&mut sink, SerializationFormat::Json);
        let written = sink.bytes_written();

        let result = result.map_err(|e| match e {
            RuntimeError::StreamAborted { .. } => DumpError::Aborted { written },
            other => DumpError::Serialize(other),
        });
        (written, result)
    }

    /// Opens a file that did not exist before. A name taken within the same
    /// clock tick gets a numeric suffix instead of being overwritten.
    fn create_snapshot_file(&self, name: &str) -> Result<(PathBuf, File), DumpError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                name.to_string()
            } else {
                disambiguate(name, attempt)
            };
            let path = self.config.output_dir.join(candidate);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!("Created snapshot file {:?}", path);
                    return Ok((path, file));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("Snapshot file {:?} already exists", path);
                }
                Err(source) => return Err(DumpError::Open { path, source }),
            }
        }

        Err(DumpError::Open {
            path: self
                .config
                .output_dir
                .join(disambiguate(name, MAX_NAME_ATTEMPTS - 1)),
            source: io::ErrorKind::AlreadyExists.into(),
        })
    }
}

fn close<F: SnapshotFile>(mut file: F) -> io::Result<()> {
    file.flush()?;
    file.sync()
}

fn park_forever() -> ! {
    loop {
        thread::park();
    }
}

fn emit_stderr(line: fmt::Arguments<'_>) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "{}", line);
    let _ = stderr.flush();
}
