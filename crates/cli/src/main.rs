// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use oomdump_config::{parse_size, FilenamePolicy, HookConfig};
use oomdump_core::heap::{ManagedHeap, ObjectId};
use oomdump_core::metrics::DumpMetrics;
use oomdump_core::snapshot::{EdgeType, NodeType};
use oomdump_core::FatalHookController;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// OOMDump - writes a heap snapshot when the runtime hits a fatal error
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a hook configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory the snapshot is written to (overrides the config file)
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Filename policy: epoch_micros or local_time (overrides the config file)
    #[arg(long, global = true)]
    policy: Option<FilenamePolicy>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register the fatal-error hook and print the acknowledgment
    Install,
    /// Invoke the fatal-error handler with a synthetic notification
    Trigger,
    /// Allocate on a bounded heap until it runs out of memory
    Run {
        /// Heap limit, e.g. "1MiB"
        #[arg(long, default_value = "1MiB")]
        heap_limit: String,

        /// Size of each retained allocation, e.g. "4KiB"
        #[arg(long, default_value = "4KiB")]
        object_size: String,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<HookConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading hook config: {:?}", path);
            HookConfig::from_file(path)?
        }
        None => HookConfig::default(),
    };
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(policy) = cli.policy {
        config.filename_policy = policy;
    }
    config.validate()?;
    Ok(config)
}

/// A small application-shaped object graph: a global object holding a
/// request cache and a handler closure. Returns the global object.
fn populate(heap: &mut ManagedHeap) -> anyhow::Result<ObjectId> {
    let global = heap.allocate(NodeType::Object, "Window / global", 128)?;
    let cache = heap.allocate(NodeType::Object, "Map", 64)?;
    let table = heap.allocate(NodeType::Array, "(object elements)", 96)?;
    let handler = heap.allocate(NodeType::Closure, "handleRequest", 72)?;
    let context = heap.allocate(NodeType::Hidden, "system / Context", 48)?;

    heap.add_reference(global, EdgeType::Property, "requestCache", cache)?;
    heap.add_reference(global, EdgeType::Property, "handleRequest", handler)?;
    heap.add_reference(cache, EdgeType::Internal, "table", table)?;
    heap.add_reference(handler, EdgeType::Internal, "context", context)?;
    heap.add_reference(context, EdgeType::Context, "cache", cache)?;

    for i in 0..4u32 {
        let entry = heap.allocate(NodeType::String, format!("/api/items/{}", i), 32)?;
        heap.add_element(table, i, entry)?;
    }

    heap.add_root(global)?;
    Ok(global)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    let config = load_config(&cli)?;
    let hook = Arc::new(
        FatalHookController::from_config(config)?.with_observer(Arc::new(DumpMetrics::new())),
    );

    match cli.command {
        Command::Install => {
            let mut heap = ManagedHeap::new(parse_size("1MiB")?);
            populate(&mut heap)?;
            let ack = hook.install(&mut heap);
            debug!("Snapshots go to {:?}", hook.config().output_dir);
            println!("{}", ack);
            Ok(())
        }
        Command::Trigger => {
            let mut heap = ManagedHeap::new(parse_size("1MiB")?);
            populate(&mut heap)?;
            hook.install(&mut heap);
            hook.trigger(&heap);
            bail!("fatal error handler returned")
        }
        Command::Run {
            heap_limit,
            object_size,
        } => {
            let limit = parse_size(&heap_limit).context("Invalid --heap-limit")?;
            let size = parse_size(&object_size).context("Invalid --object-size")?;
            if size == 0 {
                bail!("--object-size must be greater than zero");
            }

            let mut heap = ManagedHeap::new(limit);
            let mut tail = populate(&mut heap)?;
            hook.install(&mut heap);
            info!(
                "Allocating {} byte objects on a {} byte heap",
                size,
                heap.limit()
            );

            for i in 0u64.. {
                let next = heap.allocate(NodeType::Object, "RetainedBuffer", size)?;
                heap.add_reference(tail, EdgeType::Property, "next", next)?;
                tail = next;
                debug!("Allocation {}: {} bytes in use", i, heap.used_bytes());
            }
            bail!("heap never ran out of memory")
        }
    }
}
