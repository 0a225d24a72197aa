#[cfg(test)]
mod tests {
    use crate::heap::{ManagedHeap, OOM_LOCATION};
    use crate::metrics::DumpMetrics;
    use crate::runtime::{HeapProfiler, RuntimeError, SerializationFormat};
    use crate::snapshot::{EdgeType, NodeType, SnapshotDocument};
    use crate::{ChunkedFileSink, FatalHookController, HookState, Terminator};
    use oomdump_config::HookConfig;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::{SystemTime, UNIX_EPOCH};

    #[derive(Default)]
    struct RecordingExit {
        codes: Mutex<Vec<i32>>,
    }

    impl Terminator for RecordingExit {
        fn terminate(&self, code: i32) {
            self.codes.lock().unwrap().push(code);
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("oomdump-core-{}-{}", tag, nonce));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn only_snapshot(dir: &Path) -> PathBuf {
        let files: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().ends_with(".heapsnapshot"))
            .collect();
        assert_eq!(files.len(), 1, "expected exactly one snapshot in {:?}", dir);
        files[0].clone()
    }

    /// Session -> user "alice", Session -> items [alice, Token]
    fn session_heap(limit: u64) -> ManagedHeap {
        let mut heap = ManagedHeap::new(limit);
        let session = heap.allocate(NodeType::Object, "Session", 64).unwrap();
        let user = heap.allocate(NodeType::String, "alice", 24).unwrap();
        let items = heap.allocate(NodeType::Array, "(items)", 32).unwrap();
        let token = heap.allocate(NodeType::Closure, "Token", 40).unwrap();
        heap.add_reference(session, EdgeType::Property, "user", user).unwrap();
        heap.add_reference(session, EdgeType::Property, "items", items).unwrap();
        heap.add_element(items, 0, user).unwrap();
        heap.add_element(items, 1, token).unwrap();
        heap.add_root(session).unwrap();
        heap
    }

    #[test]
    fn test_out_of_memory_dumps_through_installed_hook() {
        let dir = scratch_dir("oom");
        let exit = Arc::new(RecordingExit::default());
        let config = HookConfig {
            output_dir: dir.clone(),
            ..Default::default()
        };
        let hook = Arc::new(FatalHookController::new(config, exit.clone()).unwrap());

        let mut heap = session_heap(200);
        assert_eq!(hook.install(&mut heap), "done");
        let expected = heap.heap_graph().to_document();

        // 160 bytes in use, this one does not fit
        let err = heap.allocate(NodeType::Object, "Overflow", 100).unwrap_err();
        assert!(err.to_string().contains("Out of memory"));

        assert_eq!(*exit.codes.lock().unwrap(), vec![1]);
        assert_eq!(hook.state(), HookState::Terminating);

        let path = only_snapshot(&dir);
        let doc: SnapshotDocument = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc, expected);
        assert_eq!(doc.snapshot.node_count, 5);
        assert_eq!(doc.snapshot.edge_count, 5);
        assert!(!doc.strings.iter().any(|s| s == "Overflow"));
        assert!(!doc.strings.iter().any(|s| s == OOM_LOCATION));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_small_chunks_preserve_content() {
        let dir = scratch_dir("chunks");
        let exit = Arc::new(RecordingExit::default());
        let metrics = Arc::new(DumpMetrics::new());
        let config = HookConfig {
            output_dir: dir.clone(),
            chunk_size: "64B".to_string(),
            ..Default::default()
        };
        let hook = FatalHookController::new(config, exit.clone())
            .unwrap()
            .with_observer(metrics.clone());

        let mut heap = ManagedHeap::new(1 << 20);
        let mut prev = heap.allocate(NodeType::Object, "Node0", 16).unwrap();
        heap.add_root(prev).unwrap();
        for i in 1..50 {
            let next = heap.allocate(NodeType::Object, format!("Node{}", i), 16).unwrap();
            heap.add_reference(prev, EdgeType::Property, "next", next).unwrap();
            prev = next;
        }

        let outcome = hook.dump_heap(&heap);
        assert!(outcome.is_complete());

        let path = only_snapshot(&dir);
        let bytes = fs::read(&path).unwrap();
        assert_eq!(outcome.bytes_written(), bytes.len() as u64);
        assert_eq!(metrics.get_bytes(), bytes.len() as u64);
        assert!(metrics.get_chunks() >= (bytes.len() as u64) / 64);
        assert_eq!(metrics.get_aborted_chunks(), 0);

        let doc: SnapshotDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc, heap.heap_graph().to_document());
        // dump_heap alone never terminates
        assert!(exit.codes.lock().unwrap().is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_full_device_aborts_serialization() {
        let mut full = fs::OpenOptions::new().write(true).open("/dev/full").unwrap();
        let heap = session_heap(1024);
        let snapshot = heap.take_heap_snapshot().unwrap();

        let mut sink = ChunkedFileSink::new(&mut full);
        let err = snapshot
            .serialize(&mut sink, SerializationFormat::Json)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::StreamAborted { written: 0 }));
        assert!(sink.is_aborted());
        assert_eq!(sink.bytes_written(), 0);
    }
}
