// OOMDump - Fatal Heap Snapshot Writer
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use chrono::{DateTime, Local};
use oomdump_config::FilenamePolicy;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SNAPSHOT_SUFFIX: &str = ".heapsnapshot";

/// Derives the snapshot filename for a fatal event observed at `now`.
pub fn snapshot_file_name(policy: FilenamePolicy, prefix: &str, now: SystemTime) -> String {
    // A clock before the epoch still yields a usable name.
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    match policy {
        FilenamePolicy::EpochMicros => format!(
            "{}-{}.{}{}",
            prefix,
            since_epoch.as_secs(),
            since_epoch.subsec_micros(),
            SNAPSHOT_SUFFIX
        ),
        FilenamePolicy::LocalTime => {
            let local: DateTime<Local> = now.into();
            format!(
                "{}-{}.{:06}{}",
                prefix,
                local.format("%Y%m%d-%H%M%S"),
                since_epoch.subsec_micros(),
                SNAPSHOT_SUFFIX
            )
        }
    }
}

/// `heapdump-1.2.heapsnapshot` -> `heapdump-1.2-<attempt>.heapsnapshot`
pub fn disambiguate(name: &str, attempt: u32) -> String {
    match name.strip_suffix(SNAPSHOT_SUFFIX) {
        Some(stem) => format!("{}-{}{}", stem, attempt, SNAPSHOT_SUFFIX),
        None => format!("{}-{}", name, attempt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_epoch_micros_name() {
        let now = UNIX_EPOCH + Duration::new(1_700_000_000, 42_123_000);
        let name = snapshot_file_name(FilenamePolicy::EpochMicros, "heapdump", now);
        assert_eq!(name, "heapdump-1700000000.42123.heapsnapshot");
    }

    #[test]
    fn test_local_time_name() {
        let now = UNIX_EPOCH + Duration::new(1_700_000_000, 7_000);
        let name = snapshot_file_name(FilenamePolicy::LocalTime, "worker", now);
        assert!(name.starts_with("worker-"));
        assert!(name.ends_with(".000007.heapsnapshot"));
        // worker-YYYYMMDD-HHMMSS.uuuuuu.heapsnapshot
        let stamp = &name["worker-".len()..name.len() - SNAPSHOT_SUFFIX.len()];
        assert_eq!(stamp.len(), "YYYYMMDD-HHMMSS.uuuuuu".len());
    }

    #[test]
    fn test_distinct_ticks_give_distinct_names() {
        let a = UNIX_EPOCH + Duration::new(1_700_000_000, 1_000);
        let b = a + Duration::from_micros(1);
        for policy in [FilenamePolicy::EpochMicros, FilenamePolicy::LocalTime] {
            assert_ne!(
                snapshot_file_name(policy, "heapdump", a),
                snapshot_file_name(policy, "heapdump", b)
            );
        }
    }

    #[test]
    fn test_before_epoch() {
        let now = UNIX_EPOCH - Duration::from_secs(5);
        let name = snapshot_file_name(FilenamePolicy::EpochMicros, "heapdump", now);
        assert_eq!(name, "heapdump-0.0.heapsnapshot");
    }

    #[test]
    fn test_disambiguate() {
        assert_eq!(
            disambiguate("heapdump-1.2.heapsnapshot", 3),
            "heapdump-1.2-3.heapsnapshot"
        );
        assert_eq!(disambiguate("odd", 1), "odd-1");
    }
}
