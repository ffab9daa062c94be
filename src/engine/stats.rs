// Acquisition counters for downloads, cache writes and failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

struct StatsSample {
    at: Instant,
    download_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub download_bps: u64,
    pub downloaded_bytes: u64,
    pub parts_downloaded: u64,
    pub entries_written: u64,
    pub bytes_written: u64,
    pub entries_skipped: u64,
    pub launches_from_ledger: u64,
    pub failures: u64,
}

pub struct AcquisitionStats {
    download_bytes_total: AtomicU64,
    parts_downloaded: AtomicU64,
    entries_written: AtomicU64,
    bytes_written: AtomicU64,
    entries_skipped: AtomicU64,
    launches_from_ledger: AtomicU64,
    failures: AtomicU64,
    last_sample: Mutex<StatsSample>,
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self {
            download_bytes_total: AtomicU64::new(0),
            parts_downloaded: AtomicU64::new(0),
            entries_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            entries_skipped: AtomicU64::new(0),
            launches_from_ledger: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_sample: Mutex::new(StatsSample {
                at: Instant::now(),
                download_bytes: 0,
            }),
        }
    }

    pub fn record_part_downloaded(&self, bytes: u64) {
        self.parts_downloaded.fetch_add(1, Ordering::Relaxed);
        self.download_bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_entry_written(&self, bytes: u64) {
        self.entries_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_entry_skipped(&self) {
        self.entries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ledger_hit(&self) {
        self.launches_from_ledger.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters plus the download rate since the previous snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();
        let current_download = self.download_bytes_total.load(Ordering::Relaxed);

        let download_bps = {
            let mut sample = self.last_sample.lock();
            let elapsed = now.duration_since(sample.at).as_secs_f64();
            let bps = if elapsed > 0.1 {
                ((current_download - sample.download_bytes) as f64 / elapsed) as u64
            } else {
                0
            };
            sample.at = now;
            sample.download_bytes = current_download;
            bps
        };

        StatsSnapshot {
            download_bps,
            downloaded_bytes: current_download,
            parts_downloaded: self.parts_downloaded.load(Ordering::Relaxed),
            entries_written: self.entries_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            entries_skipped: self.entries_skipped.load(Ordering::Relaxed),
            launches_from_ledger: self.launches_from_ledger.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for AcquisitionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = AcquisitionStats::new();
        stats.record_part_downloaded(1000);
        stats.record_part_downloaded(500);
        stats.record_entry_written(200);
        stats.record_entry_written(300);
        stats.record_entry_skipped();
        stats.record_ledger_hit();
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.downloaded_bytes, 1500);
        assert_eq!(snap.parts_downloaded, 2);
        assert_eq!(snap.entries_written, 2);
        assert_eq!(snap.bytes_written, 500);
        assert_eq!(snap.entries_skipped, 1);
        assert_eq!(snap.launches_from_ledger, 1);
        assert_eq!(snap.failures, 1);
    }
}
