//! Coverage bitmap snapshots and comparison.
//!
//! Uses a 64KB bitmap with 8-bit saturating counters (AFL-style). The
//! monitor that fills it lives outside this crate; the controller only
//! takes snapshots before and after each slice and diffs them.

use std::path::PathBuf;

/// Coverage bitmap size (64 KB, same as AFL).
pub const MAP_SIZE: usize = 65536;

/// Coverage bitmap tracking which edges have been hit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverageBitmap {
    /// index = hash(branch_src, branch_dst) % MAP_SIZE
    map: Vec<u8>,
}

impl CoverageBitmap {
    /// Create a new empty coverage bitmap.
    pub fn new() -> Self {
        Self {
            map: vec![0; MAP_SIZE],
        }
    }

    /// Reset all counters to zero.
    pub fn clear(&mut self) {
        self.map.fill(0);
    }

    /// Record an edge hit at the given index. Saturates at 255.
    pub fn record_hit(&mut self, index: usize) {
        if index < MAP_SIZE {
            self.map[index] = self.map[index].saturating_add(1);
        }
    }

    /// Merge another bitmap into this one, keeping the max count per slot.
    pub fn merge(&mut self, other: &CoverageBitmap) {
        for (slot, &other_count) in self.map.iter_mut().zip(other.map.iter()) {
            *slot = (*slot).max(other_count);
        }
    }

    /// Count the number of non-zero entries (edges hit).
    pub fn count_bits(&self) -> usize {
        self.map.iter().filter(|&&c| c > 0).count()
    }

    /// Number of edges set here that are unset in `baseline`.
    pub fn new_edges_since(&self, baseline: &CoverageBitmap) -> usize {
        self.map
            .iter()
            .zip(baseline.map.iter())
            .filter(|(&now, &then)| now > 0 && then == 0)
            .count()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    /// Create from a raw byte slice (truncates/pads to MAP_SIZE).
    pub fn from_slice(data: &[u8]) -> Self {
        let mut map = vec![0; MAP_SIZE];
        let copy_len = data.len().min(MAP_SIZE);
        map[..copy_len].copy_from_slice(&data[..copy_len]);
        Self { map }
    }
}

impl Default for CoverageBitmap {
    fn default() -> Self {
        Self::new()
    }
}

/// Edges present in `after` that were absent in `before`.
pub fn diff(before: &CoverageBitmap, after: &CoverageBitmap) -> usize {
    after.new_edges_since(before)
}

/// Source of coverage snapshots for the instrumented DBMS.
pub trait CoverageMonitor: Send {
    /// Copy the current cumulative coverage buffer.
    fn snapshot(&mut self) -> CoverageBitmap;
}

/// Reads the coverage buffer from a file the instrumentation keeps
/// up to date (e.g. a mapped AFL shared-memory dump).
///
/// Read failures produce an empty bitmap ("blind mode") rather than an
/// error, so a missing buffer never stops the campaign.
pub struct FileCoverageMonitor {
    path: PathBuf,
    snapshots: u64,
    failures: u64,
}

impl FileCoverageMonitor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshots: 0,
            failures: 0,
        }
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl CoverageMonitor for FileCoverageMonitor {
    fn snapshot(&mut self) -> CoverageBitmap {
        self.snapshots += 1;
        match std::fs::read(&self.path) {
            Ok(bytes) => CoverageBitmap::from_slice(&bytes),
            Err(e) => {
                self.failures += 1;
                log::warn!(
                    "Failed to read coverage buffer {}: {}",
                    self.path.display(),
                    e
                );
                CoverageBitmap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_new() {
        let bitmap = CoverageBitmap::new();
        assert_eq!(bitmap.count_bits(), 0);
        assert_eq!(bitmap.as_slice().len(), MAP_SIZE);
    }

    #[test]
    fn test_bitmap_record_hit_saturates() {
        let mut bitmap = CoverageBitmap::new();
        for _ in 0..300 {
            bitmap.record_hit(5);
        }
        bitmap.record_hit(MAP_SIZE + 1);
        assert_eq!(bitmap.as_slice()[5], 255);
        assert_eq!(bitmap.count_bits(), 1);
    }

    #[test]
    fn test_bitmap_merge() {
        let mut b1 = CoverageBitmap::new();
        b1.record_hit(1);
        b1.record_hit(1);

        let mut b2 = CoverageBitmap::new();
        b2.record_hit(1);
        b2.record_hit(2);

        b1.merge(&b2);
        assert_eq!(b1.count_bits(), 2);
        assert_eq!(b1.as_slice()[1], 2);
    }

    #[test]
    fn test_diff_counts_only_new_edges() {
        let mut before = CoverageBitmap::new();
        before.record_hit(10);
        before.record_hit(11);

        let mut after = before.clone();
        after.record_hit(10);
        after.record_hit(20);
        after.record_hit(30);

        assert_eq!(diff(&before, &after), 2);
        assert_eq!(diff(&after, &before), 0);
        assert_eq!(diff(&after, &after), 0);
    }

    #[test]
    fn test_bitmap_clear() {
        let mut bitmap = CoverageBitmap::new();
        bitmap.record_hit(10);
        bitmap.clear();
        assert_eq!(bitmap.count_bits(), 0);
    }

    #[test]
    fn test_bitmap_from_slice() {
        let bitmap = CoverageBitmap::from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(bitmap.as_slice()[4], 5);
        assert_eq!(bitmap.as_slice()[5], 0);
        assert_eq!(bitmap.as_slice().len(), MAP_SIZE);
    }

    #[test]
    fn test_file_monitor_reads_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cov.bin");
        std::fs::write(&path, [0u8, 3, 0, 1]).unwrap();

        let mut monitor = FileCoverageMonitor::new(&path);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.count_bits(), 2);
        assert_eq!(monitor.snapshots(), 1);
        assert_eq!(monitor.failures(), 0);
    }

    #[test]
    fn test_file_monitor_blind_mode() {
        let mut monitor = FileCoverageMonitor::new("/nonexistent/coverage.bin");
        assert_eq!(monitor.snapshot().count_bits(), 0);
        assert_eq!(monitor.failures(), 1);
    }
}
