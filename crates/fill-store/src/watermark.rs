use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use crate::parquet::parquet_max_i64;
use crate::partition::{is_data_file, partition_value, PartitionStore};

/// Strategy for resolving the highest ordering key durably stored.
///
/// The watermark is a pure function of current store contents: it is
/// recomputed at every run start and never cached. Both strategies return
/// the same answer on a well-formed store (partition columns monotonic in
/// the ordering key); `0` is the beginning-of-time sentinel for an empty
/// one.
pub trait WatermarkStrategy {
    fn resolve(&self, store: &PartitionStore, column: &str) -> Result<i64>;
}

/// Reads `column` across every file in the store. O(total rows), but makes
/// no assumptions about the partition layout.
pub struct FullScan;

impl WatermarkStrategy for FullScan {
    fn resolve(&self, store: &PartitionStore, column: &str) -> Result<i64> {
        max_over_files(&store.list_files()?, column)
    }
}

/// Descends into the numerically greatest partition at each level and scans
/// only that leaf's files. `month=9` sorts before `month=10` here, which is
/// why partition values are compared as integers.
///
/// Only valid while no row in an earlier partition carries an ordering key
/// greater than any row in a later one, i.e. while partition columns are
/// derived monotonically from the ordering key.
pub struct TailDescent;

impl TailDescent {
    fn tail_files(&self, store: &PartitionStore) -> Result<Vec<PathBuf>> {
        let mut dir = store.root().to_path_buf();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        for column in store.columns() {
            match last_child_partition(&dir, column)? {
                Some(next) => dir = next,
                None => return Ok(Vec::new()),
            }
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if is_data_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl WatermarkStrategy for TailDescent {
    fn resolve(&self, store: &PartitionStore, column: &str) -> Result<i64> {
        max_over_files(&self.tail_files(store)?, column)
    }
}

/// Tail-descent with a full-scan safety net: when the descent yields no
/// files (empty store or an irregular tree), fall back to scanning
/// everything rather than reporting a stale watermark.
pub fn resolve_watermark(store: &PartitionStore, column: &str) -> Result<i64> {
    let files = TailDescent.tail_files(store)?;
    if files.is_empty() {
        return FullScan.resolve(store, column);
    }
    max_over_files(&files, column)
}

fn max_over_files(files: &[PathBuf], column: &str) -> Result<i64> {
    let mut max = 0i64;
    for path in files {
        match parquet_max_i64(path, column) {
            Ok(Some(v)) => max = max.max(v),
            Ok(None) => {}
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable file in watermark scan");
            }
        }
    }
    Ok(max)
}

fn last_child_partition(dir: &Path, column: &str) -> Result<Option<PathBuf>> {
    let mut best: Option<(i64, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(value) = partition_value(&path, column) else {
            continue;
        };
        if best.as_ref().map_or(true, |(b, _)| value > *b) {
            best = Some((value, path));
        }
    }
    Ok(best.map(|(_, path)| path))
}
