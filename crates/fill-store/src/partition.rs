use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Utc};

/// A directory-partitioned columnar dataset.
///
/// Levels correspond to the partition columns in declared order, e.g.
/// `year=2025/month=10/day=30`; each leaf directory holds one or more
/// immutable parquet files. Partition values are plain integers without
/// zero padding, so ordering must always be numeric, never lexicographic.
#[derive(Clone, Debug)]
pub struct PartitionStore {
    root: PathBuf,
    columns: Vec<String>,
}

impl PartitionStore {
    pub fn new(root: impl Into<PathBuf>, columns: &[&str]) -> Self {
        Self {
            root: root.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Leaf directory for one partition-value tuple. Creates nothing.
    pub fn partition_dir(&self, values: &[i64]) -> PathBuf {
        debug_assert_eq!(values.len(), self.columns.len());
        let mut dir = self.root.clone();
        for (col, v) in self.columns.iter().zip(values) {
            dir.push(format!("{col}={v}"));
        }
        dir
    }

    /// Every data file in the store, ordered by partition values (numeric)
    /// and then by file name. Temp files and stray non-parquet files are
    /// skipped. The ordering matters: with partition columns derived from
    /// the ordering key, callers iterate files in increasing key order.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        self.files_where(|_| true)
    }

    /// Data files whose partition values satisfy `pred`; prunes whole
    /// subtrees without touching their files.
    pub fn files_where(&self, pred: impl Fn(&[i64]) -> bool) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut found: Vec<(Vec<i64>, PathBuf)> = Vec::new();
        let mut values = Vec::with_capacity(self.columns.len());
        self.walk(&self.root, 0, &mut values, &pred, &mut found)?;
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    fn walk(
        &self,
        dir: &Path,
        level: usize,
        values: &mut Vec<i64>,
        pred: &impl Fn(&[i64]) -> bool,
        found: &mut Vec<(Vec<i64>, PathBuf)>,
    ) -> Result<()> {
        if level == self.columns.len() {
            if !pred(values) {
                return Ok(());
            }
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if is_data_file(&path) {
                    found.push((values.clone(), path));
                }
            }
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(value) = partition_value(&path, &self.columns[level]) {
                values.push(value);
                self.walk(&path, level + 1, values, pred, found)?;
                values.pop();
            }
        }
        Ok(())
    }
}

pub(crate) fn is_data_file(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.ends_with(".parquet") && !name.starts_with('.'),
        None => false,
    }
}

/// Decode the value of a `column=value` directory name, or `None` when the
/// directory does not belong to `column`.
pub(crate) fn partition_value(path: &Path, column: &str) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let value = name.strip_prefix(column)?.strip_prefix('=')?;
    value.parse().ok()
}

/// (year, month, day) of an epoch-seconds ordering key, UTC.
pub fn day_partition(epoch_secs: i64) -> Result<[i64; 3]> {
    let dt = utc(epoch_secs)?;
    Ok([dt.year() as i64, dt.month() as i64, dt.day() as i64])
}

/// (year, month) of an epoch-seconds ordering key, UTC.
pub fn month_partition(epoch_secs: i64) -> Result<[i64; 2]> {
    let dt = utc(epoch_secs)?;
    Ok([dt.year() as i64, dt.month() as i64])
}

fn utc(epoch_secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(epoch_secs, 0)
        .ok_or_else(|| anyhow!("invalid epoch timestamp: {epoch_secs}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_partition_matches_utc_calendar() {
        let ts = Utc.with_ymd_and_hms(2025, 10, 30, 0, 0, 0).unwrap().timestamp();
        assert_eq!(day_partition(ts).unwrap(), [2025, 10, 30]);
        assert_eq!(month_partition(ts).unwrap(), [2025, 10]);
    }

    #[test]
    fn partition_dir_uses_declared_column_order() {
        let store = PartitionStore::new("/lake/fills", &["year", "month", "day"]);
        assert_eq!(
            store.partition_dir(&[2025, 10, 30]),
            PathBuf::from("/lake/fills/year=2025/month=10/day=30")
        );
    }

    #[test]
    fn partition_value_rejects_foreign_directories() {
        assert_eq!(partition_value(Path::new("/x/month=9"), "month"), Some(9));
        assert_eq!(partition_value(Path::new("/x/month=9"), "day"), None);
        assert_eq!(partition_value(Path::new("/x/stray"), "month"), None);
    }
}
