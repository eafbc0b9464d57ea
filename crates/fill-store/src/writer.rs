//! Batch writers that bucket rows by partition tuple and delegate to the
//! parquet layer. One file per touched partition per call; an existing
//! (partition, filename) pair is replaced wholesale, never merged, so
//! callers pick filenames that are either stable (idempotent overwrite) or
//! unique per run (append).

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike};

use fill_types::fills::FillRow;
use fill_types::markets::MarketRow;
use fill_types::trades::TradeRow;

use crate::parquet::{write_fills_zstd, write_markets_zstd, write_trades_zstd, ZSTD_LEVEL};
use crate::partition::{day_partition, month_partition, PartitionStore};

fn group_by_partition<'a, T, const N: usize, F>(
    rows: &'a [T],
    key: F,
) -> Result<BTreeMap<[i64; N], Vec<&'a T>>>
where
    F: Fn(&T) -> Result<[i64; N]>,
{
    let mut buckets: BTreeMap<[i64; N], Vec<&T>> = BTreeMap::new();
    for r in rows {
        buckets.entry(key(r)?).or_default().push(r);
    }
    Ok(buckets)
}

/// Write a batch of fills into `store`, grouped by the UTC (year, month,
/// day) of their timestamp.
pub fn write_fills(
    store: &PartitionStore,
    rows: &[FillRow],
    file_name: &str,
) -> Result<Vec<PathBuf>> {
    if rows.is_empty() {
        return Err(anyhow!("write_fills: empty batch"));
    }
    let buckets = group_by_partition(rows, |r: &FillRow| day_partition(r.timestamp))?;
    let mut paths = Vec::with_capacity(buckets.len());
    for (key, group) in buckets {
        let path = store.partition_dir(&key).join(file_name);
        write_fills_zstd(&path, &group, ZSTD_LEVEL)
            .with_context(|| format!("writing {}", path.display()))?;
        paths.push(path);
    }
    Ok(paths)
}

/// Write a batch of processed trades into `store`, grouped by the UTC
/// (year, month) of their timestamp.
pub fn write_trades(
    store: &PartitionStore,
    rows: &[TradeRow],
    file_name: &str,
) -> Result<Vec<PathBuf>> {
    if rows.is_empty() {
        return Err(anyhow!("write_trades: empty batch"));
    }
    let buckets = group_by_partition(rows, |r: &TradeRow| month_partition(r.timestamp))?;
    let mut paths = Vec::with_capacity(buckets.len());
    for (key, group) in buckets {
        let path = store.partition_dir(&key).join(file_name);
        write_trades_zstd(&path, &group, ZSTD_LEVEL)
            .with_context(|| format!("writing {}", path.display()))?;
        paths.push(path);
    }
    Ok(paths)
}

/// Write market metadata rows into `store`, grouped by the UTC (year,
/// month) of their creation time. Used by fixtures and the out-of-band
/// metadata acquisition job.
pub fn write_markets(
    store: &PartitionStore,
    rows: &[MarketRow],
    file_name: &str,
) -> Result<Vec<PathBuf>> {
    if rows.is_empty() {
        return Err(anyhow!("write_markets: empty batch"));
    }
    let buckets = group_by_partition(rows, |r: &MarketRow| {
        let dt = DateTime::parse_from_rfc3339(&r.created_at)
            .with_context(|| format!("market {} has invalid created_at {:?}", r.id, r.created_at))?;
        Ok([dt.year() as i64, dt.month() as i64])
    })?;
    let mut paths = Vec::with_capacity(buckets.len());
    for (key, group) in buckets {
        let path = store.partition_dir(&key).join(file_name);
        write_markets_zstd(&path, &group, ZSTD_LEVEL)
            .with_context(|| format!("writing {}", path.display()))?;
        paths.push(path);
    }
    Ok(paths)
}
