//! Partitioned Parquet storage for the fill lake.
//!
//! This crate provides the on-disk half of the system:
//! - File-based storage in Parquet organized as hive-style `col=value`
//!   directory levels (year/month/day for raw fills, year/month for trades).
//! - Writers that compress with ZSTD and replace whole files atomically
//!   (temp file + rename), so a reader never observes a half-written file.
//!   A (partition, filename) pair is overwritten wholesale, never merged in
//!   place; distinct filenames in one partition accumulate as siblings.
//! - Watermark resolution over a store, either by scanning every file or by
//!   descending into the numerically last partition at each level.
//!
//! Key modules:
//! - `partition`: partition-tree path building and pruned file enumeration.
//! - `parquet`: Arrow schemas, per-file readers/writers, column stats.
//! - `writer`: batch writers that group rows by partition tuple.
//! - `watermark`: full-scan and tail-descent watermark strategies.

pub mod parquet;
pub mod partition;
pub mod watermark;
pub mod writer;
