use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use fill_store::parquet::{read_fills, StoreError};
use fill_store::partition::PartitionStore;
use fill_store::watermark::resolve_watermark;
use fill_store::writer::{write_fills, write_trades};
use fill_types::fills::{FillRow, COLLATERAL_UNIT, USDC_ASSET_ID};
use fill_types::markets::AssetBook;
use fill_types::run::RunContext;
use fill_types::trades::{TradeDirection, TradeRow};

use crate::ingest::{format_utc, TIMESTAMP_COLUMN};

/// What to do with fills whose non-USDC asset has no market mapping.
#[derive(Debug, Clone)]
pub enum UnmatchedPolicy {
    /// Count and drop. The default.
    Drop,
    /// Persist unmatched fills to a side dataset partitioned like the raw
    /// store, one file per run and chunk.
    Quarantine { store: PartitionStore },
    /// Abort the run when unmatched rows exceed this share of joinable rows.
    FailRatio { max_ratio: f64 },
}

impl Default for UnmatchedPolicy {
    fn default() -> Self {
        UnmatchedPolicy::Drop
    }
}

/// Outcome of one transform cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub start_watermark: i64,
    pub chunks: u64,
    pub rows_read: u64,
    pub rows_emitted: u64,
    pub rows_unmatched: u64,
    pub rows_malformed: u64,
}

/// Derives the normalized trades dataset from the raw fill store.
///
/// Invoked once per cycle; re-scans the raw store in file chunks (a memory
/// bound, not a correctness knob) and relies on the output watermark to
/// skip rows that earlier runs already emitted.
pub struct TransformPipeline<'a> {
    input: &'a PartitionStore,
    output: &'a PartitionStore,
    chunk_files: usize,
    unmatched: UnmatchedPolicy,
}

impl<'a> TransformPipeline<'a> {
    pub fn new(input: &'a PartitionStore, output: &'a PartitionStore, chunk_files: usize) -> Self {
        Self {
            input,
            output,
            chunk_files: chunk_files.max(1),
            unmatched: UnmatchedPolicy::default(),
        }
    }

    pub fn with_unmatched_policy(mut self, policy: UnmatchedPolicy) -> Self {
        self.unmatched = policy;
        self
    }

    pub fn run(&self, book: &AssetBook, ctx: &RunContext) -> Result<TransformReport> {
        let start_watermark = resolve_watermark(self.output, TIMESTAMP_COLUMN)
            .context("output trade store is unreadable")?;
        let mut report = TransformReport {
            start_watermark,
            ..TransformReport::default()
        };
        if start_watermark > 0 {
            info!(
                run = %ctx.tag,
                watermark = start_watermark,
                resume_from = %format_utc(start_watermark),
                "resuming transform"
            );
        }

        let files = self.input.list_files()?;
        if files.is_empty() {
            info!(run = %ctx.tag, "no raw fill files to process");
            return Ok(report);
        }
        info!(
            run = %ctx.tag,
            files = files.len(),
            assets = book.len(),
            chunk_files = self.chunk_files,
            "processing raw fills"
        );

        for (chunk_idx, chunk) in files.chunks(self.chunk_files).enumerate() {
            let mut rows: Vec<FillRow> = Vec::new();
            for path in chunk {
                match read_fills_with_retry(path) {
                    Ok(mut file_rows) => rows.append(&mut file_rows),
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "skipping unreadable fill file");
                    }
                }
            }
            // Chunk boundaries do not align with the watermark; the filter
            // is what guards against re-emitting rows.
            rows.retain(|r| r.timestamp > start_watermark);
            if rows.is_empty() {
                continue;
            }
            report.rows_read += rows.len() as u64;

            let mut trades: Vec<TradeRow> = Vec::with_capacity(rows.len());
            let mut unmatched: Vec<FillRow> = Vec::new();
            for fill in rows {
                match derive_trade(&fill, book) {
                    Derived::Trade(trade) => trades.push(trade),
                    Derived::Unmatched => {
                        report.rows_unmatched += 1;
                        unmatched.push(fill);
                    }
                    Derived::Malformed => report.rows_malformed += 1,
                }
            }

            if let UnmatchedPolicy::Quarantine { store } = &self.unmatched {
                if !unmatched.is_empty() {
                    let name = format!("unmatched-{}-chunk-{chunk_idx}.parquet", ctx.tag);
                    write_fills(store, &unmatched, &name)?;
                    info!(chunk = chunk_idx, rows = unmatched.len(), "quarantined unmatched fills");
                }
            }

            if trades.is_empty() {
                continue;
            }
            // One file per partition per chunk; the run tag keeps reruns
            // from colliding with files an earlier run already wrote.
            let file_name = format!("trades-{}-chunk-{chunk_idx}.parquet", ctx.tag);
            let paths = write_trades(self.output, &trades, &file_name)?;
            report.chunks += 1;
            report.rows_emitted += trades.len() as u64;
            info!(
                chunk = chunk_idx,
                rows = trades.len(),
                files = paths.len(),
                "wrote processed trades"
            );
        }

        if let UnmatchedPolicy::FailRatio { max_ratio } = self.unmatched {
            let joinable = report.rows_emitted + report.rows_unmatched;
            if joinable > 0 {
                let ratio = report.rows_unmatched as f64 / joinable as f64;
                if ratio > max_ratio {
                    bail!(
                        "unmatched fill ratio {ratio:.4} exceeds limit {max_ratio:.4} \
                         ({} of {} joinable rows)",
                        report.rows_unmatched,
                        joinable
                    );
                }
            }
        }

        info!(
            run = %ctx.tag,
            chunks = report.chunks,
            emitted = report.rows_emitted,
            unmatched = report.rows_unmatched,
            malformed = report.rows_malformed,
            "transform complete"
        );
        Ok(report)
    }
}

enum Derived {
    Trade(TradeRow),
    Unmatched,
    Malformed,
}

/// Resolve one fill into a normalized trade.
///
/// Exactly one leg must be the collateral asset; the other identifies the
/// market. The collateral holder is buying outcome tokens, amounts scale
/// by the 6-decimal unit, and price is collateral per token.
fn derive_trade(fill: &FillRow, book: &AssetBook) -> Derived {
    let maker_is_usdc = fill.maker_asset_id == USDC_ASSET_ID;
    let taker_is_usdc = fill.taker_asset_id == USDC_ASSET_ID;
    if maker_is_usdc == taker_is_usdc {
        return Derived::Malformed;
    }

    let nonusdc_asset_id = if maker_is_usdc {
        &fill.taker_asset_id
    } else {
        &fill.maker_asset_id
    };
    let Some(asset) = book.get(nonusdc_asset_id) else {
        return Derived::Unmatched;
    };

    let maker_amount = fill.maker_amount_filled as f64 / COLLATERAL_UNIT;
    let taker_amount = fill.taker_amount_filled as f64 / COLLATERAL_UNIT;
    let (maker_direction, taker_direction) = if taker_is_usdc {
        (TradeDirection::Sell, TradeDirection::Buy)
    } else {
        (TradeDirection::Buy, TradeDirection::Sell)
    };
    let (usd_amount, token_amount) = if taker_is_usdc {
        (taker_amount, maker_amount)
    } else {
        (maker_amount, taker_amount)
    };
    if token_amount == 0.0 {
        return Derived::Malformed;
    }

    Derived::Trade(TradeRow {
        timestamp: fill.timestamp,
        market_id: asset.market_id.clone(),
        maker: fill.maker.clone(),
        taker: fill.taker.clone(),
        nonusdc_side: asset.side,
        maker_direction,
        taker_direction,
        price: usd_amount / token_amount,
        usd_amount,
        token_amount,
        transaction_hash: fill.transaction_hash.clone(),
    })
}

/// One bounded re-read before giving up on a file.
fn read_fills_with_retry(path: &Path) -> Result<Vec<FillRow>, StoreError> {
    match read_fills(path) {
        Ok(rows) => Ok(rows),
        Err(_) => read_fills(path),
    }
}
