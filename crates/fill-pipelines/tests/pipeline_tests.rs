use std::fs;
use std::path::Path;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use fill_pipelines::ingest::IngestionPipeline;
use fill_pipelines::markets::load_asset_book;
use fill_pipelines::transform::{TransformPipeline, UnmatchedPolicy};
use fill_store::parquet::{read_fills, read_trades};
use fill_store::partition::PartitionStore;
use fill_store::watermark::resolve_watermark;
use fill_store::writer::{write_fills, write_markets};
use fill_subgraph::client::FillSource;
use fill_subgraph::error::FetchError;
use fill_types::fills::FillRow;
use fill_types::markets::{AssetBook, MarketRow};
use fill_types::retry::RetryPolicy;
use fill_types::run::RunContext;
use fill_types::trades::{TokenSide, TradeDirection};

const TOKEN: &str = "77001";

fn temp_root() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}

fn raw_store(root: &Path) -> PartitionStore {
    PartitionStore::new(root.join("orderFilled"), &["year", "month", "day"])
}

fn trade_store(root: &Path) -> PartitionStore {
    PartitionStore::new(root.join("processed").join("trades"), &["year", "month"])
}

fn run_ctx(tag: &str) -> RunContext {
    let mut ctx = RunContext::at(Utc.with_ymd_and_hms(2025, 10, 30, 12, 0, 0).unwrap());
    ctx.tag = tag.to_string();
    ctx
}

fn fill(ts: i64) -> FillRow {
    FillRow {
        timestamp: ts,
        maker: "0xmaker".to_string(),
        maker_asset_id: "0".to_string(),
        maker_amount_filled: 500_000,
        taker: "0xtaker".to_string(),
        taker_asset_id: TOKEN.to_string(),
        taker_amount_filled: 1_000_000,
        transaction_hash: format!("0x{ts:x}"),
    }
}

fn fill_with_assets(ts: i64, maker_asset: &str, taker_asset: &str) -> FillRow {
    FillRow {
        maker_asset_id: maker_asset.to_string(),
        taker_asset_id: taker_asset.to_string(),
        ..fill(ts)
    }
}

fn book_for_token() -> AssetBook {
    let mut book = AssetBook::new();
    book.insert_market(&MarketRow {
        created_at: "2024-01-01T00:00:00Z".to_string(),
        id: "0xmarket".to_string(),
        token1: TOKEN.to_string(),
        token2: "77002".to_string(),
    });
    book
}

fn read_all_fills(store: &PartitionStore) -> Vec<FillRow> {
    let mut rows: Vec<FillRow> = store
        .list_files()
        .expect("list")
        .iter()
        .flat_map(|f| read_fills(f).expect("read fills"))
        .collect();
    rows.sort_by_key(|r| r.timestamp);
    rows
}

fn count_trades(store: &PartitionStore) -> usize {
    store
        .list_files()
        .expect("list")
        .iter()
        .map(|f| read_trades(f).expect("read trades").len())
        .sum()
}

/// In-memory upstream serving pages from a fixed, sorted record set.
struct VecSource {
    rows: Vec<FillRow>,
}

impl VecSource {
    fn new(mut rows: Vec<FillRow>) -> Self {
        rows.sort_by_key(|r| r.timestamp);
        Self { rows }
    }
}

#[async_trait]
impl FillSource for VecSource {
    async fn fetch_page(&self, after: i64, limit: usize) -> Result<Vec<FillRow>, FetchError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.timestamp > after)
            .take(limit)
            .cloned()
            .collect())
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        retry_delay: std::time::Duration::from_millis(0),
        rate_limit_delay: std::time::Duration::from_millis(0),
    }
}

/// Two upstream pages (1000 + 400 events), then a full transform.
#[tokio::test]
async fn test_ingest_two_pages_then_transform_end_to_end() {
    let tmp = temp_root();
    let raw = raw_store(tmp.path());
    let trades = trade_store(tmp.path());

    // 1400 events with ts 1..=1400; two of them have malformed legs and one
    // exact duplicate arrives from upstream.
    let mut upstream: Vec<FillRow> = (1..=1400).map(fill).collect();
    upstream[99] = fill_with_assets(100, "0", "0");
    upstream[199] = fill_with_assets(200, TOKEN, "77002");
    upstream.push(fill(500));
    let source = VecSource::new(upstream);

    let ingest = IngestionPipeline::new(&raw, &source, fast_policy(), 1000);
    let report = ingest.run(&run_ctx("run1")).await.expect("ingest");

    assert_eq!(report.start_watermark, 0);
    assert_eq!(report.end_watermark, 1400);
    assert_eq!(report.pages, 2);
    assert_eq!(report.rows_written, 1400);
    assert_eq!(resolve_watermark(&raw, "timestamp").expect("watermark"), 1400);

    // Epoch seconds 1..=1400 all fall on 1970-01-01.
    assert!(raw
        .root()
        .join("year=1970")
        .join("month=1")
        .join("day=1")
        .exists());
    assert_eq!(read_all_fills(&raw).len(), 1400);

    // Transform over an empty output store emits every well-formed fill.
    let transform = TransformPipeline::new(&raw, &trades, 10);
    let report = transform
        .run(&book_for_token(), &run_ctx("run1"))
        .expect("transform");
    assert_eq!(report.start_watermark, 0);
    assert_eq!(report.rows_emitted, 1398);
    assert_eq!(report.rows_malformed, 2);
    assert_eq!(report.rows_unmatched, 0);
    assert_eq!(count_trades(&trades), 1398);
    assert_eq!(resolve_watermark(&trades, "timestamp").expect("watermark"), 1400);
}

#[tokio::test]
async fn test_second_ingestion_run_is_a_no_op() {
    let tmp = temp_root();
    let raw = raw_store(tmp.path());
    let source = VecSource::new((1..=700).map(fill).collect());

    let ingest = IngestionPipeline::new(&raw, &source, fast_policy(), 500);
    ingest.run(&run_ctx("run1")).await.expect("first run");
    let files_before = raw.list_files().expect("list");

    let report = ingest.run(&run_ctx("run2")).await.expect("second run");
    assert_eq!(report.start_watermark, 700);
    assert_eq!(report.end_watermark, 700);
    assert_eq!(report.pages, 0);
    assert_eq!(report.rows_written, 0);
    assert_eq!(raw.list_files().expect("list"), files_before);
}

/// A prefix run followed by a full run must equal one full run.
#[tokio::test]
async fn test_no_data_loss_across_restart() {
    let all: Vec<FillRow> = (1..=900).map(fill).collect();

    let tmp_split = temp_root();
    let split = raw_store(tmp_split.path());
    let prefix = VecSource::new(all[..400].to_vec());
    IngestionPipeline::new(&split, &prefix, fast_policy(), 250)
        .run(&run_ctx("run1"))
        .await
        .expect("prefix run");
    assert_eq!(resolve_watermark(&split, "timestamp").expect("wm"), 400);

    let full = VecSource::new(all.clone());
    IngestionPipeline::new(&split, &full, fast_policy(), 250)
        .run(&run_ctx("run2"))
        .await
        .expect("resume run");

    let tmp_single = temp_root();
    let single = raw_store(tmp_single.path());
    IngestionPipeline::new(&single, &full, fast_policy(), 250)
        .run(&run_ctx("run3"))
        .await
        .expect("single run");

    assert_eq!(read_all_fills(&split), read_all_fills(&single));
}

#[tokio::test]
async fn test_fill_lands_in_expected_day_partition() {
    let tmp = temp_root();
    let raw = raw_store(tmp.path());
    let ts = Utc.with_ymd_and_hms(2025, 10, 30, 0, 0, 0).unwrap().timestamp();
    let source = VecSource::new(vec![fill(ts)]);

    IngestionPipeline::new(&raw, &source, fast_policy(), 100)
        .run(&run_ctx("run1"))
        .await
        .expect("ingest");

    let expected_dir = raw
        .root()
        .join("year=2025")
        .join("month=10")
        .join("day=30");
    assert!(expected_dir.is_dir());
    assert_eq!(raw.list_files().expect("list").len(), 1);
}

#[test]
fn test_join_derivation_for_maker_usdc_leg() {
    let tmp = temp_root();
    let raw = raw_store(tmp.path());
    let trades = trade_store(tmp.path());

    // Maker pays 0.5 USDC, taker hands over 1.0 of token1.
    write_fills(&raw, &[fill(1_000)], "fills-0000001000.parquet").expect("seed");

    let report = TransformPipeline::new(&raw, &trades, 10)
        .run(&book_for_token(), &run_ctx("run1"))
        .expect("transform");
    assert_eq!(report.rows_emitted, 1);

    let files = trades.list_files().expect("list");
    let rows = read_trades(&files[0]).expect("read");
    assert_eq!(rows.len(), 1);
    let trade = &rows[0];
    assert_eq!(trade.market_id, "0xmarket");
    assert_eq!(trade.nonusdc_side, TokenSide::Token1);
    assert_eq!(trade.maker_direction, TradeDirection::Buy);
    assert_eq!(trade.taker_direction, TradeDirection::Sell);
    assert_eq!(trade.usd_amount, 0.5);
    assert_eq!(trade.token_amount, 1.0);
    assert_eq!(trade.price, 0.5);
    assert_eq!(trade.transaction_hash, fill(1_000).transaction_hash);
}

#[test]
fn test_taker_usdc_leg_reverses_directions() {
    let tmp = temp_root();
    let raw = raw_store(tmp.path());
    let trades = trade_store(tmp.path());

    // Taker pays 0.5 USDC for 1.0 of token1: maker sells.
    let mut row = fill_with_assets(2_000, TOKEN, "0");
    row.maker_amount_filled = 1_000_000;
    row.taker_amount_filled = 500_000;
    write_fills(&raw, &[row], "fills-0000002000.parquet").expect("seed");

    let report = TransformPipeline::new(&raw, &trades, 10)
        .run(&book_for_token(), &run_ctx("run1"))
        .expect("transform");
    assert_eq!(report.rows_emitted, 1);

    let files = trades.list_files().expect("list");
    let trade = &read_trades(&files[0]).expect("read")[0];
    assert_eq!(trade.maker_direction, TradeDirection::Sell);
    assert_eq!(trade.taker_direction, TradeDirection::Buy);
    assert_eq!(trade.usd_amount, 0.5);
    assert_eq!(trade.token_amount, 1.0);
    assert_eq!(trade.price, 0.5);
}

#[test]
fn test_transform_resumes_from_output_watermark() {
    let tmp = temp_root();
    let raw = raw_store(tmp.path());
    let trades = trade_store(tmp.path());
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap().timestamp();

    let first: Vec<FillRow> = (0..5).map(|i| fill(base + i)).collect();
    write_fills(&raw, &first, "fills-a.parquet").expect("seed 1");
    let report = TransformPipeline::new(&raw, &trades, 10)
        .run(&book_for_token(), &run_ctx("run1"))
        .expect("first transform");
    assert_eq!(report.rows_emitted, 5);
    let files_after_first = trades.list_files().expect("list");

    // New raw data arrives; the second run must only emit the new rows and
    // must not touch the first run's output files.
    let second: Vec<FillRow> = (5..8).map(|i| fill(base + i)).collect();
    write_fills(&raw, &second, "fills-b.parquet").expect("seed 2");
    let report = TransformPipeline::new(&raw, &trades, 10)
        .run(&book_for_token(), &run_ctx("run2"))
        .expect("second transform");
    assert_eq!(report.start_watermark, base + 4);
    assert_eq!(report.rows_emitted, 3);

    let files_after_second = trades.list_files().expect("list");
    assert_eq!(files_after_second.len(), files_after_first.len() + 1);
    for f in &files_after_first {
        assert!(files_after_second.contains(f));
    }
    assert_eq!(count_trades(&trades), 8);
}

#[test]
fn test_unmatched_fills_drop_by_default_but_quarantine_when_asked() {
    let tmp = temp_root();
    let raw = raw_store(tmp.path());
    let trades = trade_store(tmp.path());
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap().timestamp();

    let rows = vec![
        fill(base),
        fill_with_assets(base + 1, "0", "unknown-asset"),
        fill_with_assets(base + 2, "0", "unknown-asset"),
    ];
    write_fills(&raw, &rows, "fills-a.parquet").expect("seed");

    let report = TransformPipeline::new(&raw, &trades, 10)
        .run(&book_for_token(), &run_ctx("run1"))
        .expect("drop policy");
    assert_eq!(report.rows_emitted, 1);
    assert_eq!(report.rows_unmatched, 2);

    // Same input, quarantine policy: unmatched raw fills land in a side
    // dataset partitioned like the raw store.
    let tmp2 = temp_root();
    let raw2 = raw_store(tmp2.path());
    let trades2 = trade_store(tmp2.path());
    let quarantine = PartitionStore::new(
        tmp2.path().join("quarantine").join("unmatched"),
        &["year", "month", "day"],
    );
    write_fills(&raw2, &rows, "fills-a.parquet").expect("seed");

    let report = TransformPipeline::new(&raw2, &trades2, 10)
        .with_unmatched_policy(UnmatchedPolicy::Quarantine {
            store: quarantine.clone(),
        })
        .run(&book_for_token(), &run_ctx("run1"))
        .expect("quarantine policy");
    assert_eq!(report.rows_unmatched, 2);
    assert_eq!(read_all_fills(&quarantine).len(), 2);
}

#[test]
fn test_unmatched_ratio_above_threshold_fails_the_run() {
    let tmp = temp_root();
    let raw = raw_store(tmp.path());
    let trades = trade_store(tmp.path());
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap().timestamp();

    let rows = vec![
        fill(base),
        fill_with_assets(base + 1, "0", "unknown-asset"),
        fill_with_assets(base + 2, "0", "unknown-asset"),
    ];
    write_fills(&raw, &rows, "fills-a.parquet").expect("seed");

    let err = TransformPipeline::new(&raw, &trades, 10)
        .with_unmatched_policy(UnmatchedPolicy::FailRatio { max_ratio: 0.5 })
        .run(&book_for_token(), &run_ctx("run1"))
        .expect_err("should exceed the loss threshold");
    assert!(err.to_string().contains("exceeds limit"));
}

#[test]
fn test_unreadable_raw_file_is_skipped_not_fatal() {
    let tmp = temp_root();
    let raw = raw_store(tmp.path());
    let trades = trade_store(tmp.path());
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap().timestamp();

    write_fills(&raw, &[fill(base)], "fills-a.parquet").expect("seed");
    // A corrupt sibling file must not abort the run.
    let bad = raw.partition_dir(&[2025, 6, 1]).join("fills-bad.parquet");
    fs::write(&bad, b"not a parquet file").expect("write junk");

    let report = TransformPipeline::new(&raw, &trades, 10)
        .run(&book_for_token(), &run_ctx("run1"))
        .expect("transform survives");
    assert_eq!(report.rows_emitted, 1);
}

#[test]
fn test_asset_book_loads_from_partitioned_dataset() {
    let tmp = temp_root();
    let markets = PartitionStore::new(tmp.path().join("markets"), &["year", "month"]);

    let rows = vec![
        MarketRow {
            created_at: "2024-01-05T00:00:00Z".to_string(),
            id: "m1".to_string(),
            token1: "a1".to_string(),
            token2: "a2".to_string(),
        },
        MarketRow {
            created_at: "2024-02-10T00:00:00Z".to_string(),
            id: "m2".to_string(),
            token1: "b1".to_string(),
            token2: "b2".to_string(),
        },
    ];
    write_markets(&markets, &rows, "markets-0.parquet").expect("write markets");
    // A later duplicate of m1 pointing at different tokens must lose.
    let dup = vec![MarketRow {
        created_at: "2024-03-01T00:00:00Z".to_string(),
        id: "m1".to_string(),
        token1: "c1".to_string(),
        token2: "c2".to_string(),
    }];
    write_markets(&markets, &dup, "markets-1.parquet").expect("write dup");

    let book = load_asset_book(&markets).expect("load");
    assert_eq!(book.len(), 4);
    assert_eq!(book.get("a1").unwrap().market_id, "m1");
    assert_eq!(book.get("b2").unwrap().side, TokenSide::Token2);
    assert!(book.get("c1").is_none());
}
