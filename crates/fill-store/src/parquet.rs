use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::*;
use arrow::datatypes::*;
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use thiserror::Error;

use fill_types::fills::FillRow;
use fill_types::markets::MarketRow;
use fill_types::trades::{TokenSide, TradeDirection, TradeRow};

/// Compression level used for every partition file.
pub const ZSTD_LEVEL: i32 = 9;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parquet: {0}")]
    Pq(#[from] parquet::errors::ParquetError),
    #[error("arrow: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("schema: {0}")]
    Schema(String),
}

fn zstd_props(level: i32) -> WriterProperties {
    // Aggressive compression; smaller data pages help RLE/dict.
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(
            ZstdLevel::try_new(level).unwrap_or(ZstdLevel::default()),
        ))
        .set_dictionary_enabled(true)
        .set_data_page_size_limit(128 * 1024)
        .set_write_batch_size(32 * 1024)
        .build()
}

// ---------- Schemas ----------
pub fn fill_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Int64, false),
        Field::new("maker", DataType::Utf8, false),
        Field::new("maker_asset_id", DataType::Utf8, false),
        Field::new("maker_amount_filled", DataType::Int64, false),
        Field::new("taker", DataType::Utf8, false),
        Field::new("taker_asset_id", DataType::Utf8, false),
        Field::new("taker_amount_filled", DataType::Int64, false),
        Field::new("transaction_hash", DataType::Utf8, false),
    ]))
}

pub fn trade_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("timestamp", DataType::Int64, false),
        Field::new("market_id", DataType::Utf8, false),
        Field::new("maker", DataType::Utf8, false),
        Field::new("taker", DataType::Utf8, false),
        Field::new("nonusdc_side", DataType::Utf8, false),
        Field::new("maker_direction", DataType::Utf8, false),
        Field::new("taker_direction", DataType::Utf8, false),
        Field::new("price", DataType::Float64, false),
        Field::new("usd_amount", DataType::Float64, false),
        Field::new("token_amount", DataType::Float64, false),
        Field::new("transaction_hash", DataType::Utf8, false),
    ]))
}

pub fn market_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("created_at", DataType::Utf8, false),
        Field::new("id", DataType::Utf8, false),
        Field::new("token1", DataType::Utf8, false),
        Field::new("token2", DataType::Utf8, false),
    ]))
}

// ---------- Builders ----------
fn to_batch_fills(rows: &[&FillRow]) -> Result<RecordBatch, StoreError> {
    let schema = fill_schema();
    let mut timestamp = Int64Builder::new();
    let mut maker = StringBuilder::new();
    let mut maker_asset_id = StringBuilder::new();
    let mut maker_amount = Int64Builder::new();
    let mut taker = StringBuilder::new();
    let mut taker_asset_id = StringBuilder::new();
    let mut taker_amount = Int64Builder::new();
    let mut tx_hash = StringBuilder::new();

    for r in rows {
        timestamp.append_value(r.timestamp);
        maker.append_value(&r.maker);
        maker_asset_id.append_value(&r.maker_asset_id);
        maker_amount.append_value(r.maker_amount_filled);
        taker.append_value(&r.taker);
        taker_asset_id.append_value(&r.taker_asset_id);
        taker_amount.append_value(r.taker_amount_filled);
        tx_hash.append_value(&r.transaction_hash);
    }

    Ok(RecordBatch::try_new(
        schema,
        vec![
            Arc::new(timestamp.finish()),
            Arc::new(maker.finish()),
            Arc::new(maker_asset_id.finish()),
            Arc::new(maker_amount.finish()),
            Arc::new(taker.finish()),
            Arc::new(taker_asset_id.finish()),
            Arc::new(taker_amount.finish()),
            Arc::new(tx_hash.finish()),
        ],
    )?)
}

fn to_batch_trades(rows: &[&TradeRow]) -> Result<RecordBatch, StoreError> {
    let schema = trade_schema();
    let mut timestamp = Int64Builder::new();
    let mut market_id = StringBuilder::new();
    let mut maker = StringBuilder::new();
    let mut taker = StringBuilder::new();
    let mut nonusdc_side = StringBuilder::new();
    let mut maker_direction = StringBuilder::new();
    let mut taker_direction = StringBuilder::new();
    let mut price = Float64Builder::new();
    let mut usd_amount = Float64Builder::new();
    let mut token_amount = Float64Builder::new();
    let mut tx_hash = StringBuilder::new();

    for r in rows {
        timestamp.append_value(r.timestamp);
        market_id.append_value(&r.market_id);
        maker.append_value(&r.maker);
        taker.append_value(&r.taker);
        nonusdc_side.append_value(r.nonusdc_side.to_string());
        maker_direction.append_value(r.maker_direction.to_string());
        taker_direction.append_value(r.taker_direction.to_string());
        price.append_value(r.price);
        usd_amount.append_value(r.usd_amount);
        token_amount.append_value(r.token_amount);
        tx_hash.append_value(&r.transaction_hash);
    }

    Ok(RecordBatch::try_new(
        schema,
        vec![
            Arc::new(timestamp.finish()),
            Arc::new(market_id.finish()),
            Arc::new(maker.finish()),
            Arc::new(taker.finish()),
            Arc::new(nonusdc_side.finish()),
            Arc::new(maker_direction.finish()),
            Arc::new(taker_direction.finish()),
            Arc::new(price.finish()),
            Arc::new(usd_amount.finish()),
            Arc::new(token_amount.finish()),
            Arc::new(tx_hash.finish()),
        ],
    )?)
}

fn to_batch_markets(rows: &[&MarketRow]) -> Result<RecordBatch, StoreError> {
    let schema = market_schema();
    let mut created_at = StringBuilder::new();
    let mut id = StringBuilder::new();
    let mut token1 = StringBuilder::new();
    let mut token2 = StringBuilder::new();

    for r in rows {
        created_at.append_value(&r.created_at);
        id.append_value(&r.id);
        token1.append_value(&r.token1);
        token2.append_value(&r.token2);
    }

    Ok(RecordBatch::try_new(
        schema,
        vec![
            Arc::new(created_at.finish()),
            Arc::new(id.finish()),
            Arc::new(token1.finish()),
            Arc::new(token2.finish()),
        ],
    )?)
}

// ---------- Atomic write ----------

/// Write `batch` to `path` via a temp file in the same directory followed by
/// a rename, so readers never observe a half-written file. An existing file
/// at `path` is replaced wholesale.
fn write_batch_atomic(
    path: &Path,
    schema: SchemaRef,
    batch: RecordBatch,
    zstd_level: i32,
) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Schema(format!("path has no parent: {}", path.display())))?;
    fs::create_dir_all(parent)?;

    let ts_ns = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let tmp = parent.join(format!(".__incoming-{}-{}.parquet", ts_ns, nanoid::nanoid!(4)));
    let file = fs::File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(zstd_props(zstd_level)))?;
    writer.write(&batch)?;
    writer.close()?;

    if let Err(first) = fs::rename(&tmp, path) {
        // Windows refuses to rename over an existing file.
        if path.exists() {
            let _ = fs::remove_file(path);
        }
        fs::rename(&tmp, path).map_err(|_| StoreError::Io(first))?;
    }
    Ok(())
}

// ---------- Public write helpers ----------

pub fn write_fills_zstd(
    path: &Path,
    rows: &[&FillRow],
    zstd_level: i32,
) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    write_batch_atomic(path, fill_schema(), to_batch_fills(rows)?, zstd_level)
}

pub fn write_trades_zstd(
    path: &Path,
    rows: &[&TradeRow],
    zstd_level: i32,
) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    write_batch_atomic(path, trade_schema(), to_batch_trades(rows)?, zstd_level)
}

pub fn write_markets_zstd(
    path: &Path,
    rows: &[&MarketRow],
    zstd_level: i32,
) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Ok(());
    }
    write_batch_atomic(path, market_schema(), to_batch_markets(rows)?, zstd_level)
}

// ---------- Readers ----------

fn i64_col<'a>(
    batch: &'a RecordBatch,
    idx: usize,
    name: &str,
) -> Result<&'a Int64Array, StoreError> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| StoreError::Schema(format!("column {name} is not Int64")))
}

fn f64_col<'a>(
    batch: &'a RecordBatch,
    idx: usize,
    name: &str,
) -> Result<&'a Float64Array, StoreError> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| StoreError::Schema(format!("column {name} is not Float64")))
}

fn str_col<'a>(
    batch: &'a RecordBatch,
    idx: usize,
    name: &str,
) -> Result<&'a StringArray, StoreError> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| StoreError::Schema(format!("column {name} is not Utf8")))
}

pub fn read_fills(path: &Path) -> Result<Vec<FillRow>, StoreError> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let ts_idx = schema.index_of("timestamp")?;
    let maker_idx = schema.index_of("maker")?;
    let maker_asset_idx = schema.index_of("maker_asset_id")?;
    let maker_amount_idx = schema.index_of("maker_amount_filled")?;
    let taker_idx = schema.index_of("taker")?;
    let taker_asset_idx = schema.index_of("taker_asset_id")?;
    let taker_amount_idx = schema.index_of("taker_amount_filled")?;
    let tx_idx = schema.index_of("transaction_hash")?;
    let mut reader = builder.build()?;

    let mut out = Vec::new();
    while let Some(batch) = reader.next() {
        let batch = batch?;
        let ts = i64_col(&batch, ts_idx, "timestamp")?;
        let maker = str_col(&batch, maker_idx, "maker")?;
        let maker_asset = str_col(&batch, maker_asset_idx, "maker_asset_id")?;
        let maker_amount = i64_col(&batch, maker_amount_idx, "maker_amount_filled")?;
        let taker = str_col(&batch, taker_idx, "taker")?;
        let taker_asset = str_col(&batch, taker_asset_idx, "taker_asset_id")?;
        let taker_amount = i64_col(&batch, taker_amount_idx, "taker_amount_filled")?;
        let tx = str_col(&batch, tx_idx, "transaction_hash")?;
        for i in 0..batch.num_rows() {
            out.push(FillRow {
                timestamp: ts.value(i),
                maker: maker.value(i).to_string(),
                maker_asset_id: maker_asset.value(i).to_string(),
                maker_amount_filled: maker_amount.value(i),
                taker: taker.value(i).to_string(),
                taker_asset_id: taker_asset.value(i).to_string(),
                taker_amount_filled: taker_amount.value(i),
                transaction_hash: tx.value(i).to_string(),
            });
        }
    }
    Ok(out)
}

pub fn read_trades(path: &Path) -> Result<Vec<TradeRow>, StoreError> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let ts_idx = schema.index_of("timestamp")?;
    let market_idx = schema.index_of("market_id")?;
    let maker_idx = schema.index_of("maker")?;
    let taker_idx = schema.index_of("taker")?;
    let side_idx = schema.index_of("nonusdc_side")?;
    let maker_dir_idx = schema.index_of("maker_direction")?;
    let taker_dir_idx = schema.index_of("taker_direction")?;
    let price_idx = schema.index_of("price")?;
    let usd_idx = schema.index_of("usd_amount")?;
    let token_idx = schema.index_of("token_amount")?;
    let tx_idx = schema.index_of("transaction_hash")?;
    let mut reader = builder.build()?;

    let mut out = Vec::new();
    while let Some(batch) = reader.next() {
        let batch = batch?;
        let ts = i64_col(&batch, ts_idx, "timestamp")?;
        let market = str_col(&batch, market_idx, "market_id")?;
        let maker = str_col(&batch, maker_idx, "maker")?;
        let taker = str_col(&batch, taker_idx, "taker")?;
        let side = str_col(&batch, side_idx, "nonusdc_side")?;
        let maker_dir = str_col(&batch, maker_dir_idx, "maker_direction")?;
        let taker_dir = str_col(&batch, taker_dir_idx, "taker_direction")?;
        let price = f64_col(&batch, price_idx, "price")?;
        let usd = f64_col(&batch, usd_idx, "usd_amount")?;
        let token = f64_col(&batch, token_idx, "token_amount")?;
        let tx = str_col(&batch, tx_idx, "transaction_hash")?;
        for i in 0..batch.num_rows() {
            out.push(TradeRow {
                timestamp: ts.value(i),
                market_id: market.value(i).to_string(),
                maker: maker.value(i).to_string(),
                taker: taker.value(i).to_string(),
                nonusdc_side: parse_enum::<TokenSide>(side.value(i), "nonusdc_side")?,
                maker_direction: parse_enum::<TradeDirection>(maker_dir.value(i), "maker_direction")?,
                taker_direction: parse_enum::<TradeDirection>(taker_dir.value(i), "taker_direction")?,
                price: price.value(i),
                usd_amount: usd.value(i),
                token_amount: token.value(i),
                transaction_hash: tx.value(i).to_string(),
            });
        }
    }
    Ok(out)
}

pub fn read_markets(path: &Path) -> Result<Vec<MarketRow>, StoreError> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let created_idx = schema.index_of("created_at")?;
    let id_idx = schema.index_of("id")?;
    let token1_idx = schema.index_of("token1")?;
    let token2_idx = schema.index_of("token2")?;
    let mut reader = builder.build()?;

    let mut out = Vec::new();
    while let Some(batch) = reader.next() {
        let batch = batch?;
        let created = str_col(&batch, created_idx, "created_at")?;
        let id = str_col(&batch, id_idx, "id")?;
        let token1 = str_col(&batch, token1_idx, "token1")?;
        let token2 = str_col(&batch, token2_idx, "token2")?;
        for i in 0..batch.num_rows() {
            out.push(MarketRow {
                created_at: created.value(i).to_string(),
                id: id.value(i).to_string(),
                token1: token1.value(i).to_string(),
                token2: token2.value(i).to_string(),
            });
        }
    }
    Ok(out)
}

fn parse_enum<T: FromStr>(raw: &str, name: &str) -> Result<T, StoreError> {
    T::from_str(raw)
        .map_err(|_| StoreError::Schema(format!("column {name} holds unknown value {raw:?}")))
}

// ---------- Stats reader ----------

/// Maximum non-null value of an Int64 column, or `None` for an empty file.
pub fn parquet_max_i64(path: &Path, column: &str) -> anyhow::Result<Option<i64>> {
    let file = fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let idx = schema.index_of(column)?;
    let mut reader = builder.build()?;

    let mut max: Option<i64> = None;
    while let Some(batch) = reader.next() {
        let batch = batch?;
        let col = batch
            .column(idx)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| anyhow::anyhow!("column {column} is not Int64"))?;
        for i in 0..col.len() {
            if col.is_null(i) {
                continue;
            }
            let v = col.value(i);
            max = Some(max.map_or(v, |m| m.max(v)));
        }
    }
    Ok(max)
}
