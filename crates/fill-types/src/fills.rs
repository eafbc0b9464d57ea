use serde::{Deserialize, Serialize};

/// Asset id of the collateral (USDC) leg in fill events.
pub const USDC_ASSET_ID: &str = "0";

/// Collateral and outcome tokens both use 6-decimal integer units.
pub const COLLATERAL_UNIT: f64 = 1_000_000.0;

/// One on-chain order fill as persisted in the raw store.
///
/// Immutable once written. `timestamp` is epoch seconds and doubles as the
/// ordering key for watermark/resume logic; the raw store partitions by its
/// UTC (year, month, day).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FillRow {
    pub timestamp: i64,
    pub maker: String,
    pub maker_asset_id: String,
    pub maker_amount_filled: i64,
    pub taker: String,
    pub taker_asset_id: String,
    pub taker_amount_filled: i64,
    pub transaction_hash: String,
}
