use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Which of a market's two outcome tokens a trade touched.
/// The serialized strings are part of the storage contract.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum TokenSide {
    #[strum(serialize = "token1")]
    #[serde(rename = "token1")]
    Token1,
    #[strum(serialize = "token2")]
    #[serde(rename = "token2")]
    Token2,
}

/// Direction of one party in a fill, resolved from which side held the
/// collateral leg.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum TradeDirection {
    #[strum(serialize = "BUY")]
    #[serde(rename = "BUY")]
    Buy,
    #[strum(serialize = "SELL")]
    #[serde(rename = "SELL")]
    Sell,
}

/// One normalized trade as persisted in the processed store.
///
/// Derived, never mutated after write; the processed store partitions by
/// the UTC (year, month) of `timestamp`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeRow {
    pub timestamp: i64,
    pub market_id: String,
    pub maker: String,
    pub taker: String,
    pub nonusdc_side: TokenSide,
    pub maker_direction: TradeDirection,
    pub taker_direction: TradeDirection,
    pub price: f64,
    pub usd_amount: f64,
    pub token_amount: f64,
    pub transaction_hash: String,
}
