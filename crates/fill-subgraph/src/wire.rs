use serde::Deserialize;

use fill_types::fills::FillRow;

use crate::error::FetchError;

/// One `orderFilledEvents` record as the subgraph returns it. Everything is
/// a string on the wire, numeric fields included; coercion happens in
/// `try_into_row` and fails closed rather than letting untyped values
/// propagate downstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilledEvent {
    pub id: String,
    pub timestamp: String,
    pub maker: String,
    pub maker_asset_id: String,
    pub maker_amount_filled: String,
    pub taker: String,
    pub taker_asset_id: String,
    pub taker_amount_filled: String,
    pub transaction_hash: String,
    #[serde(default)]
    pub fee: Option<String>,
    #[serde(default)]
    pub order_hash: Option<String>,
}

impl OrderFilledEvent {
    /// Typed coercion into the persisted row shape.
    pub fn try_into_row(self) -> Result<FillRow, FetchError> {
        Ok(FillRow {
            timestamp: parse_i64("timestamp", &self.timestamp)?,
            maker: self.maker,
            maker_asset_id: self.maker_asset_id,
            maker_amount_filled: parse_i64("makerAmountFilled", &self.maker_amount_filled)?,
            taker: self.taker,
            taker_asset_id: self.taker_asset_id,
            taker_amount_filled: parse_i64("takerAmountFilled", &self.taker_amount_filled)?,
            transaction_hash: self.transaction_hash,
        })
    }
}

fn parse_i64(field: &str, raw: &str) -> Result<i64, FetchError> {
    raw.parse()
        .map_err(|_| FetchError::Decode(format!("field {field} is not an integer: {raw:?}")))
}

/// GraphQL envelope. A missing `data` object or any upstream error message
/// is treated as a malformed response.
#[derive(Debug, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<OrderFilledData>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
pub struct OrderFilledData {
    #[serde(rename = "orderFilledEvents")]
    pub order_filled_events: Vec<OrderFilledEvent>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}
