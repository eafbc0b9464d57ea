use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::trades::TokenSide;

/// Market metadata projection consumed by the transform join. The
/// acquisition process that builds this dataset is out of scope; only the
/// read side matters here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRow {
    pub created_at: String,
    pub id: String,
    pub token1: String,
    pub token2: String,
}

/// Resolved (market, side) for one outcome-token asset id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetRef {
    pub market_id: String,
    pub side: TokenSide,
}

/// asset id -> (market, side) lookup built by exploding each market's two
/// outcome tokens. Each asset id maps to at most one pair; the first-seen
/// mapping wins on duplicates.
#[derive(Default, Debug)]
pub struct AssetBook {
    by_asset: HashMap<String, AssetRef>,
}

impl AssetBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register both outcome tokens of `market`. Blank token ids are
    /// skipped; existing entries are left untouched.
    pub fn insert_market(&mut self, market: &MarketRow) {
        let tokens = [
            (&market.token1, TokenSide::Token1),
            (&market.token2, TokenSide::Token2),
        ];
        for (token, side) in tokens {
            if token.is_empty() {
                continue;
            }
            self.by_asset
                .entry(token.clone())
                .or_insert_with(|| AssetRef {
                    market_id: market.id.clone(),
                    side,
                });
        }
    }

    pub fn get(&self, asset_id: &str) -> Option<&AssetRef> {
        self.by_asset.get(asset_id)
    }

    pub fn len(&self) -> usize {
        self.by_asset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_asset.is_empty()
    }
}
