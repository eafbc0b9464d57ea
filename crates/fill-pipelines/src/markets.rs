use std::collections::HashSet;

use anyhow::Result;
use tracing::{info, warn};

use fill_store::parquet::read_markets;
use fill_store::partition::PartitionStore;
use fill_types::markets::{AssetBook, MarketRow};

/// Load the deduplicated asset -> (market, side) book from a market
/// metadata dataset.
///
/// This is a read-only boundary: building and refreshing the dataset is an
/// out-of-band job. When an id repeats across files, the earliest-created
/// row wins; unreadable files are skipped with a warning.
pub fn load_asset_book(store: &PartitionStore) -> Result<AssetBook> {
    let mut markets: Vec<MarketRow> = Vec::new();
    for path in store.list_files()? {
        match read_markets(&path) {
            Ok(mut rows) => markets.append(&mut rows),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable market file");
            }
        }
    }
    let rows_read = markets.len();
    markets.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    let mut book = AssetBook::new();
    let mut seen: HashSet<String> = HashSet::with_capacity(markets.len());
    for market in &markets {
        if !seen.insert(market.id.clone()) {
            continue;
        }
        book.insert_market(market);
    }
    info!(
        markets = seen.len(),
        rows = rows_read,
        assets = book.len(),
        "loaded market asset book"
    );
    Ok(book)
}
