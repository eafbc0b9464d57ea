use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use fill_types::fills::FillRow;

use crate::error::FetchError;
use crate::wire::GraphQlResponse;

/// Paginated source of fill events ordered by timestamp. `after` is an
/// exclusive lower bound on the ordering key; implementations must honor
/// `limit` and return rows in ascending timestamp order as far as the
/// upstream allows.
#[async_trait]
pub trait FillSource: Send + Sync {
    async fn fetch_page(&self, after: i64, limit: usize) -> Result<Vec<FillRow>, FetchError>;
}

/// GraphQL client for the order-fill subgraph.
pub struct SubgraphClient {
    http: reqwest::Client,
    url: String,
}

impl SubgraphClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");
        Self {
            http,
            url: url.into(),
        }
    }

    fn page_query(after: i64, limit: usize) -> String {
        format!(
            "query {{ orderFilledEvents(orderBy: timestamp, first: {limit}, \
             where: {{timestamp_gt: \"{after}\"}}) {{ \
             id timestamp maker makerAssetId makerAmountFilled \
             taker takerAssetId takerAmountFilled transactionHash fee orderHash }} }}"
        )
    }
}

#[async_trait]
impl FillSource for SubgraphClient {
    async fn fetch_page(&self, after: i64, limit: usize) -> Result<Vec<FillRow>, FetchError> {
        let body = serde_json::json!({ "query": Self::page_query(after, limit) });
        let resp = self.http.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let parsed: GraphQlResponse =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
        if let Some(errors) = parsed.errors {
            if !errors.is_empty() {
                let joined = errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(FetchError::Decode(joined));
            }
        }
        let events = parsed
            .data
            .ok_or_else(|| FetchError::Decode("response missing data".to_string()))?
            .order_filled_events;

        // The subgraph occasionally repeats records; drop in-page duplicates
        // by upstream id before coercion.
        let mut seen = HashSet::with_capacity(events.len());
        let mut rows = Vec::with_capacity(events.len());
        for event in events {
            if !seen.insert(event.id.clone()) {
                continue;
            }
            rows.push(event.try_into_row()?);
        }
        debug!(after, returned = rows.len(), "fetched fill page");
        Ok(rows)
    }
}
