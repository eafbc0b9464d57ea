use anyhow::{Context, Result};
use tracing::{debug, warn};

use fill_types::fills::FillRow;
use fill_types::retry::RetryPolicy;

use crate::client::FillSource;

/// Drives the upstream query loop from an exclusive lower bound.
///
/// Pages are yielded sorted by timestamp with anything at or below the
/// bound dropped; the bound then advances to the maximum timestamp observed,
/// so it moves strictly monotonically. An empty page ends the stream, and a
/// page shorter than `page_size` is yielded as the final one. No partial
/// page is ever handed to the caller: a failed request is retried whole.
pub struct PagedFetcher<'a> {
    source: &'a dyn FillSource,
    policy: RetryPolicy,
    page_size: usize,
    lower_bound: i64,
    done: bool,
}

impl<'a> PagedFetcher<'a> {
    pub fn new(
        source: &'a dyn FillSource,
        policy: RetryPolicy,
        page_size: usize,
        lower_bound: i64,
    ) -> Self {
        Self {
            source,
            policy,
            page_size,
            lower_bound,
            done: false,
        }
    }

    /// Highest timestamp handed to the caller so far; the resume bound.
    pub fn lower_bound(&self) -> i64 {
        self.lower_bound
    }

    async fn fetch_with_retry(&self) -> Result<Vec<FillRow>> {
        let mut attempts: u32 = 0;
        loop {
            match self.source.fetch_page(self.lower_bound, self.page_size).await {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_rate_limited() => {
                    warn!(after = self.lower_bound, "rate limited, backing off");
                    tokio::time::sleep(self.policy.rate_limit_delay).await;
                }
                Err(e) if e.is_transient() => {
                    warn!(after = self.lower_bound, error = %e, "transient fetch error, retrying");
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.policy.max_attempts {
                        return Err(e).with_context(|| {
                            format!(
                                "page fetch failed after {attempts} attempts (after={})",
                                self.lower_bound
                            )
                        });
                    }
                    warn!(
                        after = self.lower_bound,
                        error = %e,
                        attempt = attempts,
                        "fetch error, retrying"
                    );
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
            }
        }
    }

    /// Next page of rows strictly above the current bound, or `None` once
    /// the stream is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<FillRow>>> {
        if self.done {
            return Ok(None);
        }
        let fetched = self.fetch_with_retry().await?;
        let fetched_len = fetched.len();
        if fetched_len == 0 {
            self.done = true;
            return Ok(None);
        }
        if fetched_len < self.page_size {
            // Short page: yield it, then stop.
            self.done = true;
        }

        // Upstream ordering is not fully trusted: sort defensively and drop
        // anything that does not advance the bound.
        let mut rows = fetched;
        rows.sort_by_key(|r| r.timestamp);
        rows.retain(|r| r.timestamp > self.lower_bound);

        let Some(max_ts) = rows.last().map(|r| r.timestamp) else {
            // A whole page at or below the bound would loop forever.
            warn!(
                after = self.lower_bound,
                returned = fetched_len,
                "page contained no rows above the bound, stopping"
            );
            self.done = true;
            return Ok(None);
        };
        self.lower_bound = max_ts;
        debug!(rows = rows.len(), watermark = self.lower_bound, "yielding page");
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn fill(ts: i64) -> FillRow {
        FillRow {
            timestamp: ts,
            maker: "0xmaker".to_string(),
            maker_asset_id: "0".to_string(),
            maker_amount_filled: 500_000,
            taker: "0xtaker".to_string(),
            taker_asset_id: "77001".to_string(),
            taker_amount_filled: 1_000_000,
            transaction_hash: format!("0x{ts:x}"),
        }
    }

    fn fills(range: std::ops::RangeInclusive<i64>) -> Vec<FillRow> {
        range.map(fill).collect()
    }

    /// Serves a scripted sequence of results, counting requests.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<FillRow>, FetchError>>>,
        requests: AtomicU32,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<FillRow>, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                requests: AtomicU32::new(0),
            }
        }

        fn requests(&self) -> u32 {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FillSource for ScriptedSource {
        async fn fetch_page(&self, _after: i64, _limit: usize) -> Result<Vec<FillRow>, FetchError> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            retry_delay: Duration::from_millis(0),
            rate_limit_delay: Duration::from_millis(0),
        }
    }

    #[tokio::test]
    async fn yields_pages_until_short_page() {
        let source = ScriptedSource::new(vec![Ok(fills(1..=5)), Ok(fills(6..=7))]);
        let mut fetcher = PagedFetcher::new(&source, fast_policy(3), 5, 0);

        let page1 = fetcher.next_page().await.unwrap().unwrap();
        assert_eq!(page1.len(), 5);
        assert_eq!(fetcher.lower_bound(), 5);

        let page2 = fetcher.next_page().await.unwrap().unwrap();
        assert_eq!(page2.len(), 2);
        assert_eq!(fetcher.lower_bound(), 7);

        // Short page ended the stream without another request.
        assert!(fetcher.next_page().await.unwrap().is_none());
        assert_eq!(source.requests(), 2);
    }

    #[tokio::test]
    async fn empty_first_page_ends_the_stream() {
        let source = ScriptedSource::new(vec![Ok(Vec::new())]);
        let mut fetcher = PagedFetcher::new(&source, fast_policy(3), 5, 1400);
        assert!(fetcher.next_page().await.unwrap().is_none());
        assert_eq!(fetcher.lower_bound(), 1400);
    }

    #[tokio::test]
    async fn sorts_and_drops_rows_at_or_below_the_bound() {
        // Out of order, with one stale row (ts=10) and the rest above.
        let page = vec![fill(12), fill(10), fill(14), fill(13)];
        let source = ScriptedSource::new(vec![Ok(page)]);
        let mut fetcher = PagedFetcher::new(&source, fast_policy(3), 4, 10);

        let rows = fetcher.next_page().await.unwrap().unwrap();
        let stamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![12, 13, 14]);
        assert_eq!(fetcher.lower_bound(), 14);
    }

    #[tokio::test]
    async fn transient_errors_retry_beyond_the_bounded_budget() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::Transport("connection reset".to_string())),
            Err(FetchError::Transport("connection reset".to_string())),
            Err(FetchError::Transport("connection reset".to_string())),
            Err(FetchError::Transport("connection reset".to_string())),
            Ok(fills(1..=2)),
        ]);
        // max_attempts=1 would fail immediately for application errors;
        // transport errors must keep going regardless.
        let mut fetcher = PagedFetcher::new(&source, fast_policy(1), 5, 0);
        let rows = fetcher.next_page().await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(source.requests(), 5);
    }

    #[tokio::test]
    async fn rate_limit_waits_do_not_consume_the_budget() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::RateLimited),
            Err(FetchError::RateLimited),
            Ok(fills(1..=2)),
        ]);
        let mut fetcher = PagedFetcher::new(&source, fast_policy(1), 5, 0);
        let rows = fetcher.next_page().await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn application_errors_exhaust_the_budget() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::Status {
                status: 500,
                body: "boom".to_string(),
            }),
            Err(FetchError::Status {
                status: 500,
                body: "boom".to_string(),
            }),
            Err(FetchError::Status {
                status: 500,
                body: "boom".to_string(),
            }),
        ]);
        let mut fetcher = PagedFetcher::new(&source, fast_policy(3), 5, 0);
        let err = fetcher.next_page().await.unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(source.requests(), 3);
    }

    #[tokio::test]
    async fn application_error_then_success_within_budget() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::Decode("truncated body".to_string())),
            Ok(fills(1..=3)),
        ]);
        let mut fetcher = PagedFetcher::new(&source, fast_policy(3), 5, 0);
        let rows = fetcher.next_page().await.unwrap().unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn full_page_of_stale_rows_stops_instead_of_spinning() {
        let source = ScriptedSource::new(vec![Ok(vec![fill(5), fill(6)])]);
        let mut fetcher = PagedFetcher::new(&source, fast_policy(3), 2, 10);
        assert!(fetcher.next_page().await.unwrap().is_none());
        assert_eq!(fetcher.lower_bound(), 10);
    }
}
