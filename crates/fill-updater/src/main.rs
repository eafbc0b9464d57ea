use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fill_pipelines::ingest::IngestionPipeline;
use fill_pipelines::markets::load_asset_book;
use fill_pipelines::transform::{TransformPipeline, UnmatchedPolicy};
use fill_store::partition::PartitionStore;
use fill_subgraph::client::SubgraphClient;
use fill_types::retry::RetryPolicy;
use fill_types::run::RunContext;

const DEFAULT_SUBGRAPH_URL: &str =
    "https://api.goldsky.com/api/public/project_cl6mb8i9h0003e201j6li0diw/subgraphs/orderbook-subgraph/0.0.1/gn";

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn unmatched_policy(data_root: &str) -> UnmatchedPolicy {
    match std::env::var("FILL_UNMATCHED_POLICY").as_deref() {
        Ok("quarantine") => UnmatchedPolicy::Quarantine {
            store: PartitionStore::new(
                format!("{data_root}/quarantine/unmatched"),
                &["year", "month", "day"],
            ),
        },
        Ok("fail") => UnmatchedPolicy::FailRatio {
            max_ratio: env_or("FILL_UNMATCHED_MAX_RATIO", 0.05),
        },
        _ => UnmatchedPolicy::Drop,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .compact()
        .init();
    let _ = dotenvy::dotenv();

    let data_root: String = env_or("FILL_DATA_ROOT", "data".to_string());
    let subgraph_url: String =
        std::env::var("FILL_SUBGRAPH_URL").unwrap_or_else(|_| DEFAULT_SUBGRAPH_URL.to_string());
    let page_size: usize = env_or("FILL_PAGE_SIZE", 1000);
    let chunk_files: usize = env_or("FILL_CHUNK_FILES", 10);
    let http_timeout: u64 = env_or("FILL_HTTP_TIMEOUT_SECS", 30);
    let policy = RetryPolicy {
        max_attempts: env_or("FILL_MAX_ATTEMPTS", 3),
        retry_delay: Duration::from_secs(env_or("FILL_RETRY_DELAY_SECS", 5)),
        rate_limit_delay: Duration::from_secs(env_or("FILL_RATE_LIMIT_DELAY_SECS", 10)),
    };
    policy.validate()?;

    let raw = PartitionStore::new(format!("{data_root}/orderFilled"), &["year", "month", "day"]);
    let trades = PartitionStore::new(
        format!("{data_root}/processed/trades"),
        &["year", "month"],
    );
    let markets = PartitionStore::new(
        std::env::var("FILL_MARKETS_DIR").unwrap_or_else(|_| format!("{data_root}/markets")),
        &["year", "month"],
    );

    let ctx = RunContext::starting_now();
    info!(run = %ctx.tag, url = %subgraph_url, root = %data_root, "starting update cycle");

    let client = SubgraphClient::new(subgraph_url, Duration::from_secs(http_timeout));
    let ingest = IngestionPipeline::new(&raw, &client, policy, page_size);
    let report = ingest.run(&ctx).await?;
    info!(
        pages = report.pages,
        rows = report.rows_written,
        watermark = report.end_watermark,
        "ingestion finished"
    );

    let book = load_asset_book(&markets)?;
    let transform = TransformPipeline::new(&raw, &trades, chunk_files)
        .with_unmatched_policy(unmatched_policy(&data_root));
    let report = transform.run(&book, &ctx)?;
    info!(
        chunks = report.chunks,
        emitted = report.rows_emitted,
        unmatched = report.rows_unmatched,
        malformed = report.rows_malformed,
        "transform finished"
    );

    Ok(())
}
