//! Client for the order-fill indexing API.
//!
//! The upstream is a paginated GraphQL endpoint: records come back ordered
//! by their epoch-seconds timestamp, filtered by an exclusive lower bound,
//! capped at a page size. `wire` owns the typed payload and its coercion
//! into storage rows, `client` the HTTP transport, and `paged` the retrying
//! fetch loop that the ingestion pipeline drives.

pub mod client;
pub mod error;
pub mod paged;
pub mod wire;
