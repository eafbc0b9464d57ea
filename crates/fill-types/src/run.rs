use chrono::{DateTime, Utc};

/// Per-run context threaded explicitly into the pipelines.
///
/// `tag` names run-scoped artifacts (side datasets, per-run chunk files) and
/// shows up in logs, so two runs never collide on filenames.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub started_at: DateTime<Utc>,
    pub tag: String,
}

impl RunContext {
    pub fn starting_now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(started_at: DateTime<Utc>) -> Self {
        Self {
            tag: started_at.format("%Y%m%d_%H%M%S").to_string(),
            started_at,
        }
    }
}
