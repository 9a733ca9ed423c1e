//! Run identity passed explicitly through every pipeline step

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Execution id of one pipeline run, e.g. `manual__20260217T120000`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id for a run started by hand rather than by the scheduler
    pub fn manual(started_at: DateTime<Utc>) -> Self {
        Self(format!("manual__{}", started_at.format("%Y%m%dT%H%M%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity and clock of a run.
///
/// `started_at` is the single "now" used for every audit timestamp written
/// by the run.
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(run_id: RunId, started_at: DateTime<Utc>) -> Self {
        Self { run_id, started_at }
    }

    /// Start a run now, with the supplied id or a generated manual one
    pub fn start(run_id: Option<String>) -> Self {
        let started_at = Utc::now();
        let run_id = match run_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => RunId::new(id),
            None => RunId::manual(started_at),
        };
        Self { run_id, started_at }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_run_id_format() {
        let ts = Utc.with_ymd_and_hms(2026, 2, 17, 9, 5, 3).unwrap();
        assert_eq!(RunId::manual(ts).as_str(), "manual__20260217T090503");
    }

    #[test]
    fn test_start_prefers_supplied_id() {
        let ctx = RunContext::start(Some("scheduled__2026-02-17".to_string()));
        assert_eq!(ctx.run_id.as_str(), "scheduled__2026-02-17");

        let ctx = RunContext::start(Some("  ".to_string()));
        assert!(ctx.run_id.as_str().starts_with("manual__"));
    }
}
