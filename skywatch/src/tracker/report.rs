use serde::Serialize;

use crate::types::TrackedAircraftRecord;

/// Outcome of one sync or refresh of a manufacturer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub manufacturer: String,
    pub active_count: usize,
    pub pending_count: usize,
    /// Current active set, ordered by identifier.
    pub positions: Vec<TrackedAircraftRecord>,
    /// One line per batch that failed or was skipped.
    pub warnings: Vec<String>,
    pub batches_attempted: usize,
    pub batches_failed: usize,
}

impl SyncReport {
    /// Whether some identifiers could not be checked this round.
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// One-line summary, e.g. `"2 active, 1 pending"`.
    pub fn status(&self) -> String {
        let counts = format!(
            "{} active, {} pending",
            self.active_count, self.pending_count
        );
        if self.is_partial() {
            format!("{counts} - will retry")
        } else {
            counts
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(active: usize, pending: usize, warnings: &[&str]) -> SyncReport {
        SyncReport {
            manufacturer: "Boeing".to_string(),
            active_count: active,
            pending_count: pending,
            positions: Vec::new(),
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
            batches_attempted: 1,
            batches_failed: warnings.len(),
        }
    }

    #[test]
    fn test_status_clean() {
        assert_eq!(report(2, 1, &[]).status(), "2 active, 1 pending");
    }

    #[test]
    fn test_status_partial() {
        let r = report(0, 3, &["batch 1/1: upstream unavailable: 503"]);
        assert!(r.is_partial());
        assert_eq!(r.status(), "0 active, 3 pending - will retry");
    }

    #[test]
    fn test_serializes_counts() {
        let json = serde_json::to_value(report(1, 0, &[])).unwrap();
        assert_eq!(json["active_count"], 1);
        assert_eq!(json["manufacturer"], "Boeing");
    }
}
