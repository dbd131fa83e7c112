//! Background workers for usage-summary rollups and policy-change
//! application (spec.md §4.9, §4.10). Grounded on the teacher
//! `ambient-node`'s periodic-tick management loop pattern
//! (`tokio::time::interval` driving a long-lived background task).

use std::sync::Arc;

use chrono::Utc;
use tokio::time::interval;

use crate::models::SummaryPeriod;
use crate::state::PolicyState;

const SUMMARY_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(6 * 60 * 60);
const POLICY_CHANGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Recomputes weekly/monthly rollups from the daily summaries every 6h.
pub fn spawn_summary_refresh_worker(state: Arc<PolicyState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(SUMMARY_REFRESH_INTERVAL);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            if let Err(err) = state.refresh_rollup_summaries(SummaryPeriod::Weekly, now).await {
                tracing::warn!(error = ?err, "weekly usage rollup refresh failed");
            }
            if let Err(err) = state.refresh_rollup_summaries(SummaryPeriod::Monthly, now).await {
                tracing::warn!(error = ?err, "monthly usage rollup refresh failed");
            }
        }
    })
}

/// Applies any `PolicyChange` whose `effective_date` has passed, every 5m.
pub fn spawn_policy_change_worker(state: Arc<PolicyState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(POLICY_CHANGE_INTERVAL);
        loop {
            ticker.tick().await;
            let due = match state.due_policy_changes(Utc::now()).await {
                Ok(due) => due,
                Err(err) => {
                    tracing::warn!(error = ?err, "failed to list due policy changes");
                    continue;
                }
            };

            for change in due {
                if let Err(err) = state.apply_policy_change(&change).await {
                    tracing::warn!(error = ?err, change_id = %change.id, "failed to apply policy change");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_match_spec() {
        assert_eq!(SUMMARY_REFRESH_INTERVAL.as_secs(), 6 * 60 * 60);
        assert_eq!(POLICY_CHANGE_INTERVAL.as_secs(), 5 * 60);
    }
}
