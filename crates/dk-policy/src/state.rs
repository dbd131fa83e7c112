//! Policy store: runtime-checked queries over the schema in `migrations/`.
//!
//! Uses `sqlx::query`/`query_as` with derived `FromRow` impls rather than
//! the `query!`/`query_as!` macros, since those macros need `.sqlx` offline
//! metadata produced by `cargo sqlx prepare` against a live database at
//! compile time — unavailable here.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{
    Api, ApiUsage, ApiUsageSummary, ApiUserAccess, NotificationType, Policy, PolicyChange,
    PolicyRule, RuleType, SummaryPeriod,
};

#[derive(Clone)]
pub struct PolicyState {
    pool: PgPool,
}

impl PolicyState {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find_api_by_name(&self, name: &str) -> Result<Option<Api>, ApiError> {
        let row = sqlx::query_as::<_, Api>(
            "SELECT id, name, is_active, policy_id, deprecation_date, created_at, updated_at
             FROM apis WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_user_access(&self, api_id: Uuid, external_user_id: &str) -> Result<Option<ApiUserAccess>, ApiError> {
        let row = sqlx::query_as::<_, ApiUserAccess>(
            "SELECT id, api_id, external_user_id, is_active, created_at
             FROM api_user_access WHERE api_id = $1 AND external_user_id = $2",
        )
        .bind(api_id)
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_policy(&self, policy_id: Uuid) -> Result<Option<Policy>, ApiError> {
        let row = sqlx::query_as::<_, Policy>(
            r#"SELECT id, name, type as "type", is_active, created_at, updated_at
               FROM policies WHERE id = $1"#,
        )
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_policy_rules(&self, policy_id: Uuid) -> Result<Vec<PolicyRule>, ApiError> {
        let rows = sqlx::query_as::<_, PolicyRule>(
            "SELECT id, policy_id, rule_type, limit_value, period, action, priority
             FROM policy_rules WHERE policy_id = $1 ORDER BY priority ASC",
        )
        .bind(policy_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    fn day_start_of(at: DateTime<Utc>) -> DateTime<Utc> {
        at.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
    }

    /// Current day's usage summary for the given api/user, or a zeroed
    /// summary if none has been recorded yet (spec.md §4.8 step 4).
    pub async fn current_daily_summary(&self, api_id: Uuid, external_user_id: &str) -> Result<ApiUsageSummary, ApiError> {
        let day_start = Self::day_start_of(Utc::now());
        let row = sqlx::query_as::<_, ApiUsageSummary>(
            "SELECT api_id, external_user_id, period_type, period_start, period_end,
                    total_requests, total_tokens, total_credits, total_time_ms
             FROM api_usage_summary
             WHERE api_id = $1 AND external_user_id = $2
               AND period_type = 'daily' AND period_start = $3",
        )
        .bind(api_id)
        .bind(external_user_id)
        .bind(day_start)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.unwrap_or(ApiUsageSummary {
            api_id,
            external_user_id: external_user_id.to_string(),
            period_type: SummaryPeriod::Daily,
            period_start: day_start,
            period_end: day_start + Duration::days(1),
            total_requests: 0,
            total_tokens: 0,
            total_credits: 0,
            total_time_ms: 0,
        }))
    }

    /// Append one usage row and upsert the matching daily summary
    /// (spec.md §4.9). Callers log and swallow failures so a write hiccup
    /// never blocks the response path.
    pub async fn record_usage(&self, usage: &ApiUsage) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO api_usage (id, api_id, external_user_id, timestamp, request_count,
                                     tokens_used, credits_consumed, execution_time_ms, endpoint,
                                     was_throttled, was_blocked)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(usage.id)
        .bind(usage.api_id)
        .bind(&usage.external_user_id)
        .bind(usage.timestamp)
        .bind(usage.request_count)
        .bind(usage.tokens_used)
        .bind(usage.credits_consumed)
        .bind(usage.execution_time_ms)
        .bind(&usage.endpoint)
        .bind(usage.was_throttled)
        .bind(usage.was_blocked)
        .execute(&mut *tx)
        .await?;

        let day_start = Self::day_start_of(usage.timestamp);
        let day_end = day_start + Duration::days(1);

        sqlx::query(
            "INSERT INTO api_usage_summary (api_id, external_user_id, period_type, period_start,
                                             period_end, total_requests, total_tokens, total_credits, total_time_ms)
             VALUES ($1, $2, 'daily', $3, $4, $5, $6, $7, $8)
             ON CONFLICT (api_id, external_user_id, period_type, period_start)
             DO UPDATE SET
                 total_requests = api_usage_summary.total_requests + EXCLUDED.total_requests,
                 total_tokens = api_usage_summary.total_tokens + EXCLUDED.total_tokens,
                 total_credits = api_usage_summary.total_credits + EXCLUDED.total_credits,
                 total_time_ms = api_usage_summary.total_time_ms + EXCLUDED.total_time_ms",
        )
        .bind(usage.api_id)
        .bind(&usage.external_user_id)
        .bind(day_start)
        .bind(day_end)
        .bind(usage.request_count)
        .bind(usage.tokens_used)
        .bind(usage.credits_consumed)
        .bind(usage.execution_time_ms)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Insert a quota notification, returning `false` without writing if an
    /// identical `(api, user, rule_type, type)` notification already exists
    /// for today (spec.md §4.8's per-window idempotency requirement).
    pub async fn notify_once(
        &self,
        api_id: Uuid,
        external_user_id: &str,
        rule_type: RuleType,
        notification_type: NotificationType,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            "INSERT INTO quota_notifications (id, api_id, external_user_id, rule_type, notification_type)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT ON CONSTRAINT idx_quota_notifications_idempotency DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(api_id)
        .bind(external_user_id)
        .bind(rule_type)
        .bind(notification_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn due_policy_changes(&self, now: DateTime<Utc>) -> Result<Vec<PolicyChange>, ApiError> {
        let rows = sqlx::query_as::<_, PolicyChange>(
            "SELECT id, api_id, old_policy_id, new_policy_id, changed_at, changed_by,
                    effective_date, reason, applied
             FROM policy_changes
             WHERE NOT applied AND effective_date <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn apply_policy_change(&self, change: &PolicyChange) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE apis SET policy_id = $1, updated_at = now() WHERE id = $2")
            .bind(change.new_policy_id)
            .bind(change.api_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE policy_changes SET applied = true WHERE id = $1")
            .bind(change.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Recompute the weekly/monthly rollups from the daily summaries in
    /// range (spec.md §4.9's 6h background refresh).
    pub async fn refresh_rollup_summaries(&self, period: SummaryPeriod, now: DateTime<Utc>) -> Result<(), ApiError> {
        let (period_name, start) = match period {
            SummaryPeriod::Weekly => ("weekly", now - Duration::weeks(1)),
            SummaryPeriod::Monthly => ("monthly", now - Duration::days(30)),
            SummaryPeriod::Daily => return Ok(()),
        };

        sqlx::query(
            "INSERT INTO api_usage_summary (api_id, external_user_id, period_type, period_start,
                                             period_end, total_requests, total_tokens, total_credits, total_time_ms)
             SELECT api_id, external_user_id, $1::summary_period, $2, $3,
                    COALESCE(SUM(total_requests), 0), COALESCE(SUM(total_tokens), 0),
                    COALESCE(SUM(total_credits), 0), COALESCE(SUM(total_time_ms), 0)
             FROM api_usage_summary
             WHERE period_type = 'daily' AND period_start >= $2
             GROUP BY api_id, external_user_id
             ON CONFLICT (api_id, external_user_id, period_type, period_start)
             DO UPDATE SET
                 total_requests = EXCLUDED.total_requests,
                 total_tokens = EXCLUDED.total_tokens,
                 total_credits = EXCLUDED.total_credits,
                 total_time_ms = EXCLUDED.total_time_ms",
        )
        .bind(period_name)
        .bind(start)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
