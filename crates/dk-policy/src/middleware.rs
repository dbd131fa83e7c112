//! Policy enforcement middleware (spec.md §4.8, C9). Grounded on the
//! teacher's `api-server/src/middleware/auth.rs` for the
//! extensions-carried-state/`Next`-wrapping shape, generalized from
//! authentication to quota enforcement.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{Action, ApiUsage, ApiUsageSummary, NotificationType, PolicyRule, RuleType};
use crate::state::PolicyState;

const REQUEST_ID_HEADER: &str = "x-api-id";
const EXTERNAL_USER_HEADER: &str = "x-external-user-id";
const THROTTLE_DELAY: StdDuration = StdDuration::from_millis(500);
const APPROACHING_LIMIT_RATIO: f64 = 0.8;
const EXCEEDED_RATIO: f64 = 1.0;

/// Per-request accounting the handler's response phase needs; stashed in
/// request extensions by the middleware and read back after `next.run`.
#[derive(Debug, Clone)]
struct EnforcementContext {
    api_id: Uuid,
    external_user_id: String,
    endpoint: String,
    started_throttled: bool,
}

/// The core enforcement pass. Missing `api_id` or `external_user_id`
/// headers means the caller isn't a tracked API consumer — passes through
/// untracked rather than rejecting (spec.md §4.8 step 1).
pub async fn enforce_policy(
    State(state): State<Arc<PolicyState>>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let api_name = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok());
    let external_user_id = headers.get(EXTERNAL_USER_HEADER).and_then(|v| v.to_str().ok());

    let (Some(api_name), Some(external_user_id)) = (api_name, external_user_id) else {
        return Ok(next.run(request).await);
    };

    let api = state
        .find_api_by_name(api_name)
        .await?
        .ok_or_else(|| ApiError::not_found("unknown api"))?;

    if !api.is_active {
        return Err(ApiError::forbidden("api is not active"));
    }

    let access = state.find_user_access(api.id, external_user_id).await?;
    if let Some(access) = &access {
        if !access.is_active {
            return Err(ApiError::forbidden("access to this api has been revoked"));
        }
    } else {
        return Err(ApiError::forbidden("no access grant for this api"));
    }

    if api.deprecation_date.is_some_and(|d| d <= Utc::now()) {
        tracing::warn!(api = %api.name, "serving request against a deprecated api");
    }

    let mut started_throttled = false;

    if let Some(policy_id) = api.policy_id {
        if let Some(policy) = state.find_policy(policy_id).await? {
            if policy.is_active && policy.policy_type != crate::models::PolicyType::Free {
                let summary = state.current_daily_summary(api.id, external_user_id).await?;
                let rules = state.find_policy_rules(policy_id).await?;

                for rule in &rules {
                    match rule.action {
                        Action::Block => {
                            if usage_meets_ratio(rule, &summary, EXCEEDED_RATIO) {
                                notify(&state, api.id, external_user_id, rule.rule_type, NotificationType::LimitReached).await;
                                return Err(ApiError::quota_exceeded(format!(
                                    "{:?} quota exceeded for this policy",
                                    rule.rule_type
                                )));
                            }
                        }
                        Action::Throttle => {
                            if usage_meets_ratio(rule, &summary, EXCEEDED_RATIO) {
                                notify(&state, api.id, external_user_id, rule.rule_type, NotificationType::LimitReached).await;
                                started_throttled = true;
                                tokio::time::sleep(THROTTLE_DELAY).await;
                            }
                        }
                        Action::Notify => {
                            if usage_meets_ratio(rule, &summary, APPROACHING_LIMIT_RATIO) {
                                notify(&state, api.id, external_user_id, rule.rule_type, NotificationType::ApproachingLimit).await;
                            }
                        }
                        Action::Log => {
                            tracing::info!(api = %api.name, user = external_user_id, rule = ?rule.rule_type, "usage rule logged");
                        }
                    }
                }
            }
        }
    }

    let endpoint = request.uri().path().to_string();
    request.extensions_mut().insert(EnforcementContext {
        api_id: api.id,
        external_user_id: external_user_id.to_string(),
        endpoint: endpoint.clone(),
        started_throttled,
    });

    let started_at = Utc::now();
    let response = next.run(request).await;
    let elapsed_ms = (Utc::now() - started_at).num_milliseconds().max(0);

    record_usage_async(state, api.id, external_user_id.to_string(), endpoint, started_throttled, elapsed_ms, &response);

    Ok(response)
}

fn used_amount(rule_type: RuleType, summary: &ApiUsageSummary) -> i64 {
    match rule_type {
        RuleType::Token => summary.total_tokens,
        RuleType::Request => summary.total_requests,
        RuleType::Credit => summary.total_credits,
        RuleType::Time => summary.total_time_ms,
    }
}

/// `limit_value` is denominated in the rule's natural unit (tokens,
/// requests, credits, seconds); `total_time_ms` is milliseconds, so a
/// `time` rule's limit is scaled by 1000 before comparison (spec.md
/// §4.8's exceeded-predicate table).
fn effective_limit(rule: &PolicyRule) -> f64 {
    match rule.rule_type {
        RuleType::Time => rule.limit_value as f64 * 1000.0,
        _ => rule.limit_value as f64,
    }
}

/// Whether `rule`'s usage has reached `ratio` of its limit. `block`/
/// `throttle` call this with `EXCEEDED_RATIO` (1.0); `notify` calls it with
/// `APPROACHING_LIMIT_RATIO` (0.8) — each action checks its own threshold
/// rather than sharing one outcome across actions.
fn usage_meets_ratio(rule: &PolicyRule, summary: &ApiUsageSummary, ratio: f64) -> bool {
    used_amount(rule.rule_type, summary) as f64 >= effective_limit(rule) * ratio
}

async fn notify(state: &PolicyState, api_id: Uuid, external_user_id: &str, rule_type: RuleType, notification_type: NotificationType) {
    match state.notify_once(api_id, external_user_id, rule_type, notification_type).await {
        Ok(true) => tracing::info!(%external_user_id, ?rule_type, ?notification_type, "quota notification emitted"),
        Ok(false) => {}
        Err(err) => tracing::warn!(error = ?err, "failed to record quota notification"),
    }
}

/// Usage accounting is fire-and-forget (spec.md §4.9): a write failure here
/// must never surface to the caller who already has their response.
fn record_usage_async(
    state: Arc<PolicyState>,
    api_id: Uuid,
    external_user_id: String,
    endpoint: String,
    was_throttled: bool,
    elapsed_ms: i64,
    response: &Response,
) {
    let tokens_used = estimate_tokens(response);
    let was_blocked = response.status().as_u16() == 429;

    tokio::spawn(async move {
        let usage = ApiUsage {
            id: Uuid::new_v4(),
            api_id,
            external_user_id,
            timestamp: Utc::now(),
            request_count: 1,
            tokens_used,
            credits_consumed: 0,
            execution_time_ms: elapsed_ms,
            endpoint,
            was_throttled,
            was_blocked,
        };
        if let Err(err) = state.record_usage(&usage).await {
            tracing::warn!(error = ?err, "failed to append usage accounting record");
        }
    });
}

/// Rough token estimate from response size (spec.md §4.8: "tokens ≈
/// response_bytes / 4").
fn estimate_tokens(response: &Response) -> i64 {
    response
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .map(|bytes| bytes / 4)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn summary(total_requests: i64, total_tokens: i64) -> ApiUsageSummary {
        ApiUsageSummary {
            api_id: Uuid::new_v4(),
            external_user_id: "user-1".to_string(),
            period_type: crate::models::SummaryPeriod::Daily,
            period_start: Utc::now(),
            period_end: Utc::now(),
            total_requests,
            total_tokens,
            total_credits: 0,
            total_time_ms: 0,
        }
    }

    fn rule(rule_type: RuleType, limit_value: i64, action: Action) -> PolicyRule {
        PolicyRule {
            id: Uuid::new_v4(),
            policy_id: Uuid::new_v4(),
            rule_type,
            limit_value,
            period: None,
            action,
            priority: 0,
        }
    }

    #[test]
    fn under_eighty_percent_does_not_meet_approaching_ratio() {
        let rule = rule(RuleType::Request, 100, Action::Notify);
        let summary = summary(50, 0);
        assert!(!usage_meets_ratio(&rule, &summary, APPROACHING_LIMIT_RATIO));
    }

    #[test]
    fn at_or_above_eighty_percent_meets_approaching_ratio() {
        let rule = rule(RuleType::Request, 100, Action::Notify);
        let summary = summary(80, 0);
        assert!(usage_meets_ratio(&rule, &summary, APPROACHING_LIMIT_RATIO));
    }

    #[test]
    fn at_or_above_eighty_percent_does_not_meet_exceeded_ratio() {
        let rule = rule(RuleType::Request, 100, Action::Block);
        let summary = summary(80, 0);
        assert!(!usage_meets_ratio(&rule, &summary, EXCEEDED_RATIO));
    }

    #[test]
    fn at_or_above_limit_meets_exceeded_ratio() {
        let rule = rule(RuleType::Token, 1000, Action::Block);
        let summary = summary(0, 1000);
        assert!(usage_meets_ratio(&rule, &summary, EXCEEDED_RATIO));
    }

    #[test]
    fn time_rule_limit_is_scaled_from_seconds_to_milliseconds() {
        let rule = rule(RuleType::Time, 10, Action::Block);
        let mut summary = summary(0, 0);
        summary.total_time_ms = 9_999;
        assert!(!usage_meets_ratio(&rule, &summary, EXCEEDED_RATIO));
        summary.total_time_ms = 10_000;
        assert!(usage_meets_ratio(&rule, &summary, EXCEEDED_RATIO));
    }

    #[test]
    fn notify_action_never_reaches_limit_reached_threshold_check() {
        // `notify` only ever checks the approaching ratio (spec.md §4.8 step
        // 4) — it has no "exceeded" branch of its own, unlike block/throttle.
        let rule = rule(RuleType::Request, 100, Action::Notify);
        let summary = summary(150, 0);
        assert!(usage_meets_ratio(&rule, &summary, APPROACHING_LIMIT_RATIO));
    }

    fn summary_with_requests(total_requests: i64) -> ApiUsageSummary {
        summary(total_requests, 0)
    }

    proptest! {
        /// More usage never relaxes a ratio check: once usage meets a given
        /// ratio of the limit, it keeps meeting it as usage grows further.
        #[test]
        fn quota_ratio_check_is_monotonic_in_usage(
            limit in 1i64..100_000,
            ratio in prop_oneof![Just(APPROACHING_LIMIT_RATIO), Just(EXCEEDED_RATIO)],
            used_a in 0i64..200_000,
            used_b in 0i64..200_000,
        ) {
            let rule = rule(RuleType::Request, limit, Action::Block);
            let (lo, hi) = if used_a <= used_b { (used_a, used_b) } else { (used_b, used_a) };

            let met_lo = usage_meets_ratio(&rule, &summary_with_requests(lo), ratio);
            let met_hi = usage_meets_ratio(&rule, &summary_with_requests(hi), ratio);

            prop_assert!(!met_lo || met_hi);
        }
    }
}
