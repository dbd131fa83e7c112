//! Data model (spec.md §3) for the tables C9/C10 own. Every row carries
//! `created_at`/`updated_at` (ambient, per SPEC_FULL.md §5) and derives
//! `utoipa::ToSchema` as the teacher's `models.rs` does uniformly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "policy_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    Free,
    Rate,
    Token,
    Time,
    Credit,
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "rule_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Token,
    Request,
    Credit,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "rule_period", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "rule_action", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Block,
    Throttle,
    Notify,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct PolicyRule {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub rule_type: RuleType,
    pub limit_value: i64,
    pub period: Option<Period>,
    pub action: Action,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub policy_type: PolicyType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Api {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub policy_id: Option<Uuid>,
    pub deprecation_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ApiUserAccess {
    pub id: Uuid,
    pub api_id: Uuid,
    pub external_user_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DocumentAssociation {
    pub id: Uuid,
    pub document_filename: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ApiUsage {
    pub id: Uuid,
    pub api_id: Uuid,
    pub external_user_id: String,
    pub timestamp: DateTime<Utc>,
    pub request_count: i64,
    pub tokens_used: i64,
    pub credits_consumed: i64,
    pub execution_time_ms: i64,
    pub endpoint: String,
    pub was_throttled: bool,
    pub was_blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "summary_period", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SummaryPeriod {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ApiUsageSummary {
    pub api_id: Uuid,
    pub external_user_id: String,
    pub period_type: SummaryPeriod,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_credits: i64,
    pub total_time_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct PolicyChange {
    pub id: Uuid,
    pub api_id: Uuid,
    pub old_policy_id: Option<Uuid>,
    pub new_policy_id: Option<Uuid>,
    pub changed_at: DateTime<Utc>,
    pub changed_by: String,
    pub effective_date: DateTime<Utc>,
    pub reason: Option<String>,
    pub applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "notification_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ApproachingLimit,
    LimitReached,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuotaNotification {
    pub id: Uuid,
    pub api_id: Uuid,
    pub external_user_id: String,
    pub rule_type: RuleType,
    pub notification_type: NotificationType,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}
