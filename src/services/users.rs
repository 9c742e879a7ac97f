//! Account-facing views and metered activity

use bson::DateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{timestamp, ServiceContext};
use crate::db::{OptionStatus, SampleReport};
use crate::funnel::{onboarding, EngagementDelta};
use crate::policy::{self, UsageDecision};
use crate::store::{Consumption, ProfileUpdate, ReportFilter, Touch};
use crate::subscription;
use crate::types::{AppError, Remaining, Resource, Result, UsageKind};
use crate::validation;

const RECENT_REPORTS: i64 = 3;
const TRENDING_OPTIONS: i64 = 2;
const RECENT_ACTIVITY: usize = 5;
const RECENT_VOTES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ActivityItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    pub timestamp: Option<String>,
}

fn report_activity(report: &SampleReport) -> ActivityItem {
    ActivityItem {
        kind: "test_completed",
        message: format!(
            "New test result: {} ({}/10)",
            report.product_name, report.purity_score
        ),
        timestamp: timestamp(report.metadata.created_at),
    }
}

async fn recent_reports(ctx: &ServiceContext) -> Result<Vec<ActivityItem>> {
    Ok(ctx
        .stores
        .reports
        .list(&ReportFilter::default(), RECENT_REPORTS)
        .await?
        .iter()
        .map(report_activity)
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageLimit {
    pub used: u32,
    pub limit: u32,
    pub remaining: Remaining,
}

impl From<UsageDecision> for UsageLimit {
    fn from(decision: UsageDecision) -> Self {
        Self {
            used: decision.used,
            limit: decision.limit,
            remaining: decision.remaining,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardUser {
    pub email: String,
    pub name: Option<String>,
    pub is_premium: bool,
    pub member_since: Option<String>,
    pub onboarding_step: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub votes_cast: usize,
    pub report_views_remaining: Remaining,
    pub community_members: u64,
    pub tests_influenced: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardLimits {
    pub report_views: UsageLimit,
    pub votes: UsageLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardPrompt {
    pub show: bool,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentVote {
    pub id: String,
    pub product_name: String,
    pub votes: u32,
    pub status: OptionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub user: DashboardUser,
    pub stats: DashboardStats,
    pub limits: DashboardLimits,
    pub recent_votes: Vec<RecentVote>,
    pub recent_activity: Vec<ActivityItem>,
    pub upgrade_prompt: DashboardPrompt,
}

pub async fn dashboard(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<Dashboard> {
    let email = validation::email(email)?;
    let account = ctx.account(&email, now).await?;

    let voted = ctx.stores.voting.voted_by(&email).await?;
    let community_members = ctx.stores.accounts.count().await?;

    let mut recent_activity = recent_reports(ctx).await?;
    let trending = ctx
        .stores
        .voting
        .list(None, Some(TRENDING_OPTIONS))
        .await?;
    recent_activity.extend(trending.into_iter().map(|option| ActivityItem {
        kind: "voting_update",
        message: format!("Trending vote: {} ({} votes)", option.product_name, option.votes),
        timestamp: Some(crate::db::rfc3339(now)),
    }));
    // RFC 3339 in UTC sorts lexically
    recent_activity.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent_activity.truncate(RECENT_ACTIVITY);

    let views = policy::evaluate(&account, UsageKind::ReportView, &ctx.policy, now);
    let votes = policy::evaluate(&account, UsageKind::Vote, &ctx.policy, now);
    let premium = subscription::is_active(&account, now);

    let views_exhausted = !views.allowed;
    let votes_exhausted = !votes.allowed;
    let upgrade_prompt = DashboardPrompt {
        show: !premium && (views_exhausted || votes_exhausted),
        reason: if views_exhausted {
            "free_limit_reached"
        } else {
            "vote_limit_reached"
        },
    };

    let tests_influenced = voted.iter().filter(|o| o.status.influenced_test()).count();
    let votes_cast = voted.len();
    // Newest options first
    let recent_votes = voted
        .into_iter()
        .rev()
        .take(RECENT_VOTES)
        .map(|option| RecentVote {
            id: option.id_hex(),
            product_name: option.product_name,
            votes: option.votes,
            status: option.status,
        })
        .collect();

    Ok(Dashboard {
        user: DashboardUser {
            email: account.email.clone(),
            name: account.name.clone(),
            is_premium: premium,
            member_since: timestamp(account.member_since()),
            onboarding_step: account.onboarding_step,
        },
        stats: DashboardStats {
            votes_cast,
            report_views_remaining: views.remaining,
            community_members,
            tests_influenced,
        },
        limits: DashboardLimits {
            report_views: views.into(),
            votes: votes.into(),
        },
        recent_votes,
        recent_activity,
        upgrade_prompt,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileRequest {
    pub name: Option<String>,
    pub mobile: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileCompleted {
    pub email: String,
    pub name: String,
    pub profile_complete: bool,
    pub onboarding_step: i32,
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn complete_profile(
    ctx: &ServiceContext,
    email: &str,
    req: ProfileRequest,
    now: DateTime,
) -> Result<ProfileCompleted> {
    let email = validation::email(email)?;
    let name = validation::required("name", req.name.as_deref())?;
    let update = ProfileUpdate {
        name: name.clone(),
        mobile: optional(req.mobile),
        location: optional(req.location),
    };
    let has_mobile = update.mobile.is_some();
    let has_location = update.location.is_some();

    ctx.stores
        .accounts
        .update_profile(&email, update, now)
        .await?
        .ok_or(AppError::NotFound(Resource::Account))?;
    let account = ctx
        .stores
        .accounts
        .touch(&email, Touch::at(now).step(onboarding::PROFILE_COMPLETE))
        .await?
        .ok_or(AppError::NotFound(Resource::Account))?;

    let delta = EngagementDelta::bare(&email, "complete_profile")
        .detail("has_mobile", has_mobile)
        .detail("has_location", has_location);
    ctx.record(delta, now).await?;

    info!(email = %email, "Profile completed");
    Ok(ProfileCompleted {
        email,
        name,
        profile_complete: account.profile_complete(),
        onboarding_step: account.onboarding_step,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub email: String,
    pub name: Option<String>,
    pub mobile: Option<String>,
    pub location: Option<String>,
    pub role: String,
    pub member_since: Option<String>,
    pub last_active: Option<String>,
    pub is_premium: bool,
    pub subscription_expires: Option<String>,
    pub trial_used: bool,
    pub onboarding_step: i32,
    pub profile_complete: bool,
    pub first_vote_date: Option<String>,
    pub engagement_score: usize,
}

pub async fn profile(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<Profile> {
    let email = validation::email(email)?;
    let account = ctx.account(&email, now).await?;
    let engagement_score = ctx
        .stores
        .engagement
        .find(&email)
        .await?
        .map_or(0, |record| record.actions.len());

    Ok(Profile {
        is_premium: subscription::is_active(&account, now),
        member_since: timestamp(account.member_since()),
        last_active: timestamp(account.last_active),
        subscription_expires: timestamp(account.subscription_expires),
        first_vote_date: timestamp(account.first_vote_date),
        profile_complete: account.profile_complete(),
        email: account.email,
        name: account.name,
        mobile: account.mobile,
        location: account.location,
        role: account.role,
        trial_used: account.trial_used,
        onboarding_step: account.onboarding_step,
        engagement_score,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityStats {
    pub total_members: u64,
    pub total_votes_cast: u64,
    pub completed_tests: u64,
    pub active_voting_options: u64,
    pub recent_activity: Vec<ActivityItem>,
}

pub async fn community_stats(ctx: &ServiceContext) -> Result<CommunityStats> {
    let totals = ctx.stores.voting.totals().await?;
    Ok(CommunityStats {
        total_members: ctx.stores.accounts.count().await?,
        total_votes_cast: totals.total_votes,
        completed_tests: ctx.stores.reports.count().await?,
        active_voting_options: totals.active_voting_options,
        recent_activity: recent_reports(ctx).await?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageReceipt {
    pub kind: &'static str,
    pub used: u32,
    pub limit: u32,
    pub remaining: Remaining,
    pub is_premium: bool,
    pub show_upgrade_prompt: bool,
    pub level: policy::UsageLevel,
}

/// Consume one metered use of `kind` for an existing account.
///
/// `details` is free-form context from the client (a report id, a forum
/// topic) kept on the engagement action.
pub async fn track_usage(
    ctx: &ServiceContext,
    kind: UsageKind,
    email: &str,
    details: serde_json::Map<String, serde_json::Value>,
    now: DateTime,
) -> Result<UsageReceipt> {
    let email = validation::email(email)?;
    ctx.account(&email, now).await?;

    let account = match ctx.stores.accounts.try_consume(&email, kind, now).await? {
        Consumption::Allowed(account) => account,
        Consumption::Denied(account) => {
            return Err(ctx.limit_hit(&account, kind, details, now).await?);
        }
    };

    let action = match kind {
        UsageKind::ReportView => "view_report",
        UsageKind::Vote => "cast_vote",
        UsageKind::ForumPost => "forum_post",
    };
    ctx.record(EngagementDelta::for_action(&email, action, details), now)
        .await?;

    let decision = policy::evaluate(&account, kind, &ctx.policy, now);
    info!(email = %email, kind = %kind, used = decision.used, "Usage tracked");
    Ok(UsageReceipt {
        kind: kind.key(),
        used: decision.used,
        limit: decision.limit,
        remaining: decision.remaining,
        is_premium: decision.premium,
        show_upgrade_prompt: decision.show_upgrade_prompt(),
        level: decision.level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dashboard_unknown_user() {
        let ctx = ServiceContext::in_memory();
        let err = dashboard(&ctx, "nobody@x.com", DateTime::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(Resource::Account)));
    }

    #[tokio::test]
    async fn test_profile_requires_name() {
        let ctx = ServiceContext::in_memory();
        let err = complete_profile(&ctx, "a@x.com", ProfileRequest::default(), DateTime::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_optional_trims_blank() {
        assert_eq!(optional(Some("  ".into())), None);
        assert_eq!(optional(Some(" Pune ".into())), Some("Pune".into()));
        assert_eq!(optional(None), None);
    }
}
