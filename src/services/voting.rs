//! Community voting on products to test next

use bson::DateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::ServiceContext;
use crate::db::{OptionStatus, UserAccount, VotingOption};
use crate::funnel::{onboarding, EngagementDelta, FunnelStage};
use crate::logging::{ConversionEvent, EventType};
use crate::policy;
use crate::store::{Consumption, Touch};
use crate::subscription;
use crate::types::{round1, AlreadyDone, AppError, Remaining, Resource, Result, UsageKind};
use crate::validation;

const LIST_LIMIT: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub id: String,
    pub product_name: String,
    pub category: String,
    pub description: String,
    pub votes: u32,
    pub funding_raised: f64,
    pub funding_target: f64,
    pub funding_percentage: f64,
    pub estimated_test_date: Option<String>,
    pub status: OptionStatus,
}

impl From<VotingOption> for OptionView {
    fn from(option: VotingOption) -> Self {
        Self {
            id: option.id_hex(),
            funding_percentage: option.funding_percentage(),
            product_name: option.product_name,
            category: option.category,
            description: option.description,
            votes: option.votes,
            funding_raised: option.funding_raised,
            funding_target: option.funding_target,
            estimated_test_date: option.estimated_test_date,
            status: option.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionList {
    pub voting_options: Vec<OptionView>,
    pub total: usize,
}

/// Options with the given status (default `voting`), most voted first
pub async fn list_options(ctx: &ServiceContext, status: Option<OptionStatus>) -> Result<OptionList> {
    let status = status.unwrap_or_default();
    let voting_options: Vec<OptionView> = ctx
        .stores
        .voting
        .list(Some(status), Some(LIST_LIMIT))
        .await?
        .into_iter()
        .map(OptionView::from)
        .collect();

    Ok(OptionList {
        total: voting_options.len(),
        voting_options,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CastVoteRequest {
    pub email: Option<String>,
    pub voting_option_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteReceipt {
    pub user_id: String,
    pub email: String,
    pub product_voted: String,
    pub total_votes: u32,
    pub is_new_user: bool,
    pub votes_remaining: Remaining,
}

/// Cast one vote, creating the account on first contact.
///
/// Order: duplicate check, vote quota, then the conditional voter insert.
/// A voter insert that loses a race reports `already_voted` and refunds
/// the free quota unit it consumed.
pub async fn cast_vote(ctx: &ServiceContext, req: CastVoteRequest, now: DateTime) -> Result<VoteReceipt> {
    let email = validation::email(req.email.as_deref().unwrap_or_default())?;
    let raw_id = validation::required("voting_option_id", req.voting_option_id.as_deref())?;
    let option_id = validation::object_id("voting_option_id", &raw_id)?;

    let option = ctx
        .stores
        .voting
        .find(option_id)
        .await?
        .ok_or(AppError::NotFound(Resource::VotingOption))?;
    if option.voters.contains(&email) {
        return Err(AppError::AlreadyDone(AlreadyDone::AlreadyVoted));
    }

    let fresh = UserAccount::new(&email, &ctx.policy, now).with_onboarding_step(onboarding::VOTED);
    let (_, created) = ctx.stores.accounts.create_if_absent(fresh).await?;
    ctx.account(&email, now).await?;

    let account = match ctx.stores.accounts.try_consume(&email, UsageKind::Vote, now).await? {
        Consumption::Allowed(account) => account,
        Consumption::Denied(account) => {
            let mut details = serde_json::Map::new();
            details.insert("voting_option_id".into(), raw_id.clone().into());
            return Err(ctx.limit_hit(&account, UsageKind::Vote, details, now).await?);
        }
    };

    let Some(option) = ctx.stores.voting.add_voter(option_id, &email).await? else {
        warn!(email = %email, option = %raw_id, "Vote lost a concurrent duplicate race");
        // Premium use was never counted, so only a free unit goes back
        if !subscription::is_active(&account, now) {
            ctx.stores.accounts.refund(&email, UsageKind::Vote).await?;
        }
        return Err(AppError::AlreadyDone(AlreadyDone::AlreadyVoted));
    };

    let account = ctx
        .stores
        .accounts
        .touch(&email, Touch::at(now).step(onboarding::VOTED).voted())
        .await?
        .unwrap_or(account);

    let delta = EngagementDelta::bare(&email, FunnelStage::CastFirstVote.action())
        .detail("voting_option_id", raw_id.as_str())
        .detail("product_name", option.product_name.as_str());
    ctx.record(delta, now).await?;

    if created {
        ctx.events.log_signup(&email, "cast_vote", now).await;
    }
    ctx.events
        .log(
            ConversionEvent::new(EventType::VoteCast, &email, now).with_detail(serde_json::json!({
                "voting_option_id": raw_id,
                "product_name": option.product_name,
            })),
        )
        .await;

    let decision = policy::evaluate(&account, UsageKind::Vote, &ctx.policy, now);
    info!(
        email = %email,
        product = %option.product_name,
        votes = option.votes,
        new_user = created,
        "Vote cast"
    );

    Ok(VoteReceipt {
        user_id: account._id.map(|id| id.to_hex()).unwrap_or_default(),
        email,
        product_voted: option.product_name,
        total_votes: option.votes,
        is_new_user: created,
        votes_remaining: decision.remaining,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteHistoryEntry {
    pub id: String,
    pub product_name: String,
    pub category: String,
    pub current_votes: u32,
    pub funding_progress: f64,
    pub status: OptionStatus,
    pub estimated_test_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoterStats {
    pub total_votes_cast: usize,
    pub votes_remaining: Remaining,
    pub is_premium: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteHistory {
    pub votes_history: Vec<VoteHistoryEntry>,
    pub user_stats: VoterStats,
}

/// Options an email has voted for. Unknown emails get an empty history.
pub async fn user_votes(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<VoteHistory> {
    let email = validation::email(email)?;
    let votes_history: Vec<VoteHistoryEntry> = ctx
        .stores
        .voting
        .voted_by(&email)
        .await?
        .into_iter()
        .map(|option| VoteHistoryEntry {
            id: option.id_hex(),
            funding_progress: option.funding_percentage(),
            product_name: option.product_name,
            category: option.category,
            current_votes: option.votes,
            status: option.status,
            estimated_test_date: option.estimated_test_date,
        })
        .collect();

    let (votes_remaining, is_premium) = match ctx.stores.accounts.expire_if_due(&email, now).await? {
        Some(account) => {
            let decision = policy::evaluate(&account, UsageKind::Vote, &ctx.policy, now);
            (decision.remaining, subscription::is_active(&account, now))
        }
        None => (Remaining::Count(ctx.policy.limits.votes), false),
    };

    Ok(VoteHistory {
        user_stats: VoterStats {
            total_votes_cast: votes_history.len(),
            votes_remaining,
            is_premium,
        },
        votes_history,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct VotingStats {
    pub total_votes: u64,
    pub total_funding_raised: f64,
    pub active_voting_options: u64,
    pub unique_voters: u64,
    pub average_votes_per_option: f64,
}

pub async fn stats(ctx: &ServiceContext) -> Result<VotingStats> {
    let totals = ctx.stores.voting.totals().await?;
    let average_votes_per_option = if totals.active_voting_options == 0 {
        0.0
    } else {
        round1(totals.total_votes as f64 / totals.active_voting_options as f64)
    };

    Ok(VotingStats {
        total_votes: totals.total_votes,
        total_funding_raised: totals.total_funding_raised,
        active_voting_options: totals.active_voting_options,
        unique_voters: totals.unique_voters,
        average_votes_per_option,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuickSignupRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickSignup {
    pub user_id: String,
    pub email: String,
    pub is_existing_user: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes_available: Option<u32>,
}

/// Email-only signup ahead of a first vote
pub async fn quick_signup(ctx: &ServiceContext, req: QuickSignupRequest, now: DateTime) -> Result<QuickSignup> {
    let email = validation::email(req.email.as_deref().unwrap_or_default())?;

    let fresh = UserAccount::new(&email, &ctx.policy, now).with_onboarding_step(onboarding::SIGNED_UP);
    let (account, created) = ctx.stores.accounts.create_if_absent(fresh).await?;
    let user_id = account._id.map(|id| id.to_hex()).unwrap_or_default();

    if !created {
        return Ok(QuickSignup {
            user_id,
            email,
            is_existing_user: true,
            votes_available: None,
        });
    }

    let delta = EngagementDelta::bare(&email, "quick_signup")
        .raising(FunnelStage::UnderstoodProcess)
        .detail("purpose", "voting");
    ctx.record(delta, now).await?;
    ctx.events.log_signup(&email, "quick_signup", now).await;

    info!(email = %email, "Quick signup");
    Ok(QuickSignup {
        user_id,
        email,
        is_existing_user: false,
        votes_available: Some(account.votes_limit),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cast_vote_requires_option_id() {
        let ctx = ServiceContext::in_memory();
        let req = CastVoteRequest {
            email: Some("a@x.com".into()),
            voting_option_id: None,
        };
        let err = cast_vote(&ctx, req, DateTime::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_option_is_not_found() {
        let ctx = ServiceContext::in_memory();
        let req = CastVoteRequest {
            email: Some("a@x.com".into()),
            voting_option_id: Some(bson::oid::ObjectId::new().to_hex()),
        };
        let err = cast_vote(&ctx, req, DateTime::now()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(Resource::VotingOption)));
        assert!(ctx.stores.accounts.find("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quick_signup_twice() {
        let ctx = ServiceContext::in_memory();
        let now = DateTime::now();
        let req = QuickSignupRequest {
            email: Some("new@x.com".into()),
        };

        let first = quick_signup(&ctx, req.clone(), now).await.unwrap();
        assert!(!first.is_existing_user);
        assert_eq!(first.votes_available, Some(5));

        let second = quick_signup(&ctx, req, now).await.unwrap();
        assert!(second.is_existing_user);
        assert_eq!(second.user_id, first.user_id);
    }
}
