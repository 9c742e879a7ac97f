//! Subscription lifecycle
//!
//! ```text
//! FREE -> TRIAL -> EXPIRED_TRIAL -> FREE
//! FREE -> PAID  -> EXPIRED_PAID  -> FREE
//! ```
//!
//! Trial and paid periods are both `is_premium` plus an expiry. Expiry is
//! lazy: [`check_expiry`] runs on every read of subscription state, there is
//! no background sweep. Upgrade prompts and the tier catalog live here too
//! since both derive from the same account state.

use bson::DateTime;
use serde::Serialize;

use crate::config::PolicyConfig;
use crate::db::{SubscriptionKind, UserAccount};
use crate::policy::{self, UsageLevel};
use crate::types::{AlreadyDone, AppError, Result, UsageKind};

pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Where an account sits in the lifecycle at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Free,
    Trial,
    Paid,
    /// Premium flag still set but past expiry, awaiting [`check_expiry`]
    ExpiredTrial,
    ExpiredPaid,
}

pub fn add_days(now: DateTime, days: i64) -> DateTime {
    DateTime::from_millis(now.timestamp_millis().saturating_add(days.saturating_mul(MILLIS_PER_DAY)))
}

/// Premium and not past expiry
pub fn is_active(account: &UserAccount, now: DateTime) -> bool {
    account.is_premium && account.subscription_expires.map_or(true, |expires| expires >= now)
}

pub fn state(account: &UserAccount, now: DateTime) -> SubscriptionState {
    if !account.is_premium {
        return SubscriptionState::Free;
    }
    let trial = account.subscription_kind == Some(SubscriptionKind::Trial);
    match (is_active(account, now), trial) {
        (true, true) => SubscriptionState::Trial,
        (true, false) => SubscriptionState::Paid,
        (false, true) => SubscriptionState::ExpiredTrial,
        (false, false) => SubscriptionState::ExpiredPaid,
    }
}

/// Start the one-time trial.
///
/// A used trial is refused even while the account is premium.
/// Returns the trial's expiry.
pub fn start_trial(account: &mut UserAccount, now: DateTime, trial_days: i64) -> Result<DateTime> {
    if account.trial_used {
        return Err(AppError::AlreadyDone(AlreadyDone::TrialAlreadyUsed));
    }
    if account.is_premium {
        return Err(AppError::AlreadyDone(AlreadyDone::AlreadyPremium));
    }

    let expires = add_days(now, trial_days);
    account.is_premium = true;
    account.subscription_expires = Some(expires);
    account.subscription_kind = Some(SubscriptionKind::Trial);
    account.trial_used = true;
    account.reset_usage();
    account.last_active = Some(now);
    Ok(expires)
}

/// Grant a paid period unconditionally. Leaves `trial_used` alone.
pub fn activate_paid(account: &mut UserAccount, now: DateTime, duration_days: i64) -> DateTime {
    let expires = add_days(now, duration_days);
    account.is_premium = true;
    account.subscription_expires = Some(expires);
    account.subscription_kind = Some(SubscriptionKind::Paid);
    account.reset_usage();
    account.last_active = Some(now);
    expires
}

/// Drop premium once the expiry has passed. Returns whether anything changed.
///
/// Running it again on an expired account is a no-op.
pub fn check_expiry(account: &mut UserAccount, now: DateTime) -> bool {
    match account.subscription_expires {
        Some(expires) if account.is_premium && expires < now => {
            account.is_premium = false;
            account.subscription_expires = None;
            account.subscription_kind = None;
            true
        }
        _ => false,
    }
}

/// Whole days left in the current premium period, never negative
pub fn days_remaining(account: &UserAccount, now: DateTime) -> i64 {
    match account.subscription_expires {
        Some(expires) if is_active(account, now) => {
            let millis = expires.timestamp_millis() - now.timestamp_millis();
            (millis / MILLIS_PER_DAY).max(0)
        }
        _ => 0,
    }
}

pub fn trial_available(account: &UserAccount) -> bool {
    !account.trial_used && !account.is_premium
}

/// Free account in the warning band (or beyond) for report views or votes
pub fn upgrade_recommended(account: &UserAccount, policy: &PolicyConfig, now: DateTime) -> bool {
    if is_active(account, now) {
        return false;
    }
    [UsageKind::ReportView, UsageKind::Vote].into_iter().any(|kind| {
        policy::classify(account.used(kind), account.limit(kind), policy.warning_ratio)
            != UsageLevel::Ok
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    LimitReached,
    LimitWarning,
    VotingLimit,
    EngagementReward,
    TrialOffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradePrompt {
    #[serde(rename = "type")]
    pub kind: PromptKind,
    pub title: String,
    pub message: String,
    pub cta: String,
    pub urgency: Urgency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<u32>,
}

impl UpgradePrompt {
    fn new(kind: PromptKind, title: &str, message: String, cta: &str, urgency: Urgency) -> Self {
        Self {
            kind,
            title: title.to_string(),
            message,
            cta: cta.to_string(),
            urgency,
            discount: None,
        }
    }
}

/// Ranked upgrade prompts for an account.
///
/// Order is fixed: limit reached, limit warning, voting limit, engagement
/// reward, trial offer. Active premium accounts get none.
pub fn upgrade_prompts(
    account: &UserAccount,
    recorded_actions: usize,
    policy: &PolicyConfig,
    now: DateTime,
) -> Vec<UpgradePrompt> {
    if is_active(account, now) {
        return Vec::new();
    }

    let mut prompts = Vec::new();

    let views_used = account.used(UsageKind::ReportView);
    let views_limit = account.limit(UsageKind::ReportView);
    match policy::classify(views_used, views_limit, policy.warning_ratio) {
        UsageLevel::Exhausted => prompts.push(UpgradePrompt::new(
            PromptKind::LimitReached,
            "Unlock Unlimited Report Access",
            "You've used all your free report views. Upgrade to see detailed lab results for all products.".to_string(),
            &format!("Start {}-Day Free Trial", policy.trial_days),
            Urgency::High,
        )),
        UsageLevel::Warning => prompts.push(UpgradePrompt::new(
            PromptKind::LimitWarning,
            "Almost Out of Free Views",
            format!(
                "You have {} report views left. Upgrade for unlimited access.",
                views_limit.saturating_sub(views_used)
            ),
            "Upgrade Now",
            Urgency::Medium,
        )),
        UsageLevel::Ok => {}
    }

    if account.used(UsageKind::Vote) >= account.limit(UsageKind::Vote) {
        prompts.push(UpgradePrompt::new(
            PromptKind::VotingLimit,
            "Vote for More Products",
            "You've reached your voting limit. Premium members get unlimited votes and priority influence.".to_string(),
            "Upgrade to Premium",
            Urgency::Medium,
        ));
    }

    if recorded_actions >= policy.engagement_reward_actions {
        let mut prompt = UpgradePrompt::new(
            PromptKind::EngagementReward,
            "You're an Active Member!",
            format!(
                "As a valued community member, get {}% off your first month of Premium.",
                policy.engagement_discount_percent
            ),
            "Claim Discount",
            Urgency::Low,
        );
        prompt.discount = Some(policy.engagement_discount_percent);
        prompts.push(prompt);
    }

    if !account.trial_used {
        prompts.push(UpgradePrompt::new(
            PromptKind::TrialOffer,
            &format!("Try Premium Free for {} Days", policy.trial_days),
            "Experience unlimited access to all features. Cancel anytime.".to_string(),
            "Start Free Trial",
            Urgency::Low,
        ));
    }

    prompts
}

/// Tier identifiers that can be purchased
pub const TIER_PREMIUM: &str = "premium";
pub const TIER_PREMIUM_ANNUAL: &str = "premium_annual";
pub const CURRENCY: &str = "INR";

/// Price and duration of a purchasable tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaidPlan {
    pub tier_id: &'static str,
    pub amount: u32,
    pub duration_days: i64,
}

pub fn paid_plan(tier_id: &str, policy: &PolicyConfig) -> Result<PaidPlan> {
    match tier_id {
        TIER_PREMIUM => Ok(PaidPlan {
            tier_id: TIER_PREMIUM,
            amount: 99,
            duration_days: policy.paid_days,
        }),
        TIER_PREMIUM_ANNUAL => Ok(PaidPlan {
            tier_id: TIER_PREMIUM_ANNUAL,
            amount: 999,
            duration_days: policy.annual_days,
        }),
        other => Err(AppError::Validation(format!("Invalid tier: {}", other))),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TierLimits {
    pub report_views: u32,
    pub votes: u32,
    pub forum_posts: u32,
}

/// Catalog entry shown on the pricing page
#[derive(Debug, Clone, Serialize)]
pub struct Tier {
    pub id: &'static str,
    pub name: &'static str,
    pub price: u32,
    pub duration_days: i64,
    pub features: Vec<String>,
    pub is_trial: bool,
    pub popular: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limitations: Option<TierLimits>,
}

pub fn tiers(policy: &PolicyConfig) -> Vec<Tier> {
    let limits = policy.limits;
    vec![
        Tier {
            id: "free",
            name: "Free",
            price: 0,
            duration_days: policy.paid_days,
            features: vec![
                format!("{} test report views per month", limits.report_views),
                format!("{} votes per month", limits.votes),
                format!("{} forum post per month", limits.forum_posts),
                "Basic community access".to_string(),
            ],
            is_trial: false,
            popular: false,
            trial_available: None,
            trial_days: None,
            limitations: Some(TierLimits {
                report_views: limits.report_views,
                votes: limits.votes,
                forum_posts: limits.forum_posts,
            }),
        },
        Tier {
            id: TIER_PREMIUM,
            name: "Premium",
            price: 99,
            duration_days: policy.paid_days,
            features: [
                "Unlimited test report access",
                "Detailed lab parameters",
                "Unlimited voting",
                "Priority voting on new tests",
                "Unlimited forum participation",
                "Expert Q&A sessions",
                "Early access to new features",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            is_trial: false,
            popular: true,
            trial_available: Some(true),
            trial_days: Some(policy.trial_days),
            limitations: None,
        },
        Tier {
            id: "premium_trial",
            name: "Premium Trial",
            price: 0,
            duration_days: policy.trial_days,
            features: vec![
                "All Premium features".to_string(),
                format!("{}-day free trial", policy.trial_days),
                "Cancel anytime".to_string(),
            ],
            is_trial: true,
            popular: false,
            trial_available: None,
            trial_days: None,
            limitations: None,
        },
    ]
}

/// Features listed after a successful upgrade
pub fn features_unlocked(paid: bool) -> Vec<&'static str> {
    let mut features = vec![
        "Unlimited report access",
        "Detailed lab parameters",
        "Unlimited voting",
        "Priority voting",
    ];
    if paid {
        features.push("Expert Q&A sessions");
    }
    features
}
