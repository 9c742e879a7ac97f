//! Trials, paid upgrades and subscription status

use bson::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{timestamp, ServiceContext};
use crate::db::{Metadata, OrderStatus, PendingOrder};
use crate::funnel::{EngagementDelta, FunnelStage};
use crate::logging::{ConversionEvent, EventType};
use crate::policy;
use crate::store::Grant;
use crate::subscription::{self, SubscriptionState, Tier, UpgradePrompt, CURRENCY};
use crate::types::{AlreadyDone, AppError, Remaining, Resource, Result, UsageKind};
use crate::validation;

#[derive(Debug, Clone, Serialize)]
pub struct TierCatalog {
    pub tiers: Vec<Tier>,
}

pub fn tiers(ctx: &ServiceContext) -> TierCatalog {
    TierCatalog {
        tiers: subscription::tiers(&ctx.policy),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmailRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialStarted {
    pub email: String,
    pub trial_end: String,
    pub days_remaining: i64,
    pub features_unlocked: Vec<&'static str>,
}

/// Start the one-time free trial.
///
/// The grant is conditional on the trial still being unused, so two
/// concurrent requests cannot both succeed.
pub async fn start_trial(ctx: &ServiceContext, req: EmailRequest, now: DateTime) -> Result<TrialStarted> {
    let email = validation::email(req.email.as_deref().unwrap_or_default())?;
    let mut account = ctx.account(&email, now).await?;

    let expires = subscription::start_trial(&mut account, now, ctx.policy.trial_days)?;
    let Some(account) = ctx
        .stores
        .accounts
        .grant_subscription(&email, Grant::trial(expires, now))
        .await?
    else {
        warn!(email = %email, "Trial grant lost a concurrent race");
        return Err(AppError::AlreadyDone(AlreadyDone::TrialAlreadyUsed));
    };

    let trial_end = crate::db::rfc3339(expires);
    let delta = EngagementDelta::bare(&email, FunnelStage::StartedTrial.action())
        .detail("trial_end", trial_end.as_str());
    ctx.record(delta, now).await?;
    ctx.events
        .log(ConversionEvent::new(EventType::TrialStarted, &email, now)
            .with_detail(serde_json::json!({ "trial_end": trial_end })))
        .await;

    info!(email = %email, trial_end = %trial_end, "Trial started");
    Ok(TrialStarted {
        days_remaining: subscription::days_remaining(&account, now),
        features_unlocked: subscription::features_unlocked(false),
        trial_end,
        email,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageStat {
    pub used: u32,
    /// A count for free accounts, `"unlimited"` while premium
    pub limit: Remaining,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    pub email: String,
    pub is_premium: bool,
    pub state: SubscriptionState,
    pub subscription_expires: Option<String>,
    pub days_remaining: i64,
    pub trial_used: bool,
    pub trial_available: bool,
    pub usage_stats: BTreeMap<&'static str, UsageStat>,
    pub upgrade_recommended: bool,
}

pub async fn status(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<SubscriptionStatus> {
    let email = validation::email(email)?;
    let account = ctx.account(&email, now).await?;
    let premium = subscription::is_active(&account, now);

    let usage_stats = UsageKind::ALL
        .into_iter()
        .map(|kind| {
            let limit = if premium {
                Remaining::Unlimited
            } else {
                Remaining::Count(account.limit(kind))
            };
            (
                kind.key(),
                UsageStat {
                    used: account.used(kind),
                    limit,
                },
            )
        })
        .collect();

    Ok(SubscriptionStatus {
        is_premium: premium,
        state: subscription::state(&account, now),
        subscription_expires: timestamp(account.subscription_expires),
        days_remaining: subscription::days_remaining(&account, now),
        trial_used: account.trial_used,
        trial_available: subscription::trial_available(&account),
        upgrade_recommended: subscription::upgrade_recommended(&account, &ctx.policy, now),
        usage_stats,
        email,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateOrderRequest {
    pub email: Option<String>,
    pub tier_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderCreated {
    pub order_id: String,
    pub amount: u32,
    pub currency: &'static str,
    pub tier_id: &'static str,
    pub duration_days: i64,
}

fn order_id(email: &str, now: DateTime) -> String {
    let stamp = now.to_chrono().format("%Y%m%d_%H%M%S");
    let local = email.split('@').next().unwrap_or_default();
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("order_{}_{}_{}", stamp, local, &nonce[..8])
}

/// Open a pending order for a paid tier
pub async fn create_payment_order(
    ctx: &ServiceContext,
    req: CreateOrderRequest,
    now: DateTime,
) -> Result<OrderCreated> {
    let (email, tier_id) = match (req.email.as_deref(), req.tier_id.as_deref()) {
        (Some(e), Some(t)) if !e.trim().is_empty() && !t.trim().is_empty() => {
            (validation::email(e)?, t.trim().to_string())
        }
        _ => return Err(AppError::Validation("Email and tier_id are required".into())),
    };
    let plan = subscription::paid_plan(&tier_id, &ctx.policy)?;
    ctx.account(&email, now).await?;

    let order = PendingOrder {
        _id: None,
        metadata: Metadata::at(now),
        order_id: order_id(&email, now),
        email: email.clone(),
        tier_id: plan.tier_id.to_string(),
        amount: plan.amount,
        currency: CURRENCY.to_string(),
        duration_days: plan.duration_days,
        status: OrderStatus::Pending,
        payment_id: None,
        completed_at: None,
    };
    let order_id = order.order_id.clone();
    ctx.stores.orders.insert(order).await?;

    info!(email = %email, order_id = %order_id, tier = plan.tier_id, "Payment order created");
    Ok(OrderCreated {
        order_id,
        amount: plan.amount,
        currency: CURRENCY,
        tier_id: plan.tier_id,
        duration_days: plan.duration_days,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyPaymentRequest {
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentVerified {
    pub email: String,
    pub tier_id: String,
    pub subscription_expires: String,
    pub days_remaining: i64,
    pub features_unlocked: Vec<&'static str>,
}

/// Complete a pending order and grant the paid period.
///
/// Signature verification belongs to the payment provider integration; a
/// non-empty signature is accepted as-is.
pub async fn verify_payment(
    ctx: &ServiceContext,
    req: VerifyPaymentRequest,
    now: DateTime,
) -> Result<PaymentVerified> {
    let fields = [&req.order_id, &req.payment_id, &req.signature];
    if fields.iter().any(|f| f.as_deref().map_or(true, |v| v.trim().is_empty())) {
        return Err(AppError::Validation("Missing payment verification data".into()));
    }
    let order_id = req.order_id.as_deref().unwrap_or_default().trim();
    let payment_id = req.payment_id.as_deref().unwrap_or_default().trim();

    let order = ctx
        .stores
        .orders
        .find(order_id)
        .await?
        .ok_or(AppError::NotFound(Resource::Order))?;
    if order.status == OrderStatus::Completed {
        return Err(AppError::AlreadyDone(AlreadyDone::OrderAlreadyCompleted));
    }
    let mut account = ctx.account(&order.email, now).await?;

    let Some(order) = ctx.stores.orders.complete(order_id, payment_id, now).await? else {
        return Err(AppError::AlreadyDone(AlreadyDone::OrderAlreadyCompleted));
    };

    let expires = subscription::activate_paid(&mut account, now, order.duration_days);
    let account = ctx
        .stores
        .accounts
        .grant_subscription(&order.email, Grant::paid(expires, now))
        .await?
        .ok_or(AppError::NotFound(Resource::Account))?;

    let delta = EngagementDelta::bare(&order.email, FunnelStage::ConvertedToPaid.action())
        .detail("tier_id", order.tier_id.as_str())
        .detail("amount", order.amount)
        .detail("payment_id", payment_id);
    ctx.record(delta, now).await?;
    ctx.events
        .log(
            ConversionEvent::new(EventType::PaymentCompleted, &order.email, now).with_detail(
                serde_json::json!({
                    "order_id": order.order_id,
                    "tier_id": order.tier_id,
                    "amount": order.amount,
                }),
            ),
        )
        .await;

    info!(email = %order.email, order_id = %order.order_id, "Payment verified");
    Ok(PaymentVerified {
        days_remaining: subscription::days_remaining(&account, now),
        subscription_expires: crate::db::rfc3339(expires),
        features_unlocked: subscription::features_unlocked(true),
        email: order.email,
        tier_id: order.tier_id,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptUserStats {
    pub report_views_used: u32,
    pub report_views_limit: u32,
    pub votes_cast: u32,
    pub votes_limit: u32,
    pub trial_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradePrompts {
    pub is_premium: bool,
    pub prompts: Vec<UpgradePrompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_stats: Option<PromptUserStats>,
}

pub async fn upgrade_prompts(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<UpgradePrompts> {
    let email = validation::email(email)?;
    let account = ctx.account(&email, now).await?;

    if subscription::is_active(&account, now) {
        return Ok(UpgradePrompts {
            is_premium: true,
            prompts: Vec::new(),
            user_stats: None,
        });
    }

    let recorded_actions = ctx
        .stores
        .engagement
        .find(&email)
        .await?
        .map_or(0, |record| record.actions.len());
    let views = policy::evaluate(&account, UsageKind::ReportView, &ctx.policy, now);
    let votes = policy::evaluate(&account, UsageKind::Vote, &ctx.policy, now);

    Ok(UpgradePrompts {
        is_premium: false,
        prompts: subscription::upgrade_prompts(&account, recorded_actions, &ctx.policy, now),
        user_stats: Some(PromptUserStats {
            report_views_used: views.used,
            report_views_limit: views.limit,
            votes_cast: votes.used,
            votes_limit: votes.limit,
            trial_available: subscription::trial_available(&account),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_shape() {
        let now = DateTime::builder()
            .year(2024)
            .month(3)
            .day(1)
            .hour(9)
            .minute(5)
            .second(7)
            .build()
            .unwrap();
        let id = order_id("priya@example.com", now);
        assert!(id.starts_with("order_20240301_090507_priya_"));
        assert_eq!(id.len(), "order_20240301_090507_priya_".len() + 8);
        assert_ne!(order_id("priya@example.com", now), id);
    }

    #[tokio::test]
    async fn test_unknown_tier_rejected() {
        let ctx = ServiceContext::in_memory();
        let req = CreateOrderRequest {
            email: Some("a@x.com".into()),
            tier_id: Some("gold".into()),
        };
        let err = create_payment_order(&ctx, req, DateTime::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_verify_requires_all_fields() {
        let ctx = ServiceContext::in_memory();
        let req = VerifyPaymentRequest {
            order_id: Some("order_1".into()),
            payment_id: Some("pay_1".into()),
            signature: None,
        };
        let err = verify_payment(&ctx, req, DateTime::now()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
