//! Onboarding funnel tracking

use bson::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::{timestamp, ServiceContext};
use crate::db::UserAccount;
use crate::funnel::{self, onboarding, ConversionRates, EngagementDelta, FunnelStage, JourneyProgress};
use crate::logging::{ConversionEvent, EventType};
use crate::store::Touch;
use crate::types::{AppError, Resource, Result};
use crate::validation;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackActionRequest {
    pub email: Option<String>,
    pub action: Option<String>,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedAction {
    pub action: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<FunnelStage>,
}

/// Record a client-reported action against the funnel
pub async fn track_action(
    ctx: &ServiceContext,
    req: TrackActionRequest,
    now: DateTime,
) -> Result<TrackedAction> {
    let (email, action) = match (req.email.as_deref(), req.action.as_deref()) {
        (Some(e), Some(a)) if !e.trim().is_empty() && !a.trim().is_empty() => {
            (validation::email(e)?, a.trim().to_string())
        }
        _ => return Err(AppError::Validation("Email and action are required".into())),
    };

    let delta = EngagementDelta::for_action(&email, &action, req.details);
    let stage = delta.stage;
    ctx.record(delta, now).await?;

    info!(email = %email, action = %action, "Tracked action");
    Ok(TrackedAction {
        action,
        email,
        stage,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct FunnelStats {
    pub total_users: u64,
    pub conversion_rates: ConversionRates,
    pub absolute_numbers: BTreeMap<&'static str, u64>,
}

pub async fn funnel_stats(ctx: &ServiceContext) -> Result<FunnelStats> {
    let counts = ctx.stores.engagement.funnel_counts().await?;
    let absolute_numbers = FunnelStage::ALL
        .into_iter()
        .map(|stage| (stage.field(), counts.at(stage)))
        .collect();

    Ok(FunnelStats {
        total_users: counts.total_users,
        conversion_rates: counts.conversion_rates(),
        absolute_numbers,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct UserJourney {
    pub email: String,
    #[serde(flatten)]
    pub progress: JourneyProgress,
    pub page_views: BTreeMap<String, u32>,
    pub total_actions: usize,
    pub created_at: Option<String>,
    pub last_activity: Option<String>,
}

pub async fn user_journey(ctx: &ServiceContext, email: &str) -> Result<UserJourney> {
    let email = validation::email(email)?;
    let record = ctx
        .stores
        .engagement
        .find(&email)
        .await?
        .ok_or(AppError::NotFound(Resource::Journey))?;

    Ok(UserJourney {
        progress: funnel::journey(record.flags()),
        total_actions: record.actions.len(),
        created_at: timestamp(record.metadata.created_at),
        last_activity: timestamp(record.last_activity()),
        page_views: record.page_views,
        email,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteOnboardingRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OnboardingCompleted {
    pub email: String,
    pub onboarding_step: i32,
    pub is_new_user: bool,
}

/// Mark onboarding finished, creating the account when needed
pub async fn complete_onboarding(
    ctx: &ServiceContext,
    req: CompleteOnboardingRequest,
    now: DateTime,
) -> Result<OnboardingCompleted> {
    let email = validation::email(req.email.as_deref().unwrap_or_default())?;

    let fresh = UserAccount::new(&email, &ctx.policy, now).with_onboarding_step(onboarding::COMPLETED);
    let (_, created) = ctx.stores.accounts.create_if_absent(fresh).await?;
    let account = ctx
        .stores
        .accounts
        .touch(&email, Touch::at(now).step(onboarding::COMPLETED))
        .await?
        .ok_or(AppError::NotFound(Resource::Account))?;

    ctx.record(EngagementDelta::bare(&email, "complete_onboarding"), now)
        .await?;

    if created {
        ctx.events.log_signup(&email, "complete_onboarding", now).await;
    }
    ctx.events
        .log(ConversionEvent::new(EventType::OnboardingCompleted, &email, now))
        .await;

    info!(email = %email, "Onboarding completed");
    Ok(OnboardingCompleted {
        email,
        onboarding_step: account.onboarding_step,
        is_new_user: created,
    })
}
