//! Onboarding routes

use bson::DateTime;
use hyper::Method;

use super::{ApiRequest, Reply};
use crate::services::{onboarding, ServiceContext};
use crate::types::Result;

pub async fn route(
    ctx: &ServiceContext,
    req: &ApiRequest,
    path: &[&str],
    now: DateTime,
) -> Option<Result<Reply>> {
    let result = match (&req.method, path) {
        (&Method::POST, ["track-action"]) => track_action(ctx, req, now).await,
        (&Method::GET, ["funnel-stats"]) => funnel_stats(ctx).await,
        (&Method::GET, ["user-journey", email]) => user_journey(ctx, email).await,
        (&Method::POST, ["complete-onboarding"]) => complete_onboarding(ctx, req, now).await,
        _ => return None,
    };
    Some(result)
}

async fn track_action(ctx: &ServiceContext, req: &ApiRequest, now: DateTime) -> Result<Reply> {
    let tracked = onboarding::track_action(ctx, req.json()?, now).await?;
    Reply::new("Action tracked successfully", tracked)
}

async fn funnel_stats(ctx: &ServiceContext) -> Result<Reply> {
    Reply::new("Funnel statistics retrieved", onboarding::funnel_stats(ctx).await?)
}

async fn user_journey(ctx: &ServiceContext, email: &str) -> Result<Reply> {
    Reply::new("User journey retrieved", onboarding::user_journey(ctx, email).await?)
}

async fn complete_onboarding(ctx: &ServiceContext, req: &ApiRequest, now: DateTime) -> Result<Reply> {
    let completed = onboarding::complete_onboarding(ctx, req.json()?, now).await?;
    Reply::new("Onboarding completed successfully", completed)
}
