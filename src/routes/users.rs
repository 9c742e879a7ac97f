//! User routes

use bson::DateTime;
use hyper::Method;

use super::{ApiRequest, Reply};
use crate::services::{users, ServiceContext};
use crate::types::{Result, UsageKind};

pub async fn route(
    ctx: &ServiceContext,
    req: &ApiRequest,
    path: &[&str],
    now: DateTime,
) -> Option<Result<Reply>> {
    let result = match (&req.method, path) {
        (&Method::GET, ["dashboard", email]) => dashboard(ctx, email, now).await,
        (&Method::POST, ["complete-profile", email]) => complete_profile(ctx, req, email, now).await,
        (&Method::POST, ["track-report-view", email]) => {
            track(ctx, req, UsageKind::ReportView, email, now).await
        }
        (&Method::POST, ["track-forum-post", email]) => {
            track(ctx, req, UsageKind::ForumPost, email, now).await
        }
        (&Method::GET, ["profile", email]) => profile(ctx, email, now).await,
        (&Method::GET, ["community-stats"]) => community_stats(ctx).await,
        _ => return None,
    };
    Some(result)
}

async fn dashboard(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<Reply> {
    Reply::new("Dashboard data retrieved", users::dashboard(ctx, email, now).await?)
}

async fn complete_profile(
    ctx: &ServiceContext,
    req: &ApiRequest,
    email: &str,
    now: DateTime,
) -> Result<Reply> {
    let completed = users::complete_profile(ctx, email, req.json()?, now).await?;
    Reply::new("Profile completed successfully", completed)
}

async fn track(
    ctx: &ServiceContext,
    req: &ApiRequest,
    kind: UsageKind,
    email: &str,
    now: DateTime,
) -> Result<Reply> {
    let receipt = users::track_usage(ctx, kind, email, req.details()?, now).await?;
    Reply::new(format!("{} tracked", kind.label()), receipt)
}

async fn profile(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<Reply> {
    Reply::new("Profile retrieved", users::profile(ctx, email, now).await?)
}

async fn community_stats(ctx: &ServiceContext) -> Result<Reply> {
    Reply::new("Community statistics retrieved", users::community_stats(ctx).await?)
}
