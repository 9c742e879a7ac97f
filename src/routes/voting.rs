//! Voting routes

use bson::DateTime;
use hyper::Method;

use super::{ApiRequest, Reply};
use crate::db::OptionStatus;
use crate::services::{voting, ServiceContext};
use crate::types::{AppError, Result};

pub async fn route(
    ctx: &ServiceContext,
    req: &ApiRequest,
    path: &[&str],
    now: DateTime,
) -> Option<Result<Reply>> {
    let result = match (&req.method, path) {
        (&Method::GET, ["options"]) => options(ctx, req).await,
        (&Method::POST, ["cast-vote"]) => cast_vote(ctx, req, now).await,
        (&Method::GET, ["user-votes", email]) => user_votes(ctx, email, now).await,
        (&Method::GET, ["stats"]) => stats(ctx).await,
        (&Method::POST, ["quick-signup"]) => quick_signup(ctx, req, now).await,
        _ => return None,
    };
    Some(result)
}

async fn options(ctx: &ServiceContext, req: &ApiRequest) -> Result<Reply> {
    let status = req
        .query("status")
        .map(|s| s.parse::<OptionStatus>().map_err(AppError::Validation))
        .transpose()?;
    let list = voting::list_options(ctx, status).await?;
    Reply::new(format!("Retrieved {} voting options", list.total), list)
}

async fn cast_vote(ctx: &ServiceContext, req: &ApiRequest, now: DateTime) -> Result<Reply> {
    let receipt = voting::cast_vote(ctx, req.json()?, now).await?;
    Reply::new("Vote cast successfully! Welcome to ChoosePure community.", receipt)
}

async fn user_votes(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<Reply> {
    Reply::new("User votes retrieved", voting::user_votes(ctx, email, now).await?)
}

async fn stats(ctx: &ServiceContext) -> Result<Reply> {
    Reply::new("Voting statistics retrieved", voting::stats(ctx).await?)
}

async fn quick_signup(ctx: &ServiceContext, req: &ApiRequest, now: DateTime) -> Result<Reply> {
    let signup = voting::quick_signup(ctx, req.json()?, now).await?;
    let message = if signup.is_existing_user {
        "Welcome back! You can now vote."
    } else {
        "Welcome to ChoosePure! You can now vote for products to be tested."
    };
    Reply::new(message, signup)
}
