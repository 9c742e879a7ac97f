//! Subscription routes

use bson::DateTime;
use hyper::Method;

use super::{ApiRequest, Reply};
use crate::services::{subscriptions, ServiceContext};
use crate::types::Result;

pub async fn route(
    ctx: &ServiceContext,
    req: &ApiRequest,
    path: &[&str],
    now: DateTime,
) -> Option<Result<Reply>> {
    let result = match (&req.method, path) {
        (&Method::GET, ["tiers"]) => Reply::new("Subscription tiers retrieved", subscriptions::tiers(ctx)),
        (&Method::POST, ["start-trial"]) => start_trial(ctx, req, now).await,
        (&Method::GET, ["status", email]) => status(ctx, email, now).await,
        (&Method::POST, ["create-payment-order"]) => create_payment_order(ctx, req, now).await,
        (&Method::POST, ["verify-payment"]) => verify_payment(ctx, req, now).await,
        (&Method::GET, ["upgrade-prompts", email]) => upgrade_prompts(ctx, email, now).await,
        _ => return None,
    };
    Some(result)
}

async fn start_trial(ctx: &ServiceContext, req: &ApiRequest, now: DateTime) -> Result<Reply> {
    let started = subscriptions::start_trial(ctx, req.json()?, now).await?;
    Reply::new("Premium trial started successfully!", started)
}

async fn status(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<Reply> {
    Reply::new("Subscription status retrieved", subscriptions::status(ctx, email, now).await?)
}

async fn create_payment_order(ctx: &ServiceContext, req: &ApiRequest, now: DateTime) -> Result<Reply> {
    let order = subscriptions::create_payment_order(ctx, req.json()?, now).await?;
    Reply::new("Payment order created", order)
}

async fn verify_payment(ctx: &ServiceContext, req: &ApiRequest, now: DateTime) -> Result<Reply> {
    let verified = subscriptions::verify_payment(ctx, req.json()?, now).await?;
    Reply::new("Payment verified and subscription activated!", verified)
}

async fn upgrade_prompts(ctx: &ServiceContext, email: &str, now: DateTime) -> Result<Reply> {
    let prompts = subscriptions::upgrade_prompts(ctx, email, now).await?;
    let message = if prompts.is_premium {
        "User is already premium"
    } else {
        "Upgrade prompts retrieved"
    };
    Reply::new(message, prompts)
}
