//! Freemium flow integration tests
//!
//! Drives the service layer against the in-memory store:
//! - Vote casting, duplicate votes and the vote quota
//! - Report-view metering and the hit-free-limit funnel flag
//! - Trial and paid lifecycles with lazy expiry
//! - Concurrent requests for the same email and the same option

use bson::oid::ObjectId;
use bson::DateTime;
use futures_util::future::join_all;

use choosepure::db::{Metadata, OptionStatus, VotingOption};
use choosepure::funnel::FunnelStage;
use choosepure::services::onboarding::{self, TrackActionRequest};
use choosepure::services::subscriptions::{
    self, CreateOrderRequest, EmailRequest, VerifyPaymentRequest,
};
use choosepure::services::voting::{self, CastVoteRequest, QuickSignupRequest};
use choosepure::services::{users, ServiceContext};
use choosepure::subscription::{add_days, PromptKind};
use choosepure::types::{AlreadyDone, AppError, Remaining, Resource, UsageKind};

const T: i64 = 1_706_000_000_000;

fn at(millis: i64) -> DateTime {
    DateTime::from_millis(millis)
}

fn option(name: &str, votes: u32, raised: f64, target: f64) -> VotingOption {
    VotingOption {
        _id: None,
        metadata: Metadata::at(at(T)),
        product_name: name.to_string(),
        category: "Instant Food".to_string(),
        description: String::new(),
        votes,
        funding_raised: raised,
        funding_target: target,
        estimated_test_date: None,
        status: OptionStatus::Voting,
        voters: Default::default(),
    }
}

/// Insert options and return their ids in insertion order
async fn seed_options(ctx: &ServiceContext, options: Vec<VotingOption>) -> Vec<ObjectId> {
    let names: Vec<String> = options.iter().map(|o| o.product_name.clone()).collect();
    ctx.stores.voting.insert_many(options).await.unwrap();
    let stored = ctx.stores.voting.list(None, None).await.unwrap();
    names
        .iter()
        .map(|name| {
            stored
                .iter()
                .find(|o| &o.product_name == name)
                .and_then(|o| o._id)
                .unwrap()
        })
        .collect()
}

fn vote(email: &str, id: ObjectId) -> CastVoteRequest {
    CastVoteRequest {
        email: Some(email.to_string()),
        voting_option_id: Some(id.to_hex()),
    }
}

async fn signup(ctx: &ServiceContext, email: &str, now: DateTime) {
    voting::quick_signup(
        ctx,
        QuickSignupRequest {
            email: Some(email.to_string()),
        },
        now,
    )
    .await
    .unwrap();
}

// =============================================================================
// Voting
// =============================================================================

#[tokio::test]
async fn test_first_vote_creates_account() {
    let ctx = ServiceContext::in_memory();
    let ids = seed_options(&ctx, vec![option("Maggi Noodles", 245, 12_000.0, 15_000.0)]).await;

    let receipt = voting::cast_vote(&ctx, vote("a@x.com", ids[0]), at(T)).await.unwrap();
    assert!(receipt.is_new_user);
    assert_eq!(receipt.total_votes, 246);
    assert_eq!(receipt.votes_remaining, Remaining::Count(4));

    let account = ctx.stores.accounts.find("a@x.com").await.unwrap().unwrap();
    assert_eq!(account.votes_cast, 1);
    assert_eq!(account.votes_limit, 5);
    assert_eq!(account.first_vote_date, Some(at(T)));

    let stored = ctx.stores.voting.find(ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.votes, 246);
    assert!(stored.voters.contains("a@x.com"));
    assert_eq!(stored.funding_percentage(), 80.0);

    let record = ctx.stores.engagement.find("a@x.com").await.unwrap().unwrap();
    assert!(record.cast_first_vote);
    assert_eq!(record.actions.len(), 1);
}

#[tokio::test]
async fn test_duplicate_vote_leaves_ledger_unchanged() {
    let ctx = ServiceContext::in_memory();
    let ids = seed_options(&ctx, vec![option("Amul Cheese", 0, 0.0, 10_000.0)]).await;

    voting::cast_vote(&ctx, vote("a@x.com", ids[0]), at(T)).await.unwrap();
    let after_first = ctx.stores.voting.find(ids[0]).await.unwrap().unwrap();

    let err = voting::cast_vote(&ctx, vote("a@x.com", ids[0]), at(T)).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyDone(AlreadyDone::AlreadyVoted)));

    let after_second = ctx.stores.voting.find(ids[0]).await.unwrap().unwrap();
    assert_eq!(after_first, after_second);
    assert_eq!(after_second.votes as usize, after_second.voters.len());

    let account = ctx.stores.accounts.find("a@x.com").await.unwrap().unwrap();
    assert_eq!(account.votes_cast, 1);
}

#[tokio::test]
async fn test_vote_limit_blocks_ledger() {
    let ctx = ServiceContext::in_memory();
    let options = (0..6).map(|i| option(&format!("Product {}", i), 0, 0.0, 1_000.0)).collect();
    let ids = seed_options(&ctx, options).await;

    for id in &ids[..5] {
        voting::cast_vote(&ctx, vote("a@x.com", *id), at(T)).await.unwrap();
    }

    let before = ctx.stores.voting.find(ids[5]).await.unwrap().unwrap();
    let err = voting::cast_vote(&ctx, vote("a@x.com", ids[5]), at(T)).await.unwrap_err();
    match err {
        AppError::LimitReached { kind, used, limit } => {
            assert_eq!(kind, UsageKind::Vote);
            assert_eq!((used, limit), (5, 5));
        }
        other => panic!("expected limit error, got {:?}", other),
    }

    let after = ctx.stores.voting.find(ids[5]).await.unwrap().unwrap();
    assert_eq!(before, after);

    let record = ctx.stores.engagement.find("a@x.com").await.unwrap().unwrap();
    assert!(record.hit_free_limit);
}

#[tokio::test]
async fn test_unknown_option_creates_nothing() {
    let ctx = ServiceContext::in_memory();
    let err = voting::cast_vote(&ctx, vote("a@x.com", ObjectId::new()), at(T))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(Resource::VotingOption)));
    assert_eq!(ctx.stores.accounts.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_voting_stats_average() {
    let ctx = ServiceContext::in_memory();
    let empty = voting::stats(&ctx).await.unwrap();
    assert_eq!(empty.average_votes_per_option, 0.0);

    seed_options(
        &ctx,
        vec![
            option("A", 10, 100.0, 1_000.0),
            option("B", 5, 50.0, 1_000.0),
        ],
    )
    .await;
    let stats = voting::stats(&ctx).await.unwrap();
    assert_eq!(stats.total_votes, 15);
    assert_eq!(stats.active_voting_options, 2);
    assert_eq!(stats.average_votes_per_option, 7.5);
    assert_eq!(stats.total_funding_raised, 150.0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_votes_same_email_respect_limit() {
    let ctx = ServiceContext::in_memory();
    let options = (0..12).map(|i| option(&format!("Product {}", i), 0, 0.0, 1_000.0)).collect();
    let ids = seed_options(&ctx, options).await;
    signup(&ctx, "a@x.com", at(T)).await;

    let results = join_all(ids.iter().map(|id| {
        let ctx = ctx.clone();
        let id = *id;
        tokio::spawn(async move { voting::cast_vote(&ctx, vote("a@x.com", id), at(T)).await })
    }))
    .await;

    let allowed = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(allowed, 5);

    let account = ctx.stores.accounts.find("a@x.com").await.unwrap().unwrap();
    assert_eq!(account.votes_cast, 5);

    let total: u32 = ctx
        .stores
        .voting
        .list(None, None)
        .await
        .unwrap()
        .iter()
        .map(|o| o.votes)
        .sum();
    assert_eq!(total, 5);
}

#[tokio::test]
async fn test_concurrent_votes_same_option_keep_invariant() {
    let ctx = ServiceContext::in_memory();
    let ids = seed_options(&ctx, vec![option("Britannia Bread", 0, 0.0, 12_000.0)]).await;

    let emails: Vec<String> = (0..25).map(|i| format!("voter{}@x.com", i)).collect();
    let mut tasks = Vec::new();
    for email in &emails {
        // Two requests per email race on the same option
        for _ in 0..2 {
            let ctx = ctx.clone();
            let email = email.clone();
            let id = ids[0];
            tasks.push(tokio::spawn(async move {
                voting::cast_vote(&ctx, vote(&email, id), at(T)).await
            }));
        }
    }
    let succeeded = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(succeeded, 25);

    let stored = ctx.stores.voting.find(ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.votes, 25);
    assert_eq!(stored.voters.len(), 25);

    // The losing duplicate gives its quota unit back
    for email in &emails {
        let account = ctx.stores.accounts.find(email).await.unwrap().unwrap();
        assert_eq!(account.votes_cast, 1, "{}", email);
    }
}

// =============================================================================
// Report views
// =============================================================================

#[tokio::test]
async fn test_report_view_denied_at_limit() {
    let ctx = ServiceContext::in_memory();
    signup(&ctx, "r@x.com", at(T)).await;

    for expected in 1..=3u32 {
        let receipt = users::track_usage(&ctx, UsageKind::ReportView, "r@x.com", Default::default(), at(T))
            .await
            .unwrap();
        assert_eq!(receipt.used, expected);
    }

    let err = users::track_usage(&ctx, UsageKind::ReportView, "r@x.com", Default::default(), at(T))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LimitReached { used: 3, limit: 3, .. }));

    let account = ctx.stores.accounts.find("r@x.com").await.unwrap().unwrap();
    assert_eq!(account.report_views_used, 3);

    let record = ctx.stores.engagement.find("r@x.com").await.unwrap().unwrap();
    assert!(record.hit_free_limit);
}

#[tokio::test]
async fn test_upgrade_prompt_on_last_free_view() {
    let ctx = ServiceContext::in_memory();
    signup(&ctx, "r@x.com", at(T)).await;

    let first = users::track_usage(&ctx, UsageKind::ReportView, "r@x.com", Default::default(), at(T))
        .await
        .unwrap();
    assert!(!first.show_upgrade_prompt);

    let second = users::track_usage(&ctx, UsageKind::ReportView, "r@x.com", Default::default(), at(T))
        .await
        .unwrap();
    assert!(second.show_upgrade_prompt);
    assert_eq!(second.remaining, Remaining::Count(1));
}

#[tokio::test]
async fn test_forum_post_limit_is_one() {
    let ctx = ServiceContext::in_memory();
    signup(&ctx, "f@x.com", at(T)).await;

    users::track_usage(&ctx, UsageKind::ForumPost, "f@x.com", Default::default(), at(T))
        .await
        .unwrap();
    let err = users::track_usage(&ctx, UsageKind::ForumPost, "f@x.com", Default::default(), at(T))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::LimitReached { kind: UsageKind::ForumPost, .. }));
}

#[tokio::test]
async fn test_usage_requires_account() {
    let ctx = ServiceContext::in_memory();
    let err = users::track_usage(&ctx, UsageKind::ReportView, "ghost@x.com", Default::default(), at(T))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(Resource::Account)));
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test]
async fn test_trial_lifecycle() {
    let ctx = ServiceContext::in_memory();
    signup(&ctx, "t@x.com", at(T)).await;
    users::track_usage(&ctx, UsageKind::ReportView, "t@x.com", Default::default(), at(T))
        .await
        .unwrap();

    let started = subscriptions::start_trial(
        &ctx,
        EmailRequest {
            email: Some("t@x.com".into()),
        },
        at(T),
    )
    .await
    .unwrap();
    assert_eq!(started.days_remaining, 7);

    let account = ctx.stores.accounts.find("t@x.com").await.unwrap().unwrap();
    assert!(account.is_premium);
    assert!(account.trial_used);
    assert_eq!(account.subscription_expires, Some(add_days(at(T), 7)));
    assert_eq!(
        (account.report_views_used, account.votes_cast, account.forum_posts),
        (0, 0, 0)
    );

    let during = subscriptions::status(&ctx, "t@x.com", add_days(at(T), 3)).await.unwrap();
    assert!(during.is_premium);
    assert_eq!(during.days_remaining, 4);

    let after = subscriptions::status(&ctx, "t@x.com", add_days(at(T), 8)).await.unwrap();
    assert!(!after.is_premium);
    assert_eq!(after.days_remaining, 0);
    assert!(!after.trial_available);

    let account = ctx.stores.accounts.find("t@x.com").await.unwrap().unwrap();
    assert!(!account.is_premium);
    assert_eq!(account.subscription_expires, None);

    // Expiry is idempotent
    let again = ctx
        .stores
        .accounts
        .expire_if_due("t@x.com", add_days(at(T), 9))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again, account);
}

#[tokio::test]
async fn test_free_quota_survives_trial() {
    let ctx = ServiceContext::in_memory();
    signup(&ctx, "v@x.com", at(T)).await;
    subscriptions::start_trial(
        &ctx,
        EmailRequest {
            email: Some("v@x.com".into()),
        },
        at(T),
    )
    .await
    .unwrap();

    for _ in 0..5 {
        let receipt = users::track_usage(&ctx, UsageKind::ReportView, "v@x.com", Default::default(), at(T))
            .await
            .unwrap();
        assert_eq!(receipt.remaining, Remaining::Unlimited);
    }
    let account = ctx.stores.accounts.find("v@x.com").await.unwrap().unwrap();
    assert_eq!(account.report_views_used, 0);

    let later = add_days(at(T), 8);
    let prompts = subscriptions::upgrade_prompts(&ctx, "v@x.com", later).await.unwrap();
    assert!(prompts.prompts.iter().all(|p| p.kind != PromptKind::LimitReached));

    let receipt = users::track_usage(&ctx, UsageKind::ReportView, "v@x.com", Default::default(), later)
        .await
        .unwrap();
    assert!(!receipt.is_premium);
    assert_eq!(receipt.used, 1);
    assert_eq!(receipt.remaining, Remaining::Count(2));
}

#[tokio::test]
async fn test_trial_is_one_time() {
    let ctx = ServiceContext::in_memory();
    signup(&ctx, "t@x.com", at(T)).await;
    let req = || EmailRequest {
        email: Some("t@x.com".into()),
    };

    subscriptions::start_trial(&ctx, req(), at(T)).await.unwrap();

    // While premium
    let err = subscriptions::start_trial(&ctx, req(), add_days(at(T), 1)).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyDone(AlreadyDone::TrialAlreadyUsed)));

    // After expiry
    let err = subscriptions::start_trial(&ctx, req(), add_days(at(T), 30)).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyDone(AlreadyDone::TrialAlreadyUsed)));

    let record = ctx.stores.engagement.find("t@x.com").await.unwrap().unwrap();
    assert!(record.started_trial);
}

#[tokio::test]
async fn test_concurrent_trials_grant_once() {
    let ctx = ServiceContext::in_memory();
    signup(&ctx, "t@x.com", at(T)).await;

    let results = join_all((0..10).map(|_| {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            subscriptions::start_trial(
                &ctx,
                EmailRequest {
                    email: Some("t@x.com".into()),
                },
                at(T),
            )
            .await
        })
    }))
    .await;

    let granted = results.into_iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    assert_eq!(granted, 1);
}

#[tokio::test]
async fn test_payment_flow_completes_once() {
    let ctx = ServiceContext::in_memory();
    signup(&ctx, "p@x.com", at(T)).await;

    let order = subscriptions::create_payment_order(
        &ctx,
        CreateOrderRequest {
            email: Some("p@x.com".into()),
            tier_id: Some("premium".into()),
        },
        at(T),
    )
    .await
    .unwrap();
    assert_eq!(order.amount, 99);
    assert_eq!(order.currency, "INR");
    assert_eq!(order.duration_days, 30);

    let verify = || VerifyPaymentRequest {
        order_id: Some(order.order_id.clone()),
        payment_id: Some("pay_123".into()),
        signature: Some("sig".into()),
    };
    let verified = subscriptions::verify_payment(&ctx, verify(), at(T)).await.unwrap();
    assert_eq!(verified.days_remaining, 30);

    let account = ctx.stores.accounts.find("p@x.com").await.unwrap().unwrap();
    assert!(account.is_premium);
    assert!(!account.trial_used);
    assert_eq!(account.subscription_expires, Some(add_days(at(T), 30)));

    let err = subscriptions::verify_payment(&ctx, verify(), at(T)).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyDone(AlreadyDone::OrderAlreadyCompleted)));

    let record = ctx.stores.engagement.find("p@x.com").await.unwrap().unwrap();
    assert!(record.converted_to_paid);
}

#[tokio::test]
async fn test_premium_votes_are_unlimited() {
    let ctx = ServiceContext::in_memory();
    let options = (0..7).map(|i| option(&format!("Product {}", i), 0, 0.0, 1_000.0)).collect();
    let ids = seed_options(&ctx, options).await;
    signup(&ctx, "p@x.com", at(T)).await;
    subscriptions::start_trial(
        &ctx,
        EmailRequest {
            email: Some("p@x.com".into()),
        },
        at(T),
    )
    .await
    .unwrap();

    for id in &ids {
        let receipt = voting::cast_vote(&ctx, vote("p@x.com", *id), at(T)).await.unwrap();
        assert_eq!(receipt.votes_remaining, Remaining::Unlimited);
    }
}

#[tokio::test]
async fn test_upgrade_prompts_for_exhausted_free_account() {
    let ctx = ServiceContext::in_memory();
    signup(&ctx, "u@x.com", at(T)).await;
    for _ in 0..3 {
        users::track_usage(&ctx, UsageKind::ReportView, "u@x.com", Default::default(), at(T))
            .await
            .unwrap();
    }

    let prompts = subscriptions::upgrade_prompts(&ctx, "u@x.com", at(T)).await.unwrap();
    assert!(!prompts.is_premium);
    let kinds: Vec<PromptKind> = prompts.prompts.iter().map(|p| p.kind).collect();
    assert_eq!(kinds, vec![PromptKind::LimitReached, PromptKind::TrialOffer]);
}

// =============================================================================
// Funnel
// =============================================================================

#[tokio::test]
async fn test_funnel_stats_empty() {
    let ctx = ServiceContext::in_memory();
    let stats = onboarding::funnel_stats(&ctx).await.unwrap();
    assert_eq!(stats.total_users, 0);
    let rates = serde_json::to_value(&stats.conversion_rates).unwrap();
    for (_, rate) in rates.as_object().unwrap() {
        assert_eq!(rate.as_f64(), Some(0.0));
    }
}

#[tokio::test]
async fn test_track_action_counts_pages() {
    let ctx = ServiceContext::in_memory();
    let mut details = serde_json::Map::new();
    details.insert("page".into(), "samples".into());

    for _ in 0..2 {
        onboarding::track_action(
            &ctx,
            TrackActionRequest {
                email: Some("j@x.com".into()),
                action: Some(FunnelStage::ViewedSamples.action().into()),
                details: details.clone(),
            },
            at(T),
        )
        .await
        .unwrap();
    }

    let journey = onboarding::user_journey(&ctx, "j@x.com").await.unwrap();
    assert_eq!(journey.page_views.get("samples"), Some(&2));
    assert_eq!(journey.total_actions, 2);

    let stats = onboarding::funnel_stats(&ctx).await.unwrap();
    assert_eq!(stats.total_users, 1);
    assert_eq!(stats.absolute_numbers["viewed_samples"], 1);
}

#[tokio::test]
async fn test_journey_requires_record() {
    let ctx = ServiceContext::in_memory();
    let err = onboarding::user_journey(&ctx, "none@x.com").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(Resource::Journey)));
}
