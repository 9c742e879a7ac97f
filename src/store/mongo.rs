//! MongoDB store
//!
//! Guarded mutations are single conditional updates so the database makes
//! the check and the write atomically:
//!
//! - usage consumption: an active premium period only touches `last_active`;
//!   otherwise `find_one_and_update` filtered on `$expr: {$lt: [used, limit]}`
//!   does the `$inc` on the counter
//! - voting: `$addToSet` plus `$inc` filtered on `voters: {$ne: email}`
//! - trials: filtered on `trial_used` and `is_premium` both unset
//! - orders: filtered on `status: "pending"`

use bson::{doc, oid::ObjectId, Bson, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::{
    AccountStore, CategoryCount, Consumption, EngagementStore, Grant, OrderStore, ProfileUpdate,
    ReportFilter, ReportStats, ReportStore, Touch, VotingStore, VotingTotals,
};
use crate::db::schemas::{
    ENGAGEMENT_COLLECTION, PENDING_ORDER_COLLECTION, SAMPLE_REPORT_COLLECTION, USER_COLLECTION,
    VOTING_OPTION_COLLECTION,
};
use crate::db::{
    EngagementRecord, MongoClient, MongoCollection, OptionStatus, OrderStatus, PendingOrder,
    SampleReport, UserAccount, VotingOption,
};
use crate::funnel::{EngagementDelta, FunnelCounts, FunnelStage};
use crate::types::{round1, AppError, Resource, Result, UsageKind};

/// MongoDB-backed implementation of every store trait
pub struct MongoStore {
    users: MongoCollection<UserAccount>,
    engagement: MongoCollection<EngagementRecord>,
    voting: MongoCollection<VotingOption>,
    reports: MongoCollection<SampleReport>,
    orders: MongoCollection<PendingOrder>,
}

impl MongoStore {
    /// Open all collections, applying their indexes
    pub async fn open(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            users: client.collection(USER_COLLECTION).await?,
            engagement: client.collection(ENGAGEMENT_COLLECTION).await?,
            voting: client.collection(VOTING_OPTION_COLLECTION).await?,
            reports: client.collection(SAMPLE_REPORT_COLLECTION).await?,
            orders: client.collection(PENDING_ORDER_COLLECTION).await?,
        })
    }
}

/// Filter matching an account whose premium period is still running at `now`
fn active_premium(now: DateTime) -> Document {
    doc! {
        "is_premium": true,
        "$or": [
            { "subscription_expires": Bson::Null },
            { "subscription_expires": { "$gte": now } },
        ],
    }
}

const DUPLICATE_KEY: i32 = 11000;

/// Whether a write lost a unique-index race to a concurrent insert
fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// Read a numeric aggregate field regardless of the BSON width it came back as
fn number(doc: &Document, key: &str) -> f64 {
    match doc.get(key) {
        Some(Bson::Int32(n)) => f64::from(*n),
        Some(Bson::Int64(n)) => *n as f64,
        Some(Bson::Double(n)) => *n,
        _ => 0.0,
    }
}

fn count(doc: &Document, key: &str) -> u64 {
    number(doc, key).max(0.0) as u64
}

#[async_trait::async_trait]
impl AccountStore for MongoStore {
    async fn find(&self, email: &str) -> Result<Option<UserAccount>> {
        self.users.find_one(doc! { "email": email }).await
    }

    async fn create_if_absent(&self, account: UserAccount) -> Result<(UserAccount, bool)> {
        let email = account.email.clone();
        let mut insert = bson::to_document(&account)?;
        insert.remove("_id");

        let upserted = match self
            .users
            .upsert_one(doc! { "email": &email }, doc! { "$setOnInsert": insert })
            .await
        {
            Ok(result) => result.upserted_id.is_some(),
            // A concurrent upsert for the same email loses on the unique index
            Err(e) if is_duplicate_key(&e) => {
                debug!(email = %email, "Account upsert raced, re-reading");
                false
            }
            Err(e) => return Err(e.into()),
        };

        let stored = AccountStore::find(self, &email)
            .await?
            .ok_or(AppError::NotFound(Resource::Account))?;
        Ok((stored, upserted))
    }

    async fn try_consume(&self, email: &str, kind: UsageKind, now: DateTime) -> Result<Consumption> {
        // Active premium use is never counted against the free quota
        let mut premium = active_premium(now);
        premium.insert("email", email);
        let touch = doc! { "$set": { "last_active": now } };
        if let Some(account) = self.users.find_one_and_update(premium, touch).await? {
            return Ok(Consumption::Allowed(account));
        }

        let used = format!("${}", kind.used_field());
        let limit = format!("${}", kind.limit_field());
        let filter = doc! {
            "email": email,
            "$expr": { "$lt": [used, limit] },
        };
        let update = doc! {
            "$inc": { kind.used_field(): 1 },
            "$set": { "last_active": now },
        };
        if let Some(account) = self.users.find_one_and_update(filter, update).await? {
            return Ok(Consumption::Allowed(account));
        }

        match AccountStore::find(self, email).await? {
            Some(account) => Ok(Consumption::Denied(account)),
            None => Err(AppError::NotFound(Resource::Account)),
        }
    }

    async fn refund(&self, email: &str, kind: UsageKind) -> Result<()> {
        let filter = doc! { "email": email, kind.used_field(): { "$gt": 0 } };
        let update = doc! { "$inc": { kind.used_field(): -1 } };
        self.users.find_one_and_update(filter, update).await?;
        Ok(())
    }

    async fn expire_if_due(&self, email: &str, now: DateTime) -> Result<Option<UserAccount>> {
        let filter = doc! {
            "email": email,
            "is_premium": true,
            "subscription_expires": { "$lt": now },
        };
        let update = doc! {
            "$set": {
                "is_premium": false,
                "subscription_expires": Bson::Null,
                "subscription_kind": Bson::Null,
            }
        };

        if let Some(expired) = self.users.find_one_and_update(filter, update).await? {
            debug!(email = %email, "Premium period expired");
            return Ok(Some(expired));
        }
        AccountStore::find(self, email).await
    }

    async fn grant_subscription(&self, email: &str, grant: Grant) -> Result<Option<UserAccount>> {
        let mut filter = doc! { "email": email };
        if grant.is_trial() {
            filter.insert("trial_used", doc! { "$ne": true });
            filter.insert("is_premium", doc! { "$ne": true });
        }

        let mut set = doc! {
            "is_premium": true,
            "subscription_expires": grant.expires,
            "subscription_kind": bson::to_bson(&grant.kind)?,
            "last_active": grant.now,
        };
        for kind in UsageKind::ALL {
            set.insert(kind.used_field(), 0);
        }
        if grant.is_trial() {
            set.insert("trial_used", true);
        }

        self.users
            .find_one_and_update(filter, doc! { "$set": set })
            .await
    }

    async fn touch(&self, email: &str, touch: Touch) -> Result<Option<UserAccount>> {
        let mut update = doc! { "$set": { "last_active": touch.now } };
        if let Some(step) = touch.onboarding_step {
            update.insert("$max", doc! { "onboarding_step": step });
        }
        if touch.first_vote {
            // $min keeps the earliest date and fills a missing one
            update.insert("$min", doc! { "first_vote_date": touch.now });
        }

        self.users
            .find_one_and_update(doc! { "email": email }, update)
            .await
    }

    async fn update_profile(
        &self,
        email: &str,
        profile: ProfileUpdate,
        now: DateTime,
    ) -> Result<Option<UserAccount>> {
        let mut set = doc! {
            "name": profile.name,
            "metadata.updated_at": now,
        };
        if let Some(mobile) = profile.mobile {
            set.insert("mobile", mobile);
        }
        if let Some(location) = profile.location {
            set.insert("location", location);
        }

        self.users
            .find_one_and_update(doc! { "email": email }, doc! { "$set": set })
            .await
    }

    async fn count(&self) -> Result<u64> {
        self.users.count(doc! {}).await
    }
}

#[async_trait::async_trait]
impl EngagementStore for MongoStore {
    async fn find(&self, email: &str) -> Result<Option<EngagementRecord>> {
        self.engagement.find_one(doc! { "email": email }).await
    }

    async fn record(&self, delta: &EngagementDelta, now: DateTime) -> Result<()> {
        let event = doc! {
            "timestamp": now,
            "action": &delta.action,
            "details": bson::to_bson(&delta.details)?,
        };

        let mut set = doc! { "metadata.updated_at": now };
        if let Some(stage) = delta.stage {
            set.insert(stage.field(), true);
        }

        let mut update = doc! {
            "$set": set,
            "$push": { "actions": event },
            "$setOnInsert": { "metadata.created_at": now },
        };
        if let Some(page) = &delta.page {
            update.insert("$inc", doc! { format!("page_views.{}", page): 1 });
        }

        self.engagement
            .upsert_one(doc! { "email": &delta.email }, update)
            .await?;
        Ok(())
    }

    async fn funnel_counts(&self) -> Result<FunnelCounts> {
        let mut group = doc! { "_id": Bson::Null, "total_users": { "$sum": 1 } };
        for stage in FunnelStage::ALL {
            group.insert(
                stage.field(),
                doc! { "$sum": { "$cond": [format!("${}", stage.field()), 1, 0] } },
            );
        }

        let results = self.engagement.aggregate(vec![doc! { "$group": group }]).await?;
        let mut counts = FunnelCounts::default();
        if let Some(summary) = results.first() {
            counts.total_users = count(summary, "total_users");
            for stage in FunnelStage::ALL {
                counts.stages[stage as usize] = count(summary, stage.field());
            }
        }
        Ok(counts)
    }
}

#[async_trait::async_trait]
impl VotingStore for MongoStore {
    async fn list(&self, status: Option<OptionStatus>, limit: Option<i64>) -> Result<Vec<VotingOption>> {
        let filter = match status {
            Some(status) => doc! { "status": status.as_str() },
            None => doc! {},
        };
        self.voting
            .find_many(filter, Some(doc! { "votes": -1, "_id": 1 }), limit)
            .await
    }

    async fn find(&self, id: ObjectId) -> Result<Option<VotingOption>> {
        self.voting.find_one(doc! { "_id": id }).await
    }

    async fn add_voter(&self, id: ObjectId, email: &str) -> Result<Option<VotingOption>> {
        self.voting
            .find_one_and_update(
                doc! { "_id": id, "voters": { "$ne": email } },
                doc! {
                    "$addToSet": { "voters": email },
                    "$inc": { "votes": 1 },
                },
            )
            .await
    }

    async fn voted_by(&self, email: &str) -> Result<Vec<VotingOption>> {
        self.voting
            .find_many(doc! { "voters": email }, Some(doc! { "_id": 1 }), Some(100))
            .await
    }

    async fn totals(&self) -> Result<VotingTotals> {
        let sums = self
            .voting
            .aggregate(vec![doc! {
                "$group": {
                    "_id": Bson::Null,
                    "total_votes": { "$sum": "$votes" },
                    "total_funding": { "$sum": "$funding_raised" },
                }
            }])
            .await?;

        let voters = self
            .voting
            .aggregate(vec![
                doc! { "$unwind": "$voters" },
                doc! { "$group": { "_id": "$voters" } },
                doc! { "$count": "unique_voters" },
            ])
            .await?;

        let active = self.voting.count(doc! { "status": OptionStatus::Voting.as_str() }).await?;

        let mut totals = VotingTotals {
            active_voting_options: active,
            ..Default::default()
        };
        if let Some(summary) = sums.first() {
            totals.total_votes = count(summary, "total_votes");
            totals.total_funding_raised = number(summary, "total_funding");
        }
        if let Some(summary) = voters.first() {
            totals.unique_voters = count(summary, "unique_voters");
        }
        Ok(totals)
    }

    async fn insert_many(&self, options: Vec<VotingOption>) -> Result<usize> {
        self.voting.insert_many(options).await
    }

    async fn count(&self) -> Result<u64> {
        self.voting.count(doc! {}).await
    }
}

#[async_trait::async_trait]
impl ReportStore for MongoStore {
    async fn list(&self, filter: &ReportFilter, limit: i64) -> Result<Vec<SampleReport>> {
        let mut query = doc! {};
        if let Some(category) = &filter.category {
            query.insert("category", category);
        }
        if filter.featured_only {
            query.insert("is_featured", true);
        }
        self.reports
            .find_many(query, Some(doc! { "metadata.created_at": -1, "_id": -1 }), Some(limit))
            .await
    }

    async fn find(&self, id: ObjectId) -> Result<Option<SampleReport>> {
        self.reports.find_one(doc! { "_id": id }).await
    }

    async fn featured(&self, limit: i64) -> Result<Vec<SampleReport>> {
        self.reports
            .find_many(
                doc! { "is_featured": true },
                Some(doc! { "purity_score": -1 }),
                Some(limit),
            )
            .await
    }

    async fn categories(&self) -> Result<Vec<CategoryCount>> {
        let results = self
            .reports
            .aggregate(vec![
                doc! { "$group": { "_id": "$category", "count": { "$sum": 1 } } },
                doc! { "$sort": { "count": -1, "_id": 1 } },
            ])
            .await?;

        Ok(results
            .iter()
            .filter_map(|d| {
                let name = d.get_str("_id").ok()?.to_string();
                Some(CategoryCount {
                    name,
                    count: count(d, "count"),
                })
            })
            .collect())
    }

    async fn stats(&self) -> Result<ReportStats> {
        let total_reports = self.reports.count(doc! {}).await?;
        let featured_reports = self.reports.count(doc! { "is_featured": true }).await?;

        let average = self
            .reports
            .aggregate(vec![doc! {
                "$group": { "_id": Bson::Null, "avg_purity": { "$avg": "$purity_score" } }
            }])
            .await?;
        let average_purity_score = average
            .first()
            .map(|d| round1(number(d, "avg_purity")))
            .unwrap_or(0.0);

        let safety = self
            .reports
            .aggregate(vec![doc! {
                "$group": { "_id": "$safety_status", "count": { "$sum": 1 } }
            }])
            .await?;
        let mut safety_distribution = BTreeMap::new();
        for entry in &safety {
            match entry.get_str("_id") {
                Ok(status) => {
                    safety_distribution.insert(status.to_string(), count(entry, "count"));
                }
                Err(_) => warn!("Sample report without a safety status"),
            }
        }

        Ok(ReportStats {
            total_reports,
            featured_reports,
            average_purity_score,
            safety_distribution,
        })
    }

    async fn insert_many(&self, reports: Vec<SampleReport>) -> Result<usize> {
        self.reports.insert_many(reports).await
    }

    async fn count(&self) -> Result<u64> {
        self.reports.count(doc! {}).await
    }
}

#[async_trait::async_trait]
impl OrderStore for MongoStore {
    async fn insert(&self, order: PendingOrder) -> Result<()> {
        self.orders.insert_one(order).await?;
        Ok(())
    }

    async fn find(&self, order_id: &str) -> Result<Option<PendingOrder>> {
        self.orders.find_one(doc! { "order_id": order_id }).await
    }

    async fn complete(
        &self,
        order_id: &str,
        payment_id: &str,
        now: DateTime,
    ) -> Result<Option<PendingOrder>> {
        let pending = bson::to_bson(&OrderStatus::Pending)?;
        let completed = bson::to_bson(&OrderStatus::Completed)?;
        self.orders
            .find_one_and_update(
                doc! { "order_id": order_id, "status": pending },
                doc! {
                    "$set": {
                        "status": completed,
                        "payment_id": payment_id,
                        "completed_at": now,
                        "metadata.updated_at": now,
                    }
                },
            )
            .await
    }
}
