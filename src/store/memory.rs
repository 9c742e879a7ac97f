//! In-memory store
//!
//! Every collection is a `DashMap`. A mutation holds the entry's shard lock
//! for the whole check-and-write, which gives the same per-document
//! atomicity MongoDB gives a single conditional update. Locks are never
//! held across an await point.

use bson::{oid::ObjectId, DateTime};
use dashmap::{mapref::entry::Entry, DashMap};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

use super::{
    AccountStore, CategoryCount, Consumption, EngagementStore, Grant, OrderStore, ProfileUpdate,
    ReportFilter, ReportStats, ReportStore, Touch, VotingStore, VotingTotals,
};
use crate::db::{
    EngagementRecord, OptionStatus, OrderStatus, PendingOrder, SampleReport, UserAccount,
    VotingOption,
};
use crate::funnel::{EngagementDelta, FunnelCounts};
use crate::policy;
use crate::subscription;
use crate::types::{round1, AppError, Resource, Result, UsageKind};

/// Process-local store for tests and development
#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<String, UserAccount>,
    engagement: DashMap<String, EngagementRecord>,
    voting: DashMap<ObjectId, VotingOption>,
    reports: DashMap<ObjectId, SampleReport>,
    orders: DashMap<String, PendingOrder>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_account<F>(&self, email: &str, f: F) -> Option<UserAccount>
    where
        F: FnOnce(&mut UserAccount),
    {
        self.accounts.get_mut(email).map(|mut entry| {
            f(entry.value_mut());
            entry.value().clone()
        })
    }
}

fn assign_id(id: &mut Option<ObjectId>) -> ObjectId {
    *id.get_or_insert_with(ObjectId::new)
}

fn take_limit<T>(items: Vec<T>, limit: Option<i64>) -> Vec<T> {
    match limit {
        Some(n) if n >= 0 => items.into_iter().take(n as usize).collect(),
        _ => items,
    }
}

#[async_trait::async_trait]
impl AccountStore for MemoryStore {
    async fn find(&self, email: &str) -> Result<Option<UserAccount>> {
        Ok(self.accounts.get(email).map(|a| a.value().clone()))
    }

    async fn create_if_absent(&self, mut account: UserAccount) -> Result<(UserAccount, bool)> {
        match self.accounts.entry(account.email.clone()) {
            Entry::Occupied(existing) => Ok((existing.get().clone(), false)),
            Entry::Vacant(slot) => {
                assign_id(&mut account._id);
                slot.insert(account.clone());
                Ok((account, true))
            }
        }
    }

    async fn try_consume(&self, email: &str, kind: UsageKind, now: DateTime) -> Result<Consumption> {
        let mut entry = self
            .accounts
            .get_mut(email)
            .ok_or(AppError::NotFound(Resource::Account))?;
        let account = entry.value_mut();

        if !policy::record_use(account, kind, now) {
            return Ok(Consumption::Denied(account.clone()));
        }
        account.last_active = Some(now);
        Ok(Consumption::Allowed(account.clone()))
    }

    async fn refund(&self, email: &str, kind: UsageKind) -> Result<()> {
        self.update_account(email, |account| {
            let counter = account.used_mut(kind);
            *counter = counter.saturating_sub(1);
        });
        Ok(())
    }

    async fn expire_if_due(&self, email: &str, now: DateTime) -> Result<Option<UserAccount>> {
        Ok(self.update_account(email, |account| {
            subscription::check_expiry(account, now);
        }))
    }

    async fn grant_subscription(&self, email: &str, grant: Grant) -> Result<Option<UserAccount>> {
        let Some(mut entry) = self.accounts.get_mut(email) else {
            return Ok(None);
        };
        let account = entry.value_mut();
        if !grant.applies_to(account) {
            return Ok(None);
        }
        grant.apply(account);
        Ok(Some(account.clone()))
    }

    async fn touch(&self, email: &str, touch: Touch) -> Result<Option<UserAccount>> {
        Ok(self.update_account(email, |account| touch.apply(account)))
    }

    async fn update_profile(
        &self,
        email: &str,
        profile: ProfileUpdate,
        now: DateTime,
    ) -> Result<Option<UserAccount>> {
        Ok(self.update_account(email, |account| {
            account.name = Some(profile.name);
            if profile.mobile.is_some() {
                account.mobile = profile.mobile;
            }
            if profile.location.is_some() {
                account.location = profile.location;
            }
            account.metadata.updated_at = Some(now);
        }))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.accounts.len() as u64)
    }
}

#[async_trait::async_trait]
impl EngagementStore for MemoryStore {
    async fn find(&self, email: &str) -> Result<Option<EngagementRecord>> {
        Ok(self.engagement.get(email).map(|r| r.value().clone()))
    }

    async fn record(&self, delta: &EngagementDelta, now: DateTime) -> Result<()> {
        let mut entry = self.engagement.entry(delta.email.clone()).or_insert_with(|| {
            let mut record = EngagementRecord::new(delta.email.clone(), now);
            assign_id(&mut record._id);
            record
        });
        delta.apply(entry.value_mut(), now);
        Ok(())
    }

    async fn funnel_counts(&self) -> Result<FunnelCounts> {
        let mut counts = FunnelCounts::default();
        for record in self.engagement.iter() {
            counts.add(record.flags());
        }
        Ok(counts)
    }
}

#[async_trait::async_trait]
impl VotingStore for MemoryStore {
    async fn list(&self, status: Option<OptionStatus>, limit: Option<i64>) -> Result<Vec<VotingOption>> {
        let mut options: Vec<VotingOption> = self
            .voting
            .iter()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .map(|o| o.value().clone())
            .collect();
        options.sort_by_key(|o| (Reverse(o.votes), o._id));
        Ok(take_limit(options, limit))
    }

    async fn find(&self, id: ObjectId) -> Result<Option<VotingOption>> {
        Ok(self.voting.get(&id).map(|o| o.value().clone()))
    }

    async fn add_voter(&self, id: ObjectId, email: &str) -> Result<Option<VotingOption>> {
        let Some(mut entry) = self.voting.get_mut(&id) else {
            return Ok(None);
        };
        let option = entry.value_mut();
        if !option.voters.insert(email.to_string()) {
            return Ok(None);
        }
        option.votes = option.votes.saturating_add(1);
        Ok(Some(option.clone()))
    }

    async fn voted_by(&self, email: &str) -> Result<Vec<VotingOption>> {
        let mut options: Vec<VotingOption> = self
            .voting
            .iter()
            .filter(|o| o.voters.contains(email))
            .map(|o| o.value().clone())
            .collect();
        options.sort_by_key(|o| o._id);
        Ok(options)
    }

    async fn totals(&self) -> Result<VotingTotals> {
        let mut totals = VotingTotals::default();
        let mut voters = HashSet::new();
        for option in self.voting.iter() {
            totals.total_votes += u64::from(option.votes);
            totals.total_funding_raised += option.funding_raised;
            if option.status == OptionStatus::Voting {
                totals.active_voting_options += 1;
            }
            voters.extend(option.voters.iter().cloned());
        }
        totals.unique_voters = voters.len() as u64;
        Ok(totals)
    }

    async fn insert_many(&self, options: Vec<VotingOption>) -> Result<usize> {
        let count = options.len();
        for mut option in options {
            let id = assign_id(&mut option._id);
            self.voting.insert(id, option);
        }
        Ok(count)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.voting.len() as u64)
    }
}

#[async_trait::async_trait]
impl ReportStore for MemoryStore {
    async fn list(&self, filter: &ReportFilter, limit: i64) -> Result<Vec<SampleReport>> {
        let mut reports: Vec<SampleReport> = self
            .reports
            .iter()
            .filter(|r| filter.category.as_deref().map_or(true, |c| r.category == c))
            .filter(|r| !filter.featured_only || r.is_featured)
            .map(|r| r.value().clone())
            .collect();
        reports.sort_by_key(|r| Reverse((r.metadata.created_at, r._id)));
        Ok(take_limit(reports, Some(limit)))
    }

    async fn find(&self, id: ObjectId) -> Result<Option<SampleReport>> {
        Ok(self.reports.get(&id).map(|r| r.value().clone()))
    }

    async fn featured(&self, limit: i64) -> Result<Vec<SampleReport>> {
        let mut reports: Vec<SampleReport> = self
            .reports
            .iter()
            .filter(|r| r.is_featured)
            .map(|r| r.value().clone())
            .collect();
        reports.sort_by(|a, b| b.purity_score.total_cmp(&a.purity_score));
        Ok(take_limit(reports, Some(limit)))
    }

    async fn categories(&self) -> Result<Vec<CategoryCount>> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for report in self.reports.iter() {
            *counts.entry(report.category.clone()).or_insert(0) += 1;
        }
        let mut categories: Vec<CategoryCount> = counts
            .into_iter()
            .map(|(name, count)| CategoryCount { name, count })
            .collect();
        categories.sort_by_key(|c| Reverse(c.count));
        Ok(categories)
    }

    async fn stats(&self) -> Result<ReportStats> {
        let mut stats = ReportStats::default();
        let mut purity_sum = 0.0;
        for report in self.reports.iter() {
            stats.total_reports += 1;
            if report.is_featured {
                stats.featured_reports += 1;
            }
            purity_sum += report.purity_score;
            *stats
                .safety_distribution
                .entry(report.safety_status.to_string())
                .or_insert(0) += 1;
        }
        if stats.total_reports > 0 {
            stats.average_purity_score = round1(purity_sum / stats.total_reports as f64);
        }
        Ok(stats)
    }

    async fn insert_many(&self, reports: Vec<SampleReport>) -> Result<usize> {
        let count = reports.len();
        let now = DateTime::now();
        for mut report in reports {
            if report.metadata.created_at.is_none() {
                report.metadata.created_at = Some(now);
            }
            let id = assign_id(&mut report._id);
            self.reports.insert(id, report);
        }
        Ok(count)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.reports.len() as u64)
    }
}

#[async_trait::async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, mut order: PendingOrder) -> Result<()> {
        assign_id(&mut order._id);
        self.orders.insert(order.order_id.clone(), order);
        Ok(())
    }

    async fn find(&self, order_id: &str) -> Result<Option<PendingOrder>> {
        Ok(self.orders.get(order_id).map(|o| o.value().clone()))
    }

    async fn complete(
        &self,
        order_id: &str,
        payment_id: &str,
        now: DateTime,
    ) -> Result<Option<PendingOrder>> {
        let Some(mut entry) = self.orders.get_mut(order_id) else {
            return Ok(None);
        };
        let order = entry.value_mut();
        if order.status != OrderStatus::Pending {
            return Ok(None);
        }
        order.status = OrderStatus::Completed;
        order.payment_id = Some(payment_id.to_string());
        order.completed_at = Some(now);
        Ok(Some(order.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use std::sync::Arc;

    fn now() -> DateTime {
        DateTime::from_millis(1_700_000_000_000)
    }

    #[tokio::test]
    async fn test_create_if_absent_keeps_existing() {
        let store = MemoryStore::new();
        let policy = PolicyConfig::default();

        let (first, created) = store
            .create_if_absent(UserAccount::new("a@x.com", &policy, now()))
            .await
            .unwrap();
        assert!(created);

        let mut replacement = UserAccount::new("a@x.com", &policy, now());
        replacement.votes_cast = 4;
        let (second, created) = store.create_if_absent(replacement).await.unwrap();
        assert!(!created);
        assert_eq!(second._id, first._id);
        assert_eq!(second.votes_cast, 0);
    }

    #[tokio::test]
    async fn test_concurrent_consumption_respects_limit() {
        let store = Arc::new(MemoryStore::new());
        let policy = PolicyConfig::default();
        store
            .create_if_absent(UserAccount::new("a@x.com", &policy, now()))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_consume("a@x.com", UsageKind::Vote, now()).await
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if let Consumption::Allowed(_) = handle.await.unwrap().unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
        let account = AccountStore::find(store.as_ref(), "a@x.com").await.unwrap().unwrap();
        assert_eq!(account.votes_cast, 5);
    }

    #[tokio::test]
    async fn test_premium_consumption_is_not_counted() {
        let store = MemoryStore::new();
        let policy = PolicyConfig::default();
        let mut account = UserAccount::new("p@x.com", &policy, now());
        subscription::activate_paid(&mut account, now(), policy.paid_days);
        store.create_if_absent(account).await.unwrap();

        for _ in 0..10 {
            let outcome = store.try_consume("p@x.com", UsageKind::ReportView, now()).await.unwrap();
            assert!(matches!(outcome, Consumption::Allowed(_)));
        }
        let account = AccountStore::find(&store, "p@x.com").await.unwrap().unwrap();
        assert_eq!(account.report_views_used, 0);
        assert_eq!(account.last_active, Some(now()));
    }

    #[tokio::test]
    async fn test_refund_stops_at_zero() {
        let store = MemoryStore::new();
        store
            .create_if_absent(UserAccount::new("a@x.com", &PolicyConfig::default(), now()))
            .await
            .unwrap();

        store.try_consume("a@x.com", UsageKind::Vote, now()).await.unwrap();
        store.refund("a@x.com", UsageKind::Vote).await.unwrap();
        store.refund("a@x.com", UsageKind::Vote).await.unwrap();

        let account = AccountStore::find(&store, "a@x.com").await.unwrap().unwrap();
        assert_eq!(account.votes_cast, 0);
    }

    #[tokio::test]
    async fn test_add_voter_is_idempotent() {
        let store = MemoryStore::new();
        let option = VotingOption {
            product_name: "Maggi Noodles".into(),
            category: "Instant Food".into(),
            ..Default::default()
        };
        VotingStore::insert_many(&store, vec![option]).await.unwrap();
        let id = VotingStore::list(&store, None, None).await.unwrap()[0]._id.unwrap();

        let updated = store.add_voter(id, "a@x.com").await.unwrap().unwrap();
        assert_eq!(updated.votes, 1);
        assert!(store.add_voter(id, "a@x.com").await.unwrap().is_none());

        let option = VotingStore::find(&store, id).await.unwrap().unwrap();
        assert_eq!(option.votes as usize, option.voters.len());
    }

    #[tokio::test]
    async fn test_order_completes_once() {
        let store = MemoryStore::new();
        store
            .insert(PendingOrder {
                order_id: "order_1".into(),
                email: "a@x.com".into(),
                tier_id: "premium".into(),
                amount: 99,
                currency: "INR".into(),
                duration_days: 30,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(store.complete("order_1", "pay_1", now()).await.unwrap().is_some());
        assert!(store.complete("order_1", "pay_2", now()).await.unwrap().is_none());
        let order = OrderStore::find(&store, "order_1").await.unwrap().unwrap();
        assert_eq!(order.payment_id.as_deref(), Some("pay_1"));
    }
}
