//! Store access for ChoosePure
//!
//! Each collection sits behind an `async_trait` so services receive their
//! stores explicitly through [`Stores`] rather than reaching for a global
//! handle. Two implementations exist:
//!
//! - [`MongoStore`] backed by MongoDB, using single-document atomic updates
//! - [`MemoryStore`] backed by `dashmap`, used by tests and as the dev-mode fallback
//!
//! Operations that guard an invariant (usage consumption, adding a voter,
//! claiming a trial, completing an order) are conditional updates. They
//! return `None` or a denial instead of mutating when the condition fails.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use bson::{oid::ObjectId, DateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::{
    EngagementRecord, MongoClient, OptionStatus, PendingOrder, SampleReport, SubscriptionKind,
    UserAccount, VotingOption,
};
use crate::funnel::{EngagementDelta, FunnelCounts};
use crate::types::{Result, UsageKind};

/// Outcome of an atomic check-and-increment
#[derive(Debug, Clone, PartialEq)]
pub enum Consumption {
    /// Counter incremented; the account as it is afterwards
    Allowed(UserAccount),
    /// Limit reached; the account is unchanged
    Denied(UserAccount),
}

/// Premium period to write onto an account
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grant {
    pub kind: SubscriptionKind,
    pub expires: DateTime,
    pub now: DateTime,
}

impl Grant {
    /// Only applies while the trial is unused and the account is not premium
    pub fn trial(expires: DateTime, now: DateTime) -> Self {
        Self {
            kind: SubscriptionKind::Trial,
            expires,
            now,
        }
    }

    pub fn paid(expires: DateTime, now: DateTime) -> Self {
        Self {
            kind: SubscriptionKind::Paid,
            expires,
            now,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.kind == SubscriptionKind::Trial
    }

    /// Whether an account may receive this grant
    pub fn applies_to(&self, account: &UserAccount) -> bool {
        !self.is_trial() || (!account.trial_used && !account.is_premium)
    }

    pub fn apply(&self, account: &mut UserAccount) {
        account.is_premium = true;
        account.subscription_expires = Some(self.expires);
        account.subscription_kind = Some(self.kind);
        if self.is_trial() {
            account.trial_used = true;
        }
        account.reset_usage();
        account.last_active = Some(self.now);
    }
}

/// Activity bookkeeping applied to an existing account
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Touch {
    pub now: DateTime,
    /// Raised with max-merge; never lowers the stored step
    pub onboarding_step: Option<i32>,
    /// Record the first vote date if none is stored yet
    pub first_vote: bool,
}

impl Touch {
    pub fn at(now: DateTime) -> Self {
        Self {
            now,
            onboarding_step: None,
            first_vote: false,
        }
    }

    pub fn step(mut self, step: i32) -> Self {
        self.onboarding_step = Some(step);
        self
    }

    pub fn voted(mut self) -> Self {
        self.first_vote = true;
        self
    }

    pub fn apply(&self, account: &mut UserAccount) {
        account.last_active = Some(self.now);
        if let Some(step) = self.onboarding_step {
            account.onboarding_step = crate::funnel::onboarding::advance(account.onboarding_step, step);
        }
        if self.first_vote && account.first_vote_date.is_none() {
            account.first_vote_date = Some(self.now);
        }
    }
}

/// Profile fields supplied by the user
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    pub name: String,
    pub mobile: Option<String>,
    pub location: Option<String>,
}

/// Filter for report listings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFilter {
    pub category: Option<String>,
    pub featured_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub count: u64,
}

/// Summary of the sample report catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportStats {
    pub total_reports: u64,
    pub featured_reports: u64,
    /// Rounded to one decimal place
    pub average_purity_score: f64,
    pub safety_distribution: BTreeMap<String, u64>,
}

/// Summary of the voting ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VotingTotals {
    pub total_votes: u64,
    pub total_funding_raised: f64,
    pub active_voting_options: u64,
    pub unique_voters: u64,
}

#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    async fn find(&self, email: &str) -> Result<Option<UserAccount>>;
    /// Insert unless present. Returns the stored account and whether it was created.
    async fn create_if_absent(&self, account: UserAccount) -> Result<(UserAccount, bool)>;
    /// Atomically check the limit for `kind` and increment on success
    async fn try_consume(&self, email: &str, kind: UsageKind, now: DateTime) -> Result<Consumption>;
    /// Give back one unit of `kind` that was consumed for an action that then failed.
    /// Never takes a counter below zero.
    async fn refund(&self, email: &str, kind: UsageKind) -> Result<()>;
    /// Lazily expire a lapsed premium period, returning the current account
    async fn expire_if_due(&self, email: &str, now: DateTime) -> Result<Option<UserAccount>>;
    /// Apply a premium grant. `None` when the account is missing or the grant does not apply.
    async fn grant_subscription(&self, email: &str, grant: Grant) -> Result<Option<UserAccount>>;
    async fn touch(&self, email: &str, touch: Touch) -> Result<Option<UserAccount>>;
    async fn update_profile(
        &self,
        email: &str,
        profile: ProfileUpdate,
        now: DateTime,
    ) -> Result<Option<UserAccount>>;
    async fn count(&self) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait EngagementStore: Send + Sync {
    async fn find(&self, email: &str) -> Result<Option<EngagementRecord>>;
    /// Upsert the record, applying flag, page-view and action-log changes in one write
    async fn record(&self, delta: &EngagementDelta, now: DateTime) -> Result<()>;
    async fn funnel_counts(&self) -> Result<FunnelCounts>;
}

#[async_trait::async_trait]
pub trait VotingStore: Send + Sync {
    /// Options by descending vote count
    async fn list(&self, status: Option<OptionStatus>, limit: Option<i64>) -> Result<Vec<VotingOption>>;
    async fn find(&self, id: ObjectId) -> Result<Option<VotingOption>>;
    /// Add a voter and one vote together. `None` when the email already voted or the option is gone.
    async fn add_voter(&self, id: ObjectId, email: &str) -> Result<Option<VotingOption>>;
    async fn voted_by(&self, email: &str) -> Result<Vec<VotingOption>>;
    async fn totals(&self) -> Result<VotingTotals>;
    async fn insert_many(&self, options: Vec<VotingOption>) -> Result<usize>;
    async fn count(&self) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait ReportStore: Send + Sync {
    /// Newest first
    async fn list(&self, filter: &ReportFilter, limit: i64) -> Result<Vec<SampleReport>>;
    async fn find(&self, id: ObjectId) -> Result<Option<SampleReport>>;
    /// Featured reports by descending purity
    async fn featured(&self, limit: i64) -> Result<Vec<SampleReport>>;
    /// Category counts, largest first
    async fn categories(&self) -> Result<Vec<CategoryCount>>;
    async fn stats(&self) -> Result<ReportStats>;
    async fn insert_many(&self, reports: Vec<SampleReport>) -> Result<usize>;
    async fn count(&self) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: PendingOrder) -> Result<()>;
    async fn find(&self, order_id: &str) -> Result<Option<PendingOrder>>;
    /// Move a pending order to completed. `None` unless it was pending.
    async fn complete(
        &self,
        order_id: &str,
        payment_id: &str,
        now: DateTime,
    ) -> Result<Option<PendingOrder>>;
}

/// All stores a request may touch
#[derive(Clone)]
pub struct Stores {
    pub accounts: Arc<dyn AccountStore>,
    pub engagement: Arc<dyn EngagementStore>,
    pub voting: Arc<dyn VotingStore>,
    pub reports: Arc<dyn ReportStore>,
    pub orders: Arc<dyn OrderStore>,
}

impl Stores {
    /// MongoDB-backed stores; opening the collections applies their indexes
    pub async fn mongo(client: &MongoClient) -> Result<Self> {
        let store = Arc::new(MongoStore::open(client).await?);
        Ok(Self::shared(store))
    }

    /// Fresh in-memory stores
    pub fn memory() -> Self {
        Self::shared(Arc::new(MemoryStore::new()))
    }

    fn shared<S>(store: Arc<S>) -> Self
    where
        S: AccountStore + EngagementStore + VotingStore + ReportStore + OrderStore + 'static,
    {
        Self {
            accounts: store.clone(),
            engagement: store.clone(),
            voting: store.clone(),
            reports: store.clone(),
            orders: store,
        }
    }
}
