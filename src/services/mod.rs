//! Request-scoped operations
//!
//! Each public function is one straight-line chain: validate the typed
//! request, evaluate the policy or lifecycle rule against the current
//! account, apply the guarded store mutation, record engagement, return a
//! response shape. Stores and thresholds arrive through [`ServiceContext`];
//! the current time is passed in so the chains are deterministic under test.

pub mod onboarding;
pub mod reports;
pub mod subscriptions;
pub mod users;
pub mod voting;

use bson::DateTime;

use crate::config::PolicyConfig;
use crate::db::UserAccount;
use crate::funnel::EngagementDelta;
use crate::logging::EventLogger;
use crate::policy;
use crate::store::Stores;
use crate::types::{AppError, Resource, Result, UsageKind};
use tracing::info;

/// Everything an operation needs besides its request
#[derive(Clone)]
pub struct ServiceContext {
    pub stores: Stores,
    pub policy: PolicyConfig,
    pub events: EventLogger,
}

impl ServiceContext {
    pub fn new(stores: Stores, policy: PolicyConfig, events: EventLogger) -> Self {
        Self {
            stores,
            policy,
            events,
        }
    }

    /// In-memory stores, default thresholds, no event file
    pub fn in_memory() -> Self {
        Self::new(Stores::memory(), PolicyConfig::default(), EventLogger::new())
    }

    /// Load an account with lazy expiry applied
    pub(crate) async fn account(&self, email: &str, now: DateTime) -> Result<UserAccount> {
        self.stores
            .accounts
            .expire_if_due(email, now)
            .await?
            .ok_or(AppError::NotFound(Resource::Account))
    }

    pub(crate) async fn record(&self, delta: EngagementDelta, now: DateTime) -> Result<()> {
        self.stores.engagement.record(&delta, now).await
    }

    /// Record a denied metered action and build the error the caller returns
    pub(crate) async fn limit_hit(
        &self,
        account: &UserAccount,
        kind: UsageKind,
        details: serde_json::Map<String, serde_json::Value>,
        now: DateTime,
    ) -> Result<AppError> {
        let decision = policy::evaluate(account, kind, &self.policy, now);
        let delta = EngagementDelta::for_action(&account.email, "hit_free_limit", details)
            .detail("limit_type", kind.key());
        self.record(delta, now).await?;
        self.events
            .log_limit_hit(&account.email, kind, decision.used, decision.limit, now)
            .await;

        info!(
            email = %account.email,
            kind = %kind,
            used = decision.used,
            limit = decision.limit,
            "Free limit reached"
        );
        Ok(decision.into_limit_error(kind))
    }
}

/// Optional timestamp as RFC 3339 for JSON responses
pub(crate) fn timestamp(dt: Option<DateTime>) -> Option<String> {
    dt.map(crate::db::rfc3339)
}
