//! User account document schema
//!
//! Per-email freemium state: usage counters and limits, the premium flag
//! with its expiry, the one-shot trial marker and onboarding progress.
//!
//! Every field carries a serde default, so documents written before a field
//! existed are normalized once when materialized and the policy code never
//! has to re-derive a default.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::config::{DefaultLimits, PolicyConfig};
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::funnel::onboarding;
use crate::types::UsageKind;

/// Collection name for accounts
pub const USER_COLLECTION: &str = "users";

/// How the current premium period was entered
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Trial,
    Paid,
}

/// Account document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserAccount {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    /// Natural key shared by every collection
    pub email: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default)]
    pub report_views_used: u32,

    #[serde(default = "default_report_views_limit")]
    pub report_views_limit: u32,

    #[serde(default)]
    pub votes_cast: u32,

    #[serde(default = "default_votes_limit")]
    pub votes_limit: u32,

    #[serde(default)]
    pub forum_posts: u32,

    #[serde(default = "default_forum_posts_limit")]
    pub forum_posts_limit: u32,

    #[serde(default)]
    pub is_premium: bool,

    /// Set while premium; cleared on expiry
    #[serde(default)]
    pub subscription_expires: Option<DateTime>,

    #[serde(default)]
    pub subscription_kind: Option<SubscriptionKind>,

    /// Set exactly once, on the first trial activation
    #[serde(default)]
    pub trial_used: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_vote_date: Option<DateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime>,

    /// Never decreases; the highest step observed wins
    #[serde(default = "default_onboarding_step")]
    pub onboarding_step: i32,
}

fn default_role() -> String {
    "member".to_string()
}

fn default_report_views_limit() -> u32 {
    DefaultLimits::default().report_views
}

fn default_votes_limit() -> u32 {
    DefaultLimits::default().votes
}

fn default_forum_posts_limit() -> u32 {
    DefaultLimits::default().forum_posts
}

fn default_onboarding_step() -> i32 {
    onboarding::LANDING
}

impl UserAccount {
    /// Create a new free account with the configured limits
    pub fn new(email: impl Into<String>, policy: &PolicyConfig, now: DateTime) -> Self {
        let limits = policy.limits;
        Self {
            _id: None,
            metadata: Metadata::at(now),
            email: email.into(),
            name: None,
            mobile: None,
            location: None,
            role: default_role(),
            report_views_used: 0,
            report_views_limit: limits.report_views,
            votes_cast: 0,
            votes_limit: limits.votes,
            forum_posts: 0,
            forum_posts_limit: limits.forum_posts,
            is_premium: false,
            subscription_expires: None,
            subscription_kind: None,
            trial_used: false,
            first_vote_date: None,
            last_active: Some(now),
            onboarding_step: onboarding::LANDING,
        }
    }

    /// Set the initial onboarding step
    pub fn with_onboarding_step(mut self, step: i32) -> Self {
        self.onboarding_step = step;
        self
    }

    /// Current counter for a metered action
    pub fn used(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::ReportView => self.report_views_used,
            UsageKind::Vote => self.votes_cast,
            UsageKind::ForumPost => self.forum_posts,
        }
    }

    /// Limit for a metered action
    pub fn limit(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::ReportView => self.report_views_limit,
            UsageKind::Vote => self.votes_limit,
            UsageKind::ForumPost => self.forum_posts_limit,
        }
    }

    pub fn used_mut(&mut self, kind: UsageKind) -> &mut u32 {
        match kind {
            UsageKind::ReportView => &mut self.report_views_used,
            UsageKind::Vote => &mut self.votes_cast,
            UsageKind::ForumPost => &mut self.forum_posts,
        }
    }

    pub fn reset_usage(&mut self) {
        for kind in UsageKind::ALL {
            *self.used_mut(kind) = 0;
        }
    }

    pub fn member_since(&self) -> Option<DateTime> {
        self.metadata.created_at
    }

    pub fn profile_complete(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

impl Default for UserAccount {
    fn default() -> Self {
        Self::new(String::new(), &PolicyConfig::default(), DateTime::from_millis(0))
    }
}

impl IntoIndexes for UserAccount {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on email
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("email_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "metadata.created_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("created_at_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserAccount {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_uses_configured_limits() {
        let mut policy = PolicyConfig::default();
        policy.limits.votes = 9;
        let now = DateTime::from_millis(1_700_000_000_000);

        let account = UserAccount::new("a@x.com", &policy, now);
        assert_eq!(account.votes_limit, 9);
        assert_eq!(account.report_views_limit, 3);
        assert_eq!(account.used(UsageKind::Vote), 0);
        assert!(!account.is_premium);
        assert!(!account.trial_used);
        assert_eq!(account.member_since(), Some(now));
    }

    #[test]
    fn test_sparse_document_is_normalized() {
        let sparse = doc! { "email": "old@x.com", "votes_cast": 2 };
        let account: UserAccount = bson::from_document(sparse).unwrap();

        assert_eq!(account.votes_cast, 2);
        assert_eq!(account.votes_limit, 5);
        assert_eq!(account.report_views_limit, 3);
        assert_eq!(account.forum_posts_limit, 1);
        assert_eq!(account.role, "member");
        assert_eq!(account.onboarding_step, onboarding::LANDING);
        assert!(account.subscription_expires.is_none());
    }

    #[test]
    fn test_reset_usage() {
        let mut account = UserAccount::default();
        account.report_views_used = 3;
        account.votes_cast = 4;
        account.forum_posts = 1;
        account.reset_usage();
        for kind in UsageKind::ALL {
            assert_eq!(account.used(kind), 0);
        }
    }
}
