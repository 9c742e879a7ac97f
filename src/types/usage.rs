//! Metered action kinds and remaining-quota values

use serde::{Serialize, Serializer};
use std::fmt;

/// A freemium-metered action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageKind {
    ReportView,
    Vote,
    ForumPost,
}

impl UsageKind {
    pub const ALL: [UsageKind; 3] = [Self::ReportView, Self::Vote, Self::ForumPost];

    /// Counter field on the account document
    pub fn used_field(&self) -> &'static str {
        match self {
            Self::ReportView => "report_views_used",
            Self::Vote => "votes_cast",
            Self::ForumPost => "forum_posts",
        }
    }

    /// Limit field on the account document
    pub fn limit_field(&self) -> &'static str {
        match self {
            Self::ReportView => "report_views_limit",
            Self::Vote => "votes_limit",
            Self::ForumPost => "forum_posts_limit",
        }
    }

    /// Key used in usage breakdowns
    pub fn key(&self) -> &'static str {
        match self {
            Self::ReportView => "report_views",
            Self::Vote => "votes",
            Self::ForumPost => "forum_posts",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ReportView => "Report view",
            Self::Vote => "Vote",
            Self::ForumPost => "Forum post",
        }
    }

    pub fn limit_error_code(&self) -> &'static str {
        match self {
            Self::ReportView => "view_limit_reached",
            Self::Vote => "vote_limit_reached",
            Self::ForumPost => "forum_post_limit_reached",
        }
    }
}

impl fmt::Display for UsageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Remaining quota: a count for free accounts, unbounded for premium ones.
///
/// Serializes as a number or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Count(u32),
    Unlimited,
}

impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Count(n) => serializer.serialize_u32(*n),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}
