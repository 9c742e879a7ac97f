//! Usage-limit policy
//!
//! Decides whether a metered action (report view, vote, forum post) is
//! allowed for an account and how much quota remains. Active premium
//! accounts are never limited. Free accounts may use an action while
//! `used < limit`, so the use that brings the counter up to the limit is
//! the last permitted one.
//!
//! Everything here is pure. The stores apply [`record_use`]
//! inside a single atomic update so concurrent requests for the same email
//! cannot both slip under the limit.

use bson::DateTime;
use serde::Serialize;

use crate::config::PolicyConfig;
use crate::db::UserAccount;
use crate::subscription;
use crate::types::{AppError, Remaining, Result, UsageKind};

/// How close an account is to a limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    Ok,
    /// Within the warning band below the limit
    Warning,
    Exhausted,
}

/// Outcome of evaluating one metered action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageDecision {
    pub kind_key: &'static str,
    pub allowed: bool,
    pub used: u32,
    pub limit: u32,
    pub remaining: Remaining,
    pub level: UsageLevel,
    pub premium: bool,
}

impl UsageDecision {
    /// Free accounts are nudged once they have at most one use left
    pub fn show_upgrade_prompt(&self) -> bool {
        !self.premium && self.used.saturating_add(1) >= self.limit
    }

    pub fn into_limit_error(self, kind: UsageKind) -> AppError {
        AppError::LimitReached {
            kind,
            used: self.used,
            limit: self.limit,
        }
    }
}

/// Classify a counter against its limit
pub fn classify(used: u32, limit: u32, warning_ratio: f64) -> UsageLevel {
    if used >= limit {
        UsageLevel::Exhausted
    } else if f64::from(used) >= f64::from(limit) * warning_ratio {
        UsageLevel::Warning
    } else {
        UsageLevel::Ok
    }
}

/// Whether one more use of `kind` is allowed right now
pub fn permits(account: &UserAccount, kind: UsageKind, now: DateTime) -> bool {
    subscription::is_active(account, now) || account.used(kind) < account.limit(kind)
}

/// Current standing for `kind` without consuming anything
pub fn evaluate(
    account: &UserAccount,
    kind: UsageKind,
    policy: &PolicyConfig,
    now: DateTime,
) -> UsageDecision {
    let premium = subscription::is_active(account, now);
    let used = account.used(kind);
    let limit = account.limit(kind);

    let (remaining, level) = if premium {
        (Remaining::Unlimited, UsageLevel::Ok)
    } else {
        (
            Remaining::Count(limit.saturating_sub(used)),
            classify(used, limit, policy.warning_ratio),
        )
    };

    UsageDecision {
        kind_key: kind.key(),
        allowed: permits(account, kind, now),
        used,
        limit,
        remaining,
        level,
        premium,
    }
}

/// Apply one use of `kind` if it is permitted. Returns whether it was.
///
/// Free accounts spend one unit of quota. Active premium use is not
/// counted, so the free quota is intact again once the premium period ends.
pub fn record_use(account: &mut UserAccount, kind: UsageKind, now: DateTime) -> bool {
    if !permits(account, kind, now) {
        return false;
    }
    if !subscription::is_active(account, now) {
        let counter = account.used_mut(kind);
        *counter = counter.saturating_add(1);
    }
    true
}

/// Check the limit and, when allowed, record the use.
///
/// A denial leaves the account untouched and reports the current usage.
pub fn consume(
    account: &mut UserAccount,
    kind: UsageKind,
    policy: &PolicyConfig,
    now: DateTime,
) -> Result<UsageDecision> {
    if !record_use(account, kind, now) {
        return Err(evaluate(account, kind, policy, now).into_limit_error(kind));
    }
    Ok(evaluate(account, kind, policy, now))
}
