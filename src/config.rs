//! Configuration for ChoosePure
//!
//! CLI arguments and environment variable handling using clap. The freemium
//! thresholds live in [`PolicyArgs`] and are resolved once into a
//! [`PolicyConfig`] that the policy, subscription and service layers read.

use clap::{Args as ClapArgs, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::UsageKind;

/// ChoosePure - freemium backend for crowd-funded product testing
#[derive(Parser, Debug, Clone)]
#[command(name = "choosepure")]
#[command(about = "Freemium backend for crowd-funded product testing")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8001")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGO_URL", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "DB_NAME", default_value = "choosepure_simplified")]
    pub mongodb_db: String,

    /// Enable development mode (falls back to the in-memory store when MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Seed the sample report and voting catalogs when they are empty
    #[arg(long, env = "SEED_CATALOG", default_value = "true", action = clap::ArgAction::Set)]
    pub seed_catalog: bool,

    /// Optional JSONL file for conversion events
    #[arg(long, env = "EVENTS_LOG")]
    pub events_log: Option<PathBuf>,

    /// Freemium policy thresholds
    #[command(flatten)]
    pub policy: PolicyArgs,
}

/// Freemium policy thresholds
#[derive(ClapArgs, Debug, Clone)]
pub struct PolicyArgs {
    /// Fraction of a limit at which usage is classified as a warning
    #[arg(long, env = "WARNING_RATIO", default_value = "0.8")]
    pub warning_ratio: f64,

    /// Recorded actions needed before the engagement-reward prompt is offered
    #[arg(long, env = "ENGAGEMENT_REWARD_ACTIONS", default_value = "10")]
    pub engagement_reward_actions: usize,

    /// Discount offered by the engagement-reward prompt
    #[arg(long, env = "ENGAGEMENT_DISCOUNT_PERCENT", default_value = "50")]
    pub engagement_discount_percent: u32,

    /// Trial length in days
    #[arg(long, env = "TRIAL_DAYS", default_value = "7")]
    pub trial_days: i64,

    /// Monthly paid subscription length in days
    #[arg(long, env = "PAID_DAYS", default_value = "30")]
    pub paid_days: i64,

    /// Annual paid subscription length in days
    #[arg(long, env = "ANNUAL_DAYS", default_value = "365")]
    pub annual_days: i64,

    /// Free report views per account
    #[arg(long, env = "REPORT_VIEWS_LIMIT", default_value = "3")]
    pub report_views_limit: u32,

    /// Free votes per account
    #[arg(long, env = "VOTES_LIMIT", default_value = "5")]
    pub votes_limit: u32,

    /// Free forum posts per account
    #[arg(long, env = "FORUM_POSTS_LIMIT", default_value = "1")]
    pub forum_posts_limit: u32,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let policy = &self.policy;

        if !(policy.warning_ratio > 0.0 && policy.warning_ratio <= 1.0) {
            return Err("WARNING_RATIO must be in (0, 1]".to_string());
        }

        if policy.trial_days <= 0 || policy.paid_days <= 0 || policy.annual_days <= 0 {
            return Err("Subscription durations must be positive".to_string());
        }

        if policy.report_views_limit == 0 || policy.votes_limit == 0 || policy.forum_posts_limit == 0
        {
            return Err("Free usage limits must be at least 1".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be positive".to_string());
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolve the policy thresholds
    pub fn policy_config(&self) -> PolicyConfig {
        let p = &self.policy;
        PolicyConfig {
            warning_ratio: p.warning_ratio,
            engagement_reward_actions: p.engagement_reward_actions,
            engagement_discount_percent: p.engagement_discount_percent,
            trial_days: p.trial_days,
            paid_days: p.paid_days,
            annual_days: p.annual_days,
            limits: DefaultLimits {
                report_views: p.report_views_limit,
                votes: p.votes_limit,
                forum_posts: p.forum_posts_limit,
            },
        }
    }
}

/// Limits given to a freshly created account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultLimits {
    pub report_views: u32,
    pub votes: u32,
    pub forum_posts: u32,
}

impl DefaultLimits {
    pub fn for_kind(&self, kind: UsageKind) -> u32 {
        match kind {
            UsageKind::ReportView => self.report_views,
            UsageKind::Vote => self.votes,
            UsageKind::ForumPost => self.forum_posts,
        }
    }
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            report_views: 3,
            votes: 5,
            forum_posts: 1,
        }
    }
}

/// Resolved freemium thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub warning_ratio: f64,
    pub engagement_reward_actions: usize,
    pub engagement_discount_percent: u32,
    pub trial_days: i64,
    pub paid_days: i64,
    pub annual_days: i64,
    pub limits: DefaultLimits,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            warning_ratio: 0.8,
            engagement_reward_actions: 10,
            engagement_discount_percent: 50,
            trial_days: 7,
            paid_days: 30,
            annual_days: 365,
            limits: DefaultLimits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_default() {
        let args = Args::parse_from(["choosepure"]);
        assert!(args.validate().is_ok());
        assert_eq!(args.policy_config(), PolicyConfig::default());
        assert_eq!(args.listen.port(), 8001);
        assert_eq!(args.mongodb_db, "choosepure_simplified");
        assert!(args.seed_catalog);
        assert!(args.events_log.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "choosepure",
            "--votes-limit",
            "10",
            "--warning-ratio",
            "0.5",
            "--seed-catalog",
            "false",
        ]);
        let policy = args.policy_config();
        assert_eq!(policy.limits.votes, 10);
        assert_eq!(policy.limits.for_kind(UsageKind::Vote), 10);
        assert_eq!(policy.warning_ratio, 0.5);
        assert!(!args.seed_catalog);
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let args = Args::parse_from(["choosepure", "--warning-ratio", "1.5"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["choosepure", "--warning-ratio", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let args = Args::parse_from(["choosepure", "--forum-posts-limit", "0"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["choosepure", "--trial-days", "0"]);
        assert!(args.validate().is_err());
    }
}
