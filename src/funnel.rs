//! Funnel state machine
//!
//! Maps tracked action names onto seven monotonic funnel stages, page-view
//! counters and an append-only action log. Also owns the onboarding-step
//! progression and the aggregate conversion statistics.

use bson::DateTime;
use serde::Serialize;

use crate::db::{ActionEvent, EngagementRecord};
use crate::validation;

/// Onboarding steps stored on the account. Higher is further along.
pub mod onboarding {
    pub const LANDING: i32 = 1;
    pub const SIGNED_UP: i32 = 2;
    pub const VOTED: i32 = 3;
    pub const PROFILE_COMPLETE: i32 = 4;
    pub const COMPLETED: i32 = 999;

    /// Highest step reached wins
    pub fn advance(current: i32, reached: i32) -> i32 {
        current.max(reached)
    }
}

/// Funnel stages in conversion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FunnelStage {
    ViewedSamples,
    UnderstoodProcess,
    CastFirstVote,
    ExploredDashboard,
    HitFreeLimit,
    StartedTrial,
    ConvertedToPaid,
}

impl FunnelStage {
    pub const ALL: [FunnelStage; 7] = [
        Self::ViewedSamples,
        Self::UnderstoodProcess,
        Self::CastFirstVote,
        Self::ExploredDashboard,
        Self::HitFreeLimit,
        Self::StartedTrial,
        Self::ConvertedToPaid,
    ];

    /// Stage raised by a tracked action name, if any
    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.action() == action)
    }

    /// Action name that raises this stage
    pub fn action(&self) -> &'static str {
        match self {
            Self::ViewedSamples => "view_sample_reports",
            Self::UnderstoodProcess => "view_how_it_works",
            Self::CastFirstVote => "cast_vote",
            Self::ExploredDashboard => "view_dashboard",
            Self::HitFreeLimit => "hit_free_limit",
            Self::StartedTrial => "start_trial",
            Self::ConvertedToPaid => "convert_to_paid",
        }
    }

    /// Document field holding the flag
    pub fn field(&self) -> &'static str {
        match self {
            Self::ViewedSamples => "viewed_samples",
            Self::UnderstoodProcess => "understood_process",
            Self::CastFirstVote => "cast_first_vote",
            Self::ExploredDashboard => "explored_dashboard",
            Self::HitFreeLimit => "hit_free_limit",
            Self::StartedTrial => "started_trial",
            Self::ConvertedToPaid => "converted_to_paid",
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

/// Set of reached funnel stages. Stages can be added, never removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunnelFlags(u8);

impl FunnelFlags {
    pub fn mark(&mut self, stage: FunnelStage) {
        self.0 |= stage.bit();
    }

    pub fn is_set(&self, stage: FunnelStage) -> bool {
        self.0 & stage.bit() != 0
    }

    pub fn completed_count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Furthest stage reached, regardless of gaps before it
    pub fn highest_stage(&self) -> Option<FunnelStage> {
        FunnelStage::ALL.into_iter().rev().find(|s| self.is_set(*s))
    }
}

/// One tracked action, ready to be applied to an engagement record
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementDelta {
    pub email: String,
    pub action: String,
    pub details: serde_json::Map<String, serde_json::Value>,
    /// Flag raised by this action
    pub stage: Option<FunnelStage>,
    /// Sanitized page key to count
    pub page: Option<String>,
}

impl EngagementDelta {
    /// Derive the stage from the action name and the page from `details.page`
    pub fn for_action(
        email: impl Into<String>,
        action: impl Into<String>,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let action = action.into();
        let page = details
            .get("page")
            .and_then(serde_json::Value::as_str)
            .and_then(validation::page_key);
        Self {
            email: email.into(),
            stage: FunnelStage::from_action(&action),
            action,
            details,
            page,
        }
    }

    /// Action without details
    pub fn bare(email: impl Into<String>, action: impl Into<String>) -> Self {
        Self::for_action(email, action, serde_json::Map::new())
    }

    /// Raise a stage other than the one the action name maps to
    pub fn raising(mut self, stage: FunnelStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Apply to an in-memory record
    pub fn apply(&self, record: &mut EngagementRecord, now: DateTime) {
        record.actions.push(ActionEvent {
            timestamp: now,
            action: self.action.clone(),
            details: self.details.clone(),
        });
        if let Some(stage) = self.stage {
            record.mark(stage);
        }
        if let Some(page) = &self.page {
            *record.page_views.entry(page.clone()).or_insert(0) += 1;
        }
        if record.metadata.created_at.is_none() {
            record.metadata.created_at = Some(now);
        }
        record.metadata.updated_at = Some(now);
    }
}

/// Per-stage totals across all engagement records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunnelCounts {
    pub total_users: u64,
    pub stages: [u64; 7],
}

impl FunnelCounts {
    pub fn at(&self, stage: FunnelStage) -> u64 {
        self.stages[stage as usize]
    }

    pub fn add(&mut self, flags: FunnelFlags) {
        self.total_users += 1;
        for stage in FunnelStage::ALL {
            if flags.is_set(stage) {
                self.stages[stage as usize] += 1;
            }
        }
    }

    pub fn conversion_rates(&self) -> ConversionRates {
        use FunnelStage::*;
        ConversionRates {
            landing_to_samples: rate(self.at(ViewedSamples), self.total_users),
            samples_to_process: rate(self.at(UnderstoodProcess), self.at(ViewedSamples)),
            process_to_vote: rate(self.at(CastFirstVote), self.at(UnderstoodProcess)),
            vote_to_dashboard: rate(self.at(ExploredDashboard), self.at(CastFirstVote)),
            limit_to_trial: rate(self.at(StartedTrial), self.at(HitFreeLimit)),
            trial_to_paid: rate(self.at(ConvertedToPaid), self.at(StartedTrial)),
        }
    }
}

/// Percentage of `count` over `prior`, 0 when `prior` is 0
pub fn rate(count: u64, prior: u64) -> f64 {
    if prior == 0 {
        return 0.0;
    }
    count as f64 / prior as f64 * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConversionRates {
    pub landing_to_samples: f64,
    pub samples_to_process: f64,
    pub process_to_vote: f64,
    pub vote_to_dashboard: f64,
    pub limit_to_trial: f64,
    pub trial_to_paid: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JourneyStep {
    pub step: FunnelStage,
    pub completed: bool,
}

/// Journey through the seven stages with overall progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JourneyProgress {
    pub journey_steps: Vec<JourneyStep>,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub progress_percentage: f64,
    pub highest_stage: Option<FunnelStage>,
}

pub fn journey(flags: FunnelFlags) -> JourneyProgress {
    let journey_steps: Vec<JourneyStep> = FunnelStage::ALL
        .into_iter()
        .map(|step| JourneyStep {
            step,
            completed: flags.is_set(step),
        })
        .collect();
    let completed_steps = flags.completed_count();
    let total_steps = journey_steps.len();

    JourneyProgress {
        progress_percentage: rate(completed_steps as u64, total_steps as u64),
        journey_steps,
        completed_steps,
        total_steps,
        highest_stage: flags.highest_stage(),
    }
}
