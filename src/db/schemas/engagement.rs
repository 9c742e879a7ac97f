//! Engagement record document schema
//!
//! Created lazily on the first tracked action for an email and never deleted.
//! The funnel flags are stored as top-level booleans so aggregation can sum
//! them directly.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::funnel::{FunnelFlags, FunnelStage};

/// Collection name for engagement records
pub const ENGAGEMENT_COLLECTION: &str = "user_engagement";

/// One entry in the append-only action log
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActionEvent {
    pub timestamp: DateTime,
    pub action: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Engagement document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EngagementRecord {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub email: String,

    /// Page name to view count
    #[serde(default)]
    pub page_views: BTreeMap<String, u32>,

    #[serde(default)]
    pub actions: Vec<ActionEvent>,

    #[serde(default)]
    pub viewed_samples: bool,
    #[serde(default)]
    pub understood_process: bool,
    #[serde(default)]
    pub cast_first_vote: bool,
    #[serde(default)]
    pub explored_dashboard: bool,
    #[serde(default)]
    pub hit_free_limit: bool,
    #[serde(default)]
    pub started_trial: bool,
    #[serde(default)]
    pub converted_to_paid: bool,
}

impl EngagementRecord {
    pub fn new(email: impl Into<String>, now: DateTime) -> Self {
        Self {
            email: email.into(),
            metadata: Metadata::at(now),
            ..Default::default()
        }
    }

    /// Funnel flags as a value
    pub fn flags(&self) -> FunnelFlags {
        let mut flags = FunnelFlags::default();
        for stage in FunnelStage::ALL {
            if self.flag(stage) {
                flags.mark(stage);
            }
        }
        flags
    }

    fn flag(&self, stage: FunnelStage) -> bool {
        match stage {
            FunnelStage::ViewedSamples => self.viewed_samples,
            FunnelStage::UnderstoodProcess => self.understood_process,
            FunnelStage::CastFirstVote => self.cast_first_vote,
            FunnelStage::ExploredDashboard => self.explored_dashboard,
            FunnelStage::HitFreeLimit => self.hit_free_limit,
            FunnelStage::StartedTrial => self.started_trial,
            FunnelStage::ConvertedToPaid => self.converted_to_paid,
        }
    }

    /// Raise a funnel flag. Flags are never lowered.
    pub fn mark(&mut self, stage: FunnelStage) {
        let flag = match stage {
            FunnelStage::ViewedSamples => &mut self.viewed_samples,
            FunnelStage::UnderstoodProcess => &mut self.understood_process,
            FunnelStage::CastFirstVote => &mut self.cast_first_vote,
            FunnelStage::ExploredDashboard => &mut self.explored_dashboard,
            FunnelStage::HitFreeLimit => &mut self.hit_free_limit,
            FunnelStage::StartedTrial => &mut self.started_trial,
            FunnelStage::ConvertedToPaid => &mut self.converted_to_paid,
        };
        *flag = true;
    }

    pub fn last_activity(&self) -> Option<DateTime> {
        self.metadata.updated_at
    }
}

impl IntoIndexes for EngagementRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
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
                doc! { "metadata.updated_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("updated_at_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for EngagementRecord {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
