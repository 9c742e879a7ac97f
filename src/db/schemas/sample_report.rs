//! Sample report document schema
//!
//! Reports are an immutable catalog. Detailed lab parameters and the lab
//! report link are only shown to premium accounts.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for sample reports
pub const SAMPLE_REPORT_COLLECTION: &str = "sample_reports";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SafetyStatus {
    #[default]
    Safe,
    Caution,
    Avoid,
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Safe => "Safe",
            Self::Caution => "Caution",
            Self::Avoid => "Avoid",
        })
    }
}

/// One measured lab parameter
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReportParameter {
    pub name: String,
    pub measured: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permitted: Option<String>,
    pub within_limit: bool,
}

/// Sample report document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SampleReport {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub product_name: String,
    pub brand: String,
    pub category: String,

    /// 0 to 10
    pub purity_score: f64,

    pub test_date: String,
    pub tested_by: String,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub key_findings: Vec<String>,

    #[serde(default)]
    pub safety_status: SafetyStatus,

    #[serde(default)]
    pub detailed_parameters: Vec<ReportParameter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_report_url: Option<String>,

    #[serde(default)]
    pub is_featured: bool,
}

impl SampleReport {
    pub fn id_hex(&self) -> String {
        self._id.map(|id| id.to_hex()).unwrap_or_default()
    }

    pub fn has_detailed_parameters(&self) -> bool {
        !self.detailed_parameters.is_empty()
    }

    /// Headline finding for compact listings
    pub fn key_finding(&self) -> &str {
        self.key_findings
            .first()
            .map(String::as_str)
            .unwrap_or("Lab tested for safety")
    }

    /// Check catalog invariants before insertion
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=10.0).contains(&self.purity_score) {
            return Err(format!(
                "{}: purity score {} is outside 0-10",
                self.product_name, self.purity_score
            ));
        }
        if self.product_name.trim().is_empty() {
            return Err("Report product name is empty".to_string());
        }
        Ok(())
    }
}

impl IntoIndexes for SampleReport {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "category": 1 },
                Some(IndexOptions::builder().name("category_index".to_string()).build()),
            ),
            (
                doc! { "is_featured": 1 },
                Some(IndexOptions::builder().name("featured_index".to_string()).build()),
            ),
            (
                doc! { "metadata.created_at": -1 },
                Some(IndexOptions::builder().name("created_at_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for SampleReport {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
