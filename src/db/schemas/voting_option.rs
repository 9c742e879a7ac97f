//! Voting option document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::round1;

/// Collection name for voting options
pub const VOTING_OPTION_COLLECTION: &str = "voting_options";

/// Lifecycle of a testing proposal
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OptionStatus {
    #[default]
    Voting,
    Funded,
    Testing,
    Completed,
}

impl OptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voting => "voting",
            Self::Funded => "funded",
            Self::Testing => "testing",
            Self::Completed => "completed",
        }
    }

    /// Whether the proposal has moved past voting into a funded test
    pub fn influenced_test(&self) -> bool {
        !matches!(self, Self::Voting)
    }
}

impl fmt::Display for OptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voting" => Ok(Self::Voting),
            "funded" => Ok(Self::Funded),
            "testing" => Ok(Self::Testing),
            "completed" => Ok(Self::Completed),
            other => Err(format!("Unknown voting status: {}", other)),
        }
    }
}

/// Voting option document stored in MongoDB
///
/// `votes` and `voters` only ever grow together, one email and one vote at a time.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VotingOption {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub product_name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub votes: u32,

    #[serde(default)]
    pub funding_raised: f64,

    #[serde(default)]
    pub funding_target: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_test_date: Option<String>,

    #[serde(default)]
    pub status: OptionStatus,

    /// Distinct voter emails
    #[serde(default)]
    pub voters: BTreeSet<String>,
}

impl VotingOption {
    /// Funding progress as a percentage rounded to one decimal place
    pub fn funding_percentage(&self) -> f64 {
        if self.funding_target <= 0.0 {
            return 0.0;
        }
        round1(self.funding_raised / self.funding_target * 100.0)
    }

    pub fn id_hex(&self) -> String {
        self._id.map(|id| id.to_hex()).unwrap_or_default()
    }
}

impl IntoIndexes for VotingOption {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "status": 1 },
                Some(IndexOptions::builder().name("status_index".to_string()).build()),
            ),
            (
                doc! { "votes": -1 },
                Some(IndexOptions::builder().name("votes_index".to_string()).build()),
            ),
            // Voter lookups for per-user history
            (
                doc! { "voters": 1 },
                Some(IndexOptions::builder().name("voters_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for VotingOption {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funding_percentage() {
        let option = VotingOption {
            funding_raised: 12000.0,
            funding_target: 15000.0,
            ..Default::default()
        };
        assert_eq!(option.funding_percentage(), 80.0);

        let option = VotingOption {
            funding_raised: 6200.0,
            funding_target: 0.0,
            ..Default::default()
        };
        assert_eq!(option.funding_percentage(), 0.0);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("testing".parse::<OptionStatus>().unwrap(), OptionStatus::Testing);
        assert!("archived".parse::<OptionStatus>().is_err());
        assert!(!OptionStatus::Voting.influenced_test());
        assert!(OptionStatus::Completed.influenced_test());
    }
}
