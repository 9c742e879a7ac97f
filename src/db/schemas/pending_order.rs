//! Pending payment order document schema
//!
//! Bridges payment-intent creation and its verification callback. An order
//! moves from pending to completed exactly once.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for pending orders
pub const PENDING_ORDER_COLLECTION: &str = "pending_orders";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Completed,
}

/// Pending order document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PendingOrder {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Generated order identifier handed to the payment provider
    pub order_id: String,
    pub email: String,
    pub tier_id: String,

    /// Whole currency units
    pub amount: u32,
    pub currency: String,

    /// Premium days granted on completion
    pub duration_days: i64,

    #[serde(default)]
    pub status: OrderStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime>,
}

impl IntoIndexes for PendingOrder {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "order_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("order_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "email": 1 },
                Some(IndexOptions::builder().name("email_index".to_string()).build()),
            ),
        ]
    }
}

impl MutMetadata for PendingOrder {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
