//! Database layer for ChoosePure
//!
//! MongoDB client plus the document schemas for accounts, engagement,
//! voting options, sample reports and pending orders.

pub mod mongo;
pub mod schemas;

pub use mongo::{MongoClient, MongoCollection};
pub use schemas::{
    ActionEvent, EngagementRecord, Metadata, OptionStatus, OrderStatus, PendingOrder,
    ReportParameter, SafetyStatus, SampleReport, SubscriptionKind, UserAccount, VotingOption,
};

/// Format a BSON timestamp for JSON responses
pub fn rfc3339(dt: bson::DateTime) -> String {
    dt.to_chrono().to_rfc3339()
}
