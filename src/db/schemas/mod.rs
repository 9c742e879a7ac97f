//! Database schemas for ChoosePure
//!
//! Defines MongoDB document structures for accounts, engagement records,
//! voting options, sample reports and pending payment orders.

mod account;
mod engagement;
mod metadata;
mod pending_order;
mod sample_report;
mod voting_option;

pub use account::{SubscriptionKind, UserAccount, USER_COLLECTION};
pub use engagement::{ActionEvent, EngagementRecord, ENGAGEMENT_COLLECTION};
pub use metadata::Metadata;
pub use pending_order::{OrderStatus, PendingOrder, PENDING_ORDER_COLLECTION};
pub use sample_report::{ReportParameter, SafetyStatus, SampleReport, SAMPLE_REPORT_COLLECTION};
pub use voting_option::{OptionStatus, VotingOption, VOTING_OPTION_COLLECTION};
