//! ChoosePure - freemium backend for crowd-funded product testing
//!
//! Consumers browse lab-tested sample reports, vote on which products get
//! tested next and upgrade from a metered free tier to premium.
//!
//! ## Layers
//!
//! - **Policy**: usage limits for report views, votes and forum posts
//! - **Subscription**: trial and paid lifecycle with lazy expiry
//! - **Funnel**: onboarding stages and conversion statistics
//! - **Store**: MongoDB (or in-memory) persistence with atomic guarded updates
//! - **Services**: one operation chain per API call
//! - **Routes/Server**: hyper HTTP surface under `/api/v2`

pub mod config;
pub mod db;
pub mod funnel;
pub mod logging;
pub mod policy;
pub mod routes;
pub mod seed;
pub mod server;
pub mod services;
pub mod store;
pub mod subscription;
pub mod types;
pub mod validation;

pub use config::{Args, PolicyConfig};
pub use server::{run, AppState};
pub use services::ServiceContext;
pub use types::{AppError, Result};
