//! ChoosePure API server

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use choosepure::{
    config::Args,
    db::MongoClient,
    logging::EventLogger,
    seed,
    server::{self, AppState, StoreBackend},
    services::ServiceContext,
    store::Stores,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("choosepure={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let policy = args.policy_config();

    info!("======================================");
    info!("  ChoosePure API v{}", env!("CARGO_PKG_VERSION"));
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} / {}", args.mongodb_uri, args.mongodb_db);
    info!(
        "Free limits: {} report views, {} votes, {} forum posts",
        policy.limits.report_views, policy.limits.votes, policy.limits.forum_posts
    );
    info!(
        "Trial: {} days, paid: {} days, annual: {} days",
        policy.trial_days, policy.paid_days, policy.annual_days
    );
    info!("======================================");

    // Connect to MongoDB (optional in dev mode)
    let (stores, backend) = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            (Stores::mongo(&client).await?, StoreBackend::Mongo)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                (Stores::memory(), StoreBackend::Memory)
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    if args.seed_catalog {
        let outcome = seed::seed_catalog(&stores, bson::DateTime::now()).await?;
        if outcome == seed::SeedOutcome::default() {
            info!("Catalog already present, nothing seeded");
        }
    }

    let events = EventLogger::new();
    if let Some(path) = &args.events_log {
        if let Err(e) = events.init_file(path.clone()).await {
            warn!("Conversion event log disabled: {}", e);
        }
    }

    let ctx = ServiceContext::new(stores, policy, events);
    let state = Arc::new(AppState::new(ctx, backend, args.request_timeout()));

    server::run(args.listen, state, server::shutdown_signal()).await?;
    Ok(())
}
