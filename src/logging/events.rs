//! Conversion event log
//!
//! Writes one JSON object per line for each signup, vote, limit hit, trial,
//! payment and onboarding completion. Write failures are logged and never
//! fail the request that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::types::UsageKind;

/// Conversion event types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Account created
    Signup,
    /// Vote recorded on an option
    VoteCast,
    /// Metered action denied at the free limit
    LimitHit,
    TrialStarted,
    PaymentCompleted,
    OnboardingCompleted,
}

/// One line of the conversion log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ConversionEvent {
    pub fn new(event_type: EventType, email: &str, at: bson::DateTime) -> Self {
        Self {
            timestamp: at.to_chrono(),
            event_type,
            email: email.to_string(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Logger that appends conversion events to a JSONL file.
///
/// Without [`EventLogger::init_file`] events are dropped.
#[derive(Clone, Default)]
pub struct EventLogger {
    inner: Arc<Mutex<EventLoggerInner>>,
}

#[derive(Default)]
struct EventLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl EventLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Conversion event log initialized to {}", path.display());
        Ok(())
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    /// Log a conversion event
    pub async fn log(&self, event: ConversionEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize conversion event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write conversion event: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush conversion log: {}", e);
            }
        }
    }

    pub async fn log_signup(&self, email: &str, source: &str, at: bson::DateTime) {
        let event = ConversionEvent::new(EventType::Signup, email, at)
            .with_detail(serde_json::json!({ "source": source }));
        self.log(event).await;
    }

    pub async fn log_limit_hit(&self, email: &str, kind: UsageKind, used: u32, limit: u32, at: bson::DateTime) {
        let event = ConversionEvent::new(EventType::LimitHit, email, at).with_detail(serde_json::json!({
            "limit_type": kind.key(),
            "used": used,
            "limit": limit,
        }));
        self.log(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn at() -> bson::DateTime {
        bson::DateTime::from_millis(1_700_000_000_000)
    }

    #[test]
    fn test_event_serialization() {
        let event = ConversionEvent::new(EventType::VoteCast, "a@x.com", at())
            .with_detail(serde_json::json!({ "product": "Maggi Noodles" }));

        let jsonl = event.to_jsonl().unwrap();
        assert!(jsonl.contains("vote_cast"));
        assert!(jsonl.contains("a@x.com"));
        assert!(jsonl.contains("Maggi Noodles"));
    }

    #[test]
    fn test_detail_is_optional() {
        let jsonl = ConversionEvent::new(EventType::TrialStarted, "a@x.com", at())
            .to_jsonl()
            .unwrap();
        assert!(jsonl.contains("trial_started"));
        assert!(!jsonl.contains("detail"));
    }

    #[tokio::test]
    async fn test_events_are_appended_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversions.jsonl");

        let logger = EventLogger::new();
        logger.init_file(path.clone()).await.unwrap();
        logger.log_signup("a@x.com", "cast_vote", at()).await;
        logger
            .log_limit_hit("a@x.com", UsageKind::ReportView, 3, 3, at())
            .await;

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let second: ConversionEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.event_type, EventType::LimitHit);
        assert_eq!(second.detail.unwrap()["limit_type"], "report_views");
    }

    #[tokio::test]
    async fn test_disabled_logger_drops_events() {
        let logger = EventLogger::new();
        logger.log_signup("a@x.com", "quick_signup", at()).await;
        assert!(logger.path().await.is_none());
    }
}
