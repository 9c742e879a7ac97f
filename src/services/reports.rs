//! Sample report catalog

use bson::DateTime;
use serde::Serialize;

use super::{timestamp, ServiceContext};
use crate::db::{ReportParameter, SafetyStatus, SampleReport};
use crate::store::{CategoryCount, ReportFilter, ReportStats};
use crate::subscription;
use crate::types::{AppError, Resource, Result};
use crate::validation;

pub const DEFAULT_LIST_LIMIT: i64 = 10;
pub const DEFAULT_FEATURED_LIMIT: i64 = 3;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Clone, Default)]
pub struct ListReportsQuery {
    pub category: Option<String>,
    pub featured_only: bool,
    pub limit: Option<i64>,
}

/// Public view of a report, without premium-only fields
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub id: String,
    pub product_name: String,
    pub brand: String,
    pub category: String,
    pub purity_score: f64,
    pub test_date: String,
    pub tested_by: String,
    pub image: String,
    pub key_findings: Vec<String>,
    pub safety_status: SafetyStatus,
    pub is_featured: bool,
    pub created_at: Option<String>,
}

impl From<&SampleReport> for ReportSummary {
    fn from(report: &SampleReport) -> Self {
        Self {
            id: report.id_hex(),
            product_name: report.product_name.clone(),
            brand: report.brand.clone(),
            category: report.category.clone(),
            purity_score: report.purity_score,
            test_date: report.test_date.clone(),
            tested_by: report.tested_by.clone(),
            image: report.image.clone(),
            key_findings: report.key_findings.clone(),
            safety_status: report.safety_status,
            is_featured: report.is_featured,
            created_at: timestamp(report.metadata.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportList {
    pub reports: Vec<ReportSummary>,
    pub total: usize,
    pub category: Option<String>,
    pub featured_only: bool,
}

fn clamp_limit(limit: Option<i64>, default: i64) -> Result<i64> {
    match limit {
        None => Ok(default),
        Some(n) if (1..=MAX_LIMIT).contains(&n) => Ok(n),
        Some(n) => Err(AppError::Validation(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, n
        ))),
    }
}

pub async fn list_reports(ctx: &ServiceContext, query: ListReportsQuery) -> Result<ReportList> {
    let limit = clamp_limit(query.limit, DEFAULT_LIST_LIMIT)?;
    let filter = ReportFilter {
        category: query.category.filter(|c| !c.trim().is_empty()),
        featured_only: query.featured_only,
    };

    let reports: Vec<ReportSummary> = ctx
        .stores
        .reports
        .list(&filter, limit)
        .await?
        .iter()
        .map(ReportSummary::from)
        .collect();

    Ok(ReportList {
        total: reports.len(),
        reports,
        category: filter.category,
        featured_only: filter.featured_only,
    })
}

/// Full report. Lab parameters are only included for active premium viewers.
#[derive(Debug, Clone, Serialize)]
pub struct ReportDetail {
    #[serde(flatten)]
    pub summary: ReportSummary,
    pub has_detailed_parameters: bool,
    pub premium_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_parameters: Option<Vec<ReportParameter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lab_report_url: Option<String>,
}

pub async fn report_detail(
    ctx: &ServiceContext,
    id: &str,
    viewer: Option<&str>,
    now: DateTime,
) -> Result<ReportDetail> {
    let id = validation::object_id("report_id", id)?;
    let report = ctx
        .stores
        .reports
        .find(id)
        .await?
        .ok_or(AppError::NotFound(Resource::Report))?;

    let premium = match viewer.filter(|v| !v.trim().is_empty()) {
        Some(email) => {
            let email = validation::email(email)?;
            ctx.stores
                .accounts
                .expire_if_due(&email, now)
                .await?
                .is_some_and(|account| subscription::is_active(&account, now))
        }
        None => false,
    };

    let (detailed_parameters, lab_report_url) = if premium {
        (
            Some(report.detailed_parameters.clone()),
            report.lab_report_url.clone(),
        )
    } else {
        (None, None)
    };

    Ok(ReportDetail {
        summary: ReportSummary::from(&report),
        has_detailed_parameters: report.has_detailed_parameters(),
        premium_required: !premium,
        detailed_parameters,
        lab_report_url,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryList {
    pub categories: Vec<CategoryCount>,
    pub total_categories: usize,
}

pub async fn categories(ctx: &ServiceContext) -> Result<CategoryList> {
    let categories = ctx.stores.reports.categories().await?;
    Ok(CategoryList {
        total_categories: categories.len(),
        categories,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct FeaturedReport {
    pub id: String,
    pub product_name: String,
    pub brand: String,
    pub category: String,
    pub purity_score: f64,
    pub safety_status: SafetyStatus,
    pub image: String,
    pub key_finding: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeaturedList {
    pub featured_reports: Vec<FeaturedReport>,
    pub total: usize,
}

pub async fn featured(ctx: &ServiceContext, limit: Option<i64>) -> Result<FeaturedList> {
    let limit = clamp_limit(limit, DEFAULT_FEATURED_LIMIT)?;
    let featured_reports: Vec<FeaturedReport> = ctx
        .stores
        .reports
        .featured(limit)
        .await?
        .into_iter()
        .map(|report| FeaturedReport {
            id: report.id_hex(),
            key_finding: report.key_finding().to_string(),
            product_name: report.product_name,
            brand: report.brand,
            category: report.category,
            purity_score: report.purity_score,
            safety_status: report.safety_status,
            image: report.image,
        })
        .collect();

    Ok(FeaturedList {
        total: featured_reports.len(),
        featured_reports,
    })
}

pub async fn stats(ctx: &ServiceContext) -> Result<ReportStats> {
    ctx.stores.reports.stats().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 10).unwrap(), 10);
        assert_eq!(clamp_limit(Some(1), 10).unwrap(), 1);
        assert!(clamp_limit(Some(0), 10).is_err());
        assert!(clamp_limit(Some(101), 10).is_err());
    }

    #[tokio::test]
    async fn test_detail_rejects_malformed_id() {
        let ctx = ServiceContext::in_memory();
        let err = report_detail(&ctx, "not-an-id", None, DateTime::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
