//! Starter catalog
//!
//! Sample reports and voting options written on startup when their
//! collections are empty. Existing catalogs are never touched.

use bson::DateTime;
use tracing::info;

use crate::db::{
    Metadata, OptionStatus, ReportParameter, SafetyStatus, SampleReport, VotingOption,
};
use crate::store::Stores;
use crate::types::{AppError, Result};

/// Counts inserted by [`seed_catalog`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedOutcome {
    pub reports: usize,
    pub voting_options: usize,
}

fn parameter(name: &str, measured: &str, permitted: &str, within_limit: bool) -> ReportParameter {
    ReportParameter {
        name: name.to_string(),
        measured: measured.to_string(),
        permitted: Some(permitted.to_string()),
        within_limit,
    }
}

fn findings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn sample_reports(now: DateTime) -> Vec<SampleReport> {
    vec![
        SampleReport {
            _id: None,
            metadata: Metadata::at(now),
            product_name: "Amul Taaza Milk".into(),
            brand: "Amul".into(),
            category: "Dairy".into(),
            purity_score: 8.5,
            test_date: "2024-01-15".into(),
            tested_by: "FSSAI Certified Lab - Mumbai".into(),
            image: "/images/amul-milk.jpg".into(),
            key_findings: findings(&[
                "No harmful bacteria detected",
                "Fat content as per label (3.0%)",
                "No adulterants found",
                "Protein content: 3.2g per 100ml",
            ]),
            safety_status: SafetyStatus::Safe,
            detailed_parameters: vec![
                parameter("Fat", "3.0%", ">= 3.0%", true),
                parameter("Total plate count", "18,000 cfu/ml", "<= 30,000 cfu/ml", true),
                parameter("Urea", "Not detected", "Absent", true),
            ],
            lab_report_url: Some("/reports/amul-taaza-milk.pdf".into()),
            is_featured: true,
        },
        SampleReport {
            _id: None,
            metadata: Metadata::at(now),
            product_name: "Parle-G Biscuits".into(),
            brand: "Parle".into(),
            category: "Snacks".into(),
            purity_score: 7.2,
            test_date: "2024-01-10".into(),
            tested_by: "NABL Certified Lab - Delhi".into(),
            image: "/images/parle-g.jpg".into(),
            key_findings: findings(&[
                "High sugar content (25g per 100g)",
                "Trans fat within limits",
                "No artificial colors detected",
                "Sodium content moderate",
            ]),
            safety_status: SafetyStatus::Caution,
            detailed_parameters: vec![
                parameter("Total sugar", "25 g/100g", "Not specified", true),
                parameter("Trans fat", "0.15 g/100g", "<= 0.2 g/100g", true),
            ],
            lab_report_url: None,
            is_featured: true,
        },
        SampleReport {
            _id: None,
            metadata: Metadata::at(now),
            product_name: "Mother Dairy Butter".into(),
            brand: "Mother Dairy".into(),
            category: "Dairy".into(),
            purity_score: 9.1,
            test_date: "2024-01-20".into(),
            tested_by: "FSSAI Certified Lab - Bangalore".into(),
            image: "/images/mother-dairy-butter.jpg".into(),
            key_findings: findings(&[
                "Pure milk fat content verified",
                "No vegetable oil adulteration",
                "Salt content as per standards",
                "Excellent quality overall",
            ]),
            safety_status: SafetyStatus::Safe,
            detailed_parameters: Vec::new(),
            lab_report_url: None,
            is_featured: true,
        },
    ]
}

fn option(
    product_name: &str,
    category: &str,
    description: &str,
    votes: u32,
    funding: (f64, f64),
    estimated_test_date: &str,
    now: DateTime,
) -> VotingOption {
    VotingOption {
        _id: None,
        metadata: Metadata::at(now),
        product_name: product_name.to_string(),
        category: category.to_string(),
        description: description.to_string(),
        votes,
        funding_raised: funding.0,
        funding_target: funding.1,
        estimated_test_date: Some(estimated_test_date.to_string()),
        status: OptionStatus::Voting,
        voters: Default::default(),
    }
}

pub fn voting_options(now: DateTime) -> Vec<VotingOption> {
    vec![
        option(
            "Maggi Noodles",
            "Instant Food",
            "Test for MSG, lead content, and preservatives",
            245,
            (12_000.0, 15_000.0),
            "2024-02-15",
            now,
        ),
        option(
            "Britannia Bread",
            "Bakery",
            "Check for preservatives, artificial additives, and freshness",
            189,
            (8_500.0, 12_000.0),
            "2024-02-20",
            now,
        ),
        option(
            "Amul Cheese",
            "Dairy",
            "Verify milk content, preservatives, and nutritional claims",
            156,
            (6_200.0, 10_000.0),
            "2024-02-25",
            now,
        ),
    ]
}

/// Insert the starter catalog into empty collections
pub async fn seed_catalog(stores: &Stores, now: DateTime) -> Result<SeedOutcome> {
    let mut outcome = SeedOutcome::default();

    if stores.reports.count().await? == 0 {
        let reports = sample_reports(now);
        for report in &reports {
            report.validate().map_err(AppError::Internal)?;
        }
        outcome.reports = stores.reports.insert_many(reports).await?;
        info!("Seeded {} sample reports", outcome.reports);
    }

    if stores.voting.count().await? == 0 {
        outcome.voting_options = stores.voting.insert_many(voting_options(now)).await?;
        info!("Seeded {} voting options", outcome.voting_options);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_only_fills_empty_collections() {
        let stores = Stores::memory();
        let now = DateTime::now();

        let first = seed_catalog(&stores, now).await.unwrap();
        assert_eq!(first, SeedOutcome { reports: 3, voting_options: 3 });

        let second = seed_catalog(&stores, now).await.unwrap();
        assert_eq!(second, SeedOutcome::default());
        assert_eq!(stores.reports.count().await.unwrap(), 3);
    }

    #[test]
    fn test_seed_reports_are_valid() {
        for report in sample_reports(DateTime::now()) {
            assert!(report.validate().is_ok(), "{}", report.product_name);
            assert!(report.is_featured);
            assert_eq!(report.key_findings.len(), 4);
        }
    }
}
