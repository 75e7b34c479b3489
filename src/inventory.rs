use crate::{domains::DomainSet, issuer::CertificateBundle};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

pub(crate) mod acm;

pub(crate) const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A certificate already present in the certificate manager
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub(crate) struct ExistingCertificate {
    pub(crate) arn: String,
    pub(crate) subject_alternative_names: BTreeSet<String>,
    pub(crate) not_after: Option<DateTime<Utc>>,
}

impl ExistingCertificate {
    /// Whole days of validity left, rounded down like a calendar day count
    pub(crate) fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.not_after
            .map(|not_after| (not_after - now).num_seconds().div_euclid(SECONDS_PER_DAY))
    }
}

#[async_trait]
pub(crate) trait CertificateInventory: Send + Sync {
    /// Certificate identifiers in the order the certificate manager pages them out
    async fn list_certificate_arns(&self) -> Result<Vec<String>>;

    async fn describe_certificate(&self, arn: &str) -> Result<ExistingCertificate>;

    /// Import the bundle, over `existing_arn` when given. Returns the ARN the certificate manager
    /// reports for the imported certificate.
    async fn import_certificate(&self, bundle: &CertificateBundle, existing_arn: Option<&str>) -> Result<String>;
}

/// Find a certificate whose SANs are all within the requested domains. The first match in
/// pagination order is returned, even if a later certificate would cover the domains better.
pub(crate) async fn find_existing_certificate(
    inventory: &dyn CertificateInventory,
    domains: &DomainSet,
) -> Result<Option<ExistingCertificate>> {
    let arns = inventory.list_certificate_arns().await.context("listing certificates")?;

    for arn in arns {
        let certificate = inventory
            .describe_certificate(&arn)
            .await
            .context(format!("describing certificate {}", arn))?;

        if domains.covers(&certificate.subject_alternative_names) {
            log::info!("found existing certificate {} covering {}", certificate.arn, domains);
            return Ok(Some(certificate));
        }
    }

    log::info!("no existing certificate covers {}", domains);
    Ok(None)
}

/// Whether a new certificate has to be issued. The threshold is inclusive: a certificate with
/// exactly `threshold_days` days left gets renewed.
pub(crate) fn should_provision(existing: Option<&ExistingCertificate>, now: DateTime<Utc>, threshold_days: i64) -> bool {
    let existing = match existing {
        Some(existing) => existing,
        None => return true,
    };

    match existing.days_remaining(now) {
        Some(days_remaining) => {
            log::info!(
                "certificate {} expires in {} days, renewal threshold is {} days",
                existing.arn,
                days_remaining,
                threshold_days
            );
            days_remaining <= threshold_days
        }
        None => {
            log::warn!("certificate {} has no expiration date, treating it as expired", existing.arn);
            true
        }
    }
}
