use super::{CertificateInventory, ExistingCertificate};
use crate::issuer::CertificateBundle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_acm::{
    primitives::Blob,
    types::{Filters, KeyAlgorithm},
    Client,
};
use chrono::{DateTime, Utc};

/// Upper bound on how many certificates are looked at when searching the inventory
const MAX_LISTED_CERTIFICATES: usize = 1000;

/// ListCertificates only returns RSA_2048 certificates unless key types are given explicitly, and
/// the native issuer produces ECDSA keys
pub(crate) fn listing_filters() -> Filters {
    Filters::builder()
        .set_key_types(Some(
            KeyAlgorithm::values()
                .iter()
                .map(|key_type| KeyAlgorithm::from(*key_type))
                .collect(),
        ))
        .build()
}

/// AWS Certificate Manager backed inventory
pub(crate) struct AcmInventory {
    client: Client,
}

impl AcmInventory {
    pub(crate) fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl CertificateInventory for AcmInventory {
    async fn list_certificate_arns(&self) -> Result<Vec<String>> {
        let mut arns = vec![];
        let mut pages = self
            .client
            .list_certificates()
            .includes(listing_filters())
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.context("listing ACM certificates page")?;

            for summary in page.certificate_summary_list() {
                if arns.len() == MAX_LISTED_CERTIFICATES {
                    log::warn!("more than {} certificates in ACM, ignoring the rest", MAX_LISTED_CERTIFICATES);
                    return Ok(arns);
                }

                if let Some(arn) = summary.certificate_arn() {
                    arns.push(arn.to_string());
                }
            }
        }

        Ok(arns)
    }

    async fn describe_certificate(&self, arn: &str) -> Result<ExistingCertificate> {
        let output = self
            .client
            .describe_certificate()
            .certificate_arn(arn)
            .send()
            .await
            .context("calling ACM DescribeCertificate")?;

        let detail = output.certificate().context("ACM returned no certificate detail")?;

        let not_after = match detail.not_after() {
            Some(not_after) => Some(
                DateTime::<Utc>::from_timestamp(not_after.secs(), not_after.subsec_nanos())
                    .context("NotAfter out of range")?,
            ),
            None => None,
        };

        Ok(ExistingCertificate {
            arn: detail.certificate_arn().unwrap_or(arn).to_string(),
            subject_alternative_names: detail.subject_alternative_names().iter().cloned().collect(),
            not_after,
        })
    }

    async fn import_certificate(&self, bundle: &CertificateBundle, existing_arn: Option<&str>) -> Result<String> {
        let output = self
            .client
            .import_certificate()
            .set_certificate_arn(existing_arn.map(str::to_string))
            .certificate(Blob::new(bundle.certificate.as_bytes()))
            .private_key(Blob::new(bundle.private_key.as_bytes()))
            .certificate_chain(Blob::new(bundle.certificate_chain.as_bytes()))
            .send()
            .await
            .context("calling ACM ImportCertificate")?;

        output
            .certificate_arn()
            .map(str::to_string)
            .context("ACM ImportCertificate returned no certificate ARN")
    }
}
