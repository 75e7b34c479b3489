use crate::{
    config::RenewConfig,
    domains::DomainSet,
    inventory::{self, acm::AcmInventory, CertificateInventory},
    issuer::{self, Issuer},
    publisher::{
        self,
        aws::{S3ObjectStore, SnsNotifier},
        openssl::OpensslDecoder,
        CertificateDecoder, Notifier, ObjectStore,
    },
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use timing::{timed, RunTime, RunTimes};

pub(crate) mod timing;

/// The external systems a renewal talks to
pub(crate) struct Services {
    pub(crate) inventory: Box<dyn CertificateInventory>,
    pub(crate) issuer: Box<dyn Issuer>,
    pub(crate) object_store: Box<dyn ObjectStore>,
    pub(crate) notifier: Box<dyn Notifier>,
    pub(crate) decoder: Box<dyn CertificateDecoder>,
}

impl Services {
    pub(crate) fn from_aws(config: &RenewConfig, sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            inventory: Box::new(AcmInventory::new(sdk_config)),
            issuer: issuer::build_issuer(config.issuer, &config.acme_server, sdk_config),
            object_store: Box::new(S3ObjectStore::new(sdk_config)),
            notifier: Box::new(SnsNotifier::new(sdk_config)),
            decoder: Box::new(OpensslDecoder),
        }
    }
}

#[derive(serde::Serialize, Clone, Debug)]
pub(crate) struct RenewalSummary {
    pub(crate) domains: DomainSet,
    pub(crate) provisioning_needed: bool,
    pub(crate) dry_run: bool,
    pub(crate) existing_certificate_arn: Option<String>,
    pub(crate) existing_certificate_not_after: Option<DateTime<Utc>>,
    pub(crate) imported_certificate_arn: Option<String>,
    pub(crate) issued_certificate_not_after: Option<DateTime<Utc>>,
    pub(crate) uploaded_keys: Vec<String>,
    pub(crate) notified: bool,
    pub(crate) run_times: RunTimes,
}

impl RenewalSummary {
    fn new(config: &RenewConfig) -> Self {
        Self {
            domains: config.domains.clone(),
            provisioning_needed: false,
            dry_run: config.dry_run,
            existing_certificate_arn: None,
            existing_certificate_not_after: None,
            imported_certificate_arn: None,
            issued_certificate_not_after: None,
            uploaded_keys: vec![],
            notified: false,
            run_times: RunTimes::default(),
        }
    }
}

/// Check whether the certificate for the configured domains is due, and if so issue a new one,
/// import it and hand it to the optional destinations. Any failure aborts the remaining steps.
pub(crate) async fn run(config: &RenewConfig, services: &Services, now: DateTime<Utc>) -> Result<RenewalSummary> {
    let start = std::time::Instant::now();
    let mut summary = RenewalSummary::new(config);

    let existing = timed(
        &mut summary.run_times.check_run_time,
        inventory::find_existing_certificate(services.inventory.as_ref(), &config.domains),
    )
    .await
    .context("checking existing certificates")?;

    summary.existing_certificate_arn = existing.as_ref().map(|existing| existing.arn.clone());
    summary.existing_certificate_not_after = existing.as_ref().and_then(|existing| existing.not_after);
    summary.provisioning_needed = inventory::should_provision(existing.as_ref(), now, config.days_to_expire);

    if !summary.provisioning_needed {
        log::info!("certificate for {} is not due for renewal", config.domains);
    } else if config.dry_run {
        log::info!("dry run, not renewing the certificate for {}", config.domains);
    } else {
        renew(config, services, existing.as_ref(), &mut summary).await?;
    }

    summary.run_times.total_run_time = Some(RunTime::since_start(start));

    Ok(summary)
}

async fn renew(
    config: &RenewConfig,
    services: &Services,
    existing: Option<&inventory::ExistingCertificate>,
    summary: &mut RenewalSummary,
) -> Result<()> {
    let bundle = timed(
        &mut summary.run_times.issue_run_time,
        issuer::provision_certificate(services.issuer.as_ref(), &config.issuer_dirs(), &config.email, &config.domains),
    )
    .await
    .context("provisioning certificate")?;

    match bundle.not_after() {
        Ok(not_after) => {
            log::info!("issued certificate for {} valid until {}", config.domains, not_after);
            summary.issued_certificate_not_after = Some(not_after);
        }
        Err(err) => log::warn!("could not read expiration of the issued certificate: {:#}", err),
    }

    summary.imported_certificate_arn = timed(
        &mut summary.run_times.import_run_time,
        publisher::import_certificate(services.inventory.as_ref(), &bundle, existing),
    )
    .await
    .context("importing certificate")?;

    if let Some(bucket) = &config.s3_bucket_name {
        summary.uploaded_keys = timed(
            &mut summary.run_times.upload_run_time,
            publisher::upload_to_object_store(services.object_store.as_ref(), bucket, &config.domains, &bundle),
        )
        .await
        .context("uploading certificate")?;
    }

    if let Some(topic) = &config.notification_sns_arn {
        timed(
            &mut summary.run_times.notify_run_time,
            publisher::notify(
                services.notifier.as_ref(),
                services.decoder.as_ref(),
                topic,
                &config.domains,
                &bundle.certificate,
            ),
        )
        .await
        .context("sending notification")?;
        summary.notified = true;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        inventory::tests::{certificate, FakeInventory},
        issuer::tests::FakeIssuer,
        publisher::tests::{FakeDecoder, FakeNotifier, FakeObjectStore},
    };
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn config(work_root: &std::path::Path, extra: &str) -> RenewConfig {
        RenewConfig::parse_from_config_file(
            format!(
                "domains: example.com,www.example.com\nemail: admin@example.com\nwork_root: {}\n{}",
                work_root.display(),
                extra
            )
            .as_bytes(),
        )
        .unwrap()
    }

    /// Keeps handles on the fakes so a test can inspect them after the services took ownership
    struct Fakes {
        inventory: Arc<FakeInventory>,
        issuer: Arc<FakeIssuer>,
        object_store: Arc<FakeObjectStore>,
        notifier: Arc<FakeNotifier>,
    }

    #[async_trait::async_trait]
    impl CertificateInventory for Arc<FakeInventory> {
        async fn list_certificate_arns(&self) -> Result<Vec<String>> {
            self.as_ref().list_certificate_arns().await
        }

        async fn describe_certificate(&self, arn: &str) -> Result<inventory::ExistingCertificate> {
            self.as_ref().describe_certificate(arn).await
        }

        async fn import_certificate(&self, bundle: &issuer::CertificateBundle, existing_arn: Option<&str>) -> Result<String> {
            self.as_ref().import_certificate(bundle, existing_arn).await
        }
    }

    #[async_trait::async_trait]
    impl Issuer for Arc<FakeIssuer> {
        async fn issue(&self, email: &str, domains: &DomainSet, dirs: &issuer::IssuerDirs) -> Result<()> {
            self.as_ref().issue(email, domains, dirs).await
        }
    }

    #[async_trait::async_trait]
    impl ObjectStore for Arc<FakeObjectStore> {
        async fn put(&self, bucket: &str, key: &str, body: &str) -> Result<()> {
            self.as_ref().put(bucket, key, body).await
        }
    }

    #[async_trait::async_trait]
    impl Notifier for Arc<FakeNotifier> {
        async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<()> {
            self.as_ref().publish(topic, subject, message).await
        }
    }

    fn services(inventory: FakeInventory, issuer: FakeIssuer) -> (Services, Fakes) {
        let fakes = Fakes {
            inventory: Arc::new(inventory),
            issuer: Arc::new(issuer),
            object_store: Arc::new(FakeObjectStore::default()),
            notifier: Arc::new(FakeNotifier::default()),
        };

        let services = Services {
            inventory: Box::new(Arc::clone(&fakes.inventory)),
            issuer: Box::new(Arc::clone(&fakes.issuer)),
            object_store: Box::new(Arc::clone(&fakes.object_store)),
            notifier: Box::new(Arc::clone(&fakes.notifier)),
            decoder: Box::new(FakeDecoder::default()),
        };

        (services, fakes)
    }

    #[tokio::test]
    async fn test_not_due_skips_issuance() -> Result<()> {
        let root = tempfile::tempdir()?;
        let existing = certificate("arn:existing", &["example.com"], Some(now() + Duration::days(60)));
        let (services, fakes) = services(FakeInventory::with(vec![existing]), FakeIssuer::new(&["example.com"]));

        let summary = run(&config(root.path(), "s3_bucket_name: bucket\n"), &services, now()).await?;

        assert!(!summary.provisioning_needed);
        assert_eq!(summary.existing_certificate_arn.as_deref(), Some("arn:existing"));
        assert!(fakes.issuer.calls.lock().unwrap().is_empty());
        assert!(fakes.inventory.imports.lock().unwrap().is_empty());
        assert!(fakes.object_store.puts.lock().unwrap().is_empty());
        assert!(summary.run_times.issue_run_time.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_skips_issuance() -> Result<()> {
        let root = tempfile::tempdir()?;
        let (services, fakes) = services(FakeInventory::default(), FakeIssuer::new(&["example.com"]));

        let summary = run(&config(root.path(), "dry_run: true\n"), &services, now()).await?;

        assert!(summary.provisioning_needed);
        assert!(summary.dry_run);
        assert!(fakes.issuer.calls.lock().unwrap().is_empty());
        assert!(fakes.inventory.imports.lock().unwrap().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_fresh_certificate_without_destinations() -> Result<()> {
        let root = tempfile::tempdir()?;
        let (services, fakes) = services(FakeInventory::default(), FakeIssuer::new(&["example.com", "www.example.com"]));

        let summary = run(&config(root.path(), ""), &services, now()).await?;

        assert!(summary.provisioning_needed);
        assert_eq!(
            summary.imported_certificate_arn.as_deref(),
            Some("arn:aws:acm:us-east-1:123456789012:certificate/new")
        );
        assert!(summary.issued_certificate_not_after.is_some());
        assert_eq!(fakes.inventory.imports.lock().unwrap().len(), 1);
        assert!(fakes.object_store.puts.lock().unwrap().is_empty());
        assert!(fakes.notifier.messages.lock().unwrap().is_empty());
        assert!(summary.uploaded_keys.is_empty());
        assert!(!summary.notified);

        Ok(())
    }

    #[tokio::test]
    async fn test_expiring_certificate_is_reimported_and_published() -> Result<()> {
        let root = tempfile::tempdir()?;
        let existing = certificate("arn:existing", &["example.com", "www.example.com"], Some(now() + Duration::days(29)));
        let (services, fakes) = services(FakeInventory::with(vec![existing]), FakeIssuer::new(&["example.com"]));

        let summary = run(
            &config(
                root.path(),
                "s3_bucket_name: bucket\nnotification_sns_arn: arn:aws:sns:us-east-1:123456789012:certificates\n",
            ),
            &services,
            now(),
        )
        .await?;

        assert_eq!(summary.imported_certificate_arn, None);
        assert_eq!(fakes.inventory.imports.lock().unwrap()[0].1.as_deref(), Some("arn:existing"));
        assert_eq!(
            summary.uploaded_keys,
            vec![
                "certbot/example.com/example.com.crt",
                "certbot/example.com/example.com.key",
                "certbot/example.com/example.com.chain",
            ]
        );
        assert_eq!(fakes.object_store.puts.lock().unwrap().len(), 3);
        assert_eq!(fakes.notifier.messages.lock().unwrap().len(), 1);
        assert!(summary.notified);

        Ok(())
    }

    #[tokio::test]
    async fn test_import_failure_stops_publishing() -> Result<()> {
        let root = tempfile::tempdir()?;
        let inventory = FakeInventory {
            fail_import: true,
            ..Default::default()
        };
        let (services, fakes) = services(inventory, FakeIssuer::new(&["example.com"]));

        let result = run(&config(root.path(), "s3_bucket_name: bucket\n"), &services, now()).await;

        assert!(result.is_err());
        assert!(fakes.object_store.puts.lock().unwrap().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_issuer_failure_propagates() -> Result<()> {
        let root = tempfile::tempdir()?;
        let issuer = FakeIssuer {
            fail: true,
            ..FakeIssuer::new(&["example.com"])
        };
        let (services, fakes) = services(FakeInventory::default(), issuer);

        let result = run(&config(root.path(), ""), &services, now()).await;

        assert!(format!("{:#}", result.err().context("expected an error")?).contains("challenge failed"));
        assert!(fakes.inventory.imports.lock().unwrap().is_empty());

        Ok(())
    }
}
