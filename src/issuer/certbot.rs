use super::{Issuer, IssuerDirs};
use crate::domains::DomainSet;
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;

/// Issues certificates by running the certbot CLI with its Route 53 DNS plugin
pub(crate) struct CertbotIssuer {
    acme_server: url::Url,
}

impl CertbotIssuer {
    pub(crate) fn new(acme_server: url::Url) -> Self {
        Self { acme_server }
    }

    pub(crate) fn args(&self, email: &str, domains: &DomainSet, dirs: &IssuerDirs) -> Vec<String> {
        vec![
            // Obtain a cert but don't install it
            "certonly".to_string(),
            "-n".to_string(),
            "--agree-tos".to_string(),
            "--email".to_string(),
            email.to_string(),
            "--dns-route53".to_string(),
            "-d".to_string(),
            domains.to_string(),
            "--server".to_string(),
            self.acme_server.to_string(),
            "--config-dir".to_string(),
            dirs.config_dir.to_string_lossy().to_string(),
            "--work-dir".to_string(),
            dirs.work_dir.to_string_lossy().to_string(),
            "--logs-dir".to_string(),
            dirs.logs_dir.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl Issuer for CertbotIssuer {
    async fn issue(&self, email: &str, domains: &DomainSet, dirs: &IssuerDirs) -> Result<()> {
        let output = tokio::process::Command::new("certbot")
            .args(self.args(email, domains, dirs))
            .output()
            .await
            .context("running certbot")?;

        ensure!(
            output.status.success(),
            "certbot failed with status code {}, stderr: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr),
        );

        Ok(())
    }
}
