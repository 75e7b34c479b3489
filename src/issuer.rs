use crate::{config::IssuerKind, domains::DomainSet, file_utils};
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub(crate) mod acme;
pub(crate) mod certbot;
pub(crate) mod route53;

pub(crate) const CERTIFICATE_FILE: &str = "cert.pem";
pub(crate) const PRIVATE_KEY_FILE: &str = "privkey.pem";
pub(crate) const CHAIN_FILE: &str = "chain.pem";

pub(crate) const LETSENCRYPT_PRODUCTION_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Freshly issued certificate material, all PEM encoded
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct CertificateBundle {
    pub(crate) certificate: String,
    pub(crate) private_key: String,
    pub(crate) certificate_chain: String,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("certificate", &self.certificate)
            .field("private_key", &"<redacted>")
            .field("certificate_chain", &self.certificate_chain)
            .finish()
    }
}

impl CertificateBundle {
    /// Expiration of the leaf certificate
    pub(crate) fn not_after(&self) -> Result<DateTime<Utc>> {
        let pems = pem::parse_many(&self.certificate).context("parsing certificate PEM")?;
        ensure!(pems.len() == 1, "expected exactly one PEM block, found {}", pems.len());
        let pem = &pems[0];
        ensure!(pem.tag() == "CERTIFICATE", "expected CERTIFICATE PEM block, found {}", pem.tag());

        let certificate = x509_certificate::CapturedX509Certificate::from_der(pem.contents()).context("parsing DER")?;

        Ok(certificate.validity_not_after())
    }
}

/// Process-local directories for the issuer, so nothing needs root
#[derive(Clone, Debug, serde::Serialize)]
pub(crate) struct IssuerDirs {
    pub(crate) config_dir: PathBuf,
    pub(crate) work_dir: PathBuf,
    pub(crate) logs_dir: PathBuf,
}

impl IssuerDirs {
    pub(crate) fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config-dir"),
            work_dir: root.join("work-dir"),
            logs_dir: root.join("logs-dir"),
        }
    }

    /// Where the issued PEM files for a domain end up. The domain is used verbatim.
    pub(crate) fn live_dir(&self, primary_domain: &str) -> PathBuf {
        self.config_dir.join("live").join(primary_domain)
    }
}

#[async_trait]
pub(crate) trait Issuer: Send + Sync {
    /// Obtain a DNS-validated certificate for `domains`, leaving cert.pem, privkey.pem and
    /// chain.pem in the live directory of the primary domain
    async fn issue(&self, email: &str, domains: &DomainSet, dirs: &IssuerDirs) -> Result<()>;
}

pub(crate) fn build_issuer(kind: IssuerKind, acme_server: &url::Url, sdk_config: &aws_config::SdkConfig) -> Box<dyn Issuer> {
    match kind {
        IssuerKind::Native => Box::new(acme::AcmeDnsIssuer::new(
            acme_server.clone(),
            route53::Route53Solver::new(sdk_config),
        )),
        IssuerKind::Certbot => Box::new(certbot::CertbotIssuer::new(acme_server.clone())),
    }
}

/// Issue a certificate and collect it from the ephemeral files the issuer left behind. Each file
/// is removed as soon as it has been read.
pub(crate) async fn provision_certificate(
    issuer: &dyn Issuer,
    dirs: &IssuerDirs,
    email: &str,
    domains: &DomainSet,
) -> Result<CertificateBundle> {
    log::info!("issuing certificate for {}", domains);
    issuer.issue(email, domains, dirs).await.context("issuing certificate")?;

    let live_dir = dirs.live_dir(domains.primary());

    Ok(CertificateBundle {
        certificate: file_utils::read_and_delete_file(&live_dir.join(CERTIFICATE_FILE)).await?,
        private_key: file_utils::read_and_delete_file(&live_dir.join(PRIVATE_KEY_FILE)).await?,
        certificate_chain: file_utils::read_and_delete_file(&live_dir.join(CHAIN_FILE)).await?,
    })
}
