use crate::{
    domains::DomainSet,
    inventory::{CertificateInventory, ExistingCertificate},
    issuer::CertificateBundle,
};
use anyhow::{Context, Result};
use async_trait::async_trait;

pub(crate) mod aws;
pub(crate) mod openssl;

pub(crate) const NOTIFICATION_SUBJECT: &str = "Issued new LetsEncrypt certificate";

#[async_trait]
pub(crate) trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: &str) -> Result<()>;
}

#[async_trait]
pub(crate) trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<()>;
}

/// Turns a PEM certificate into human readable text
#[async_trait]
pub(crate) trait CertificateDecoder: Send + Sync {
    async fn decode(&self, certificate: &str) -> Result<String>;
}

/// Import the bundle into the certificate manager. The lookup result from the expiry check decides
/// between a fresh import and a re-import over the existing certificate. Only a fresh import yields
/// an ARN, a re-import returns None.
pub(crate) async fn import_certificate(
    inventory: &dyn CertificateInventory,
    bundle: &CertificateBundle,
    existing: Option<&ExistingCertificate>,
) -> Result<Option<String>> {
    match existing {
        Some(existing) => {
            log::info!("re-importing certificate over {}", existing.arn);
            inventory
                .import_certificate(bundle, Some(&existing.arn))
                .await
                .context(format!("re-importing certificate {}", existing.arn))?;
            Ok(None)
        }
        None => {
            let arn = inventory
                .import_certificate(bundle, None)
                .await
                .context("importing new certificate")?;
            log::info!("imported new certificate {}", arn);
            Ok(Some(arn))
        }
    }
}

/// The object keys the bundle is stored under: certificate, private key and chain
pub(crate) fn object_keys(domains: &DomainSet) -> [String; 3] {
    let primary = domains.primary();
    let prefix = format!("certbot/{}", primary);

    [
        format!("{}/{}.crt", prefix, primary),
        format!("{}/{}.key", prefix, primary),
        format!("{}/{}.chain", prefix, primary),
    ]
}

/// Write the bundle to the bucket, overwriting whatever is there. Returns the keys written.
pub(crate) async fn upload_to_object_store(
    store: &dyn ObjectStore,
    bucket: &str,
    domains: &DomainSet,
    bundle: &CertificateBundle,
) -> Result<Vec<String>> {
    let [certificate_key, private_key_key, chain_key] = object_keys(domains);

    for (key, body) in [
        (&certificate_key, &bundle.certificate),
        (&private_key_key, &bundle.private_key),
        (&chain_key, &bundle.certificate_chain),
    ] {
        store
            .put(bucket, key, body)
            .await
            .context(format!("uploading s3://{}/{}", bucket, key))?;
    }

    log::info!("uploaded certificate to s3://{}/certbot/{}/", bucket, domains.primary());

    Ok(vec![certificate_key, private_key_key, chain_key])
}

pub(crate) fn notification_message(domains: &DomainSet, certificate_text: &str) -> String {
    format!("Issued new certificates for domains: {}\n\n{}", domains, certificate_text)
}

pub(crate) async fn notify(
    notifier: &dyn Notifier,
    decoder: &dyn CertificateDecoder,
    topic: &str,
    domains: &DomainSet,
    certificate: &str,
) -> Result<()> {
    let certificate_text = decoder.decode(certificate).await.context("decoding certificate")?;

    notifier
        .publish(topic, NOTIFICATION_SUBJECT, &notification_message(domains, &certificate_text))
        .await
        .context(format!("publishing notification to {}", topic))?;

    log::info!("sent certificate notification to {}", topic);

    Ok(())
}
