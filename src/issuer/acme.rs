//! Native ACME issuance answering DNS-01 challenges
//!
//! The order flow is:
//!
//! 1. Register an account with the directory, agreeing to its terms
//! 2. Create an order covering every requested domain
//! 3. Publish one `_acme-challenge` TXT record set per challenged name
//! 4. Wait until the records are visible through DNS, then mark the challenges ready
//! 5. Poll the order until it is ready, finalize it with a fresh key and CSR
//! 6. Download the chain and leave it in the certbot layout under the live directory
//!
//! The TXT records are removed again whatever the outcome.

use super::{Issuer, IssuerDirs, CERTIFICATE_FILE, CHAIN_FILE, PRIVATE_KEY_FILE};
use crate::domains::DomainSet;
use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use hickory_resolver::{error::ResolveErrorKind, TokioAsyncResolver};
use instant_acme::{Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, Order, OrderStatus};
use itertools::Itertools;
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use std::{collections::HashMap, path::Path, time::Duration};
use tokio::{io::AsyncWriteExt, time::sleep};

const MAX_PROPAGATION_CHECKS: u32 = 10;
const MAX_ORDER_POLLS: u32 = 10;
const MAX_CERTIFICATE_POLLS: u32 = 5;
const MAX_POLL_DELAY: Duration = Duration::from_secs(15);

const PEM_CERTIFICATE_END: &str = "-----END CERTIFICATE-----";

#[async_trait]
pub(crate) trait DnsChallengeSolver: Send + Sync {
    /// Create or replace the TXT record set `record_name` with `values`. Returns once the change
    /// has reached the authoritative name servers.
    async fn publish(&self, record_name: &str, values: &[String]) -> Result<()>;

    async fn remove(&self, record_name: &str, values: &[String]) -> Result<()>;
}

/// TXT lookups for the propagation check
#[async_trait]
pub(crate) trait TxtResolver: Send + Sync {
    /// The TXT values of `record_name`, empty when the name doesn't resolve (yet)
    async fn txt_values(&self, record_name: &str) -> Result<Vec<String>>;
}

/// Resolves through the system resolver configuration. Every lookup gets a new resolver, so a
/// negative answer cached before the record was published can't hide it.
pub(crate) struct SystemTxtResolver;

#[async_trait]
impl TxtResolver for SystemTxtResolver {
    async fn txt_values(&self, record_name: &str) -> Result<Vec<String>> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().context("creating dns resolver")?;

        match resolver.txt_lookup(record_name).await {
            Ok(records) => Ok(records.iter().map(|txt| txt.to_string()).collect()),
            Err(err) if matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(vec![]),
            Err(err) => Err(err).context(format!("looking up {}", record_name)),
        }
    }
}

#[derive(Clone, Debug)]
struct PendingChallenge {
    record_name: String,
    dns_value: String,
    url: String,
}

pub(crate) struct AcmeDnsIssuer<S> {
    directory: url::Url,
    solver: S,
}

impl<S: DnsChallengeSolver> AcmeDnsIssuer<S> {
    pub(crate) fn new(directory: url::Url, solver: S) -> Self {
        Self { directory, solver }
    }

    async fn authorize(&self, order: &mut Order) -> Result<Vec<PendingChallenge>> {
        let authorizations = order.authorizations().await.context("fetching authorizations")?;

        let mut challenges = vec![];
        for authorization in &authorizations {
            match authorization.status {
                AuthorizationStatus::Pending => {}
                AuthorizationStatus::Valid => continue,
                _ => bail!("unsupported authorization status: {:?}", authorization.status),
            }

            #[allow(unreachable_patterns)]
            let identifier = match &authorization.identifier {
                Identifier::Dns(identifier) => identifier,
                other => bail!("unsupported identifier {:?}", other),
            };

            let challenge = authorization
                .challenges
                .iter()
                .find(|challenge| challenge.r#type == ChallengeType::Dns01)
                .context(format!("no dns-01 challenge offered for {}", identifier))?;

            challenges.push(PendingChallenge {
                record_name: challenge_record_name(identifier),
                dns_value: order.key_authorization(challenge).dns_value(),
                url: challenge.url.clone(),
            });
        }

        Ok(challenges)
    }

    async fn complete_order(&self, order: &mut Order, domains: &DomainSet, challenges: &[PendingChallenge]) -> Result<(String, String)> {
        wait_for_propagation(&SystemTxtResolver, challenges)
            .await
            .context("checking TXT record propagation")?;

        for challenge in challenges {
            log::debug!("setting challenge ready for {}", challenge.url);
            order
                .set_challenge_ready(&challenge.url)
                .await
                .context("setting challenge ready")?;
        }

        wait_for_order_ready(order).await?;

        let mut params = CertificateParams::new(domains.iter().cloned().collect::<Vec<_>>()).context("creating certificate params")?;
        params.distinguished_name = DistinguishedName::new();
        let key_pair = KeyPair::generate().context("generating private key")?;
        let csr = params
            .serialize_request(&key_pair)
            .context("serializing certificate signing request")?;

        order.finalize(csr.der()).await.context("finalizing order")?;

        let mut delay = Duration::from_secs(1);
        for _ in 0..MAX_CERTIFICATE_POLLS {
            if let Some(chain) = order.certificate().await.context("downloading certificate")? {
                return Ok((chain, key_pair.serialize_pem()));
            }

            sleep(delay).await;
            delay = (delay * 2).min(MAX_POLL_DELAY);
        }

        bail!("certificate not available after {} attempts", MAX_CERTIFICATE_POLLS)
    }
}

#[async_trait]
impl<S: DnsChallengeSolver> Issuer for AcmeDnsIssuer<S> {
    async fn issue(&self, email: &str, domains: &DomainSet, dirs: &IssuerDirs) -> Result<()> {
        let contact = format!("mailto:{}", email);
        let (account, _credentials) = Account::create(
            &NewAccount {
                contact: &[contact.as_str()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            self.directory.as_str(),
            None,
        )
        .await
        .context("creating ACME account")?;

        let identifiers = domains.iter().map(|domain| Identifier::Dns(domain.clone())).collect::<Vec<_>>();
        let mut order = account
            .new_order(&NewOrder { identifiers: &identifiers })
            .await
            .context("creating ACME order")?;

        let challenges = self.authorize(&mut order).await.context("authorizing")?;
        let records = group_challenge_values(&challenges);

        let (chain, private_key) = with_published_records(
            &self.solver,
            &records,
            self.complete_order(&mut order, domains, &challenges),
        )
        .await?;

        write_live_files(&dirs.live_dir(domains.primary()), &chain, &private_key).await
    }
}

/// The TXT record name answering the challenge for `identifier`. Wildcards are validated on their
/// base name.
pub(crate) fn challenge_record_name(identifier: &str) -> String {
    format!("_acme-challenge.{}", identifier.strip_prefix("*.").unwrap_or(identifier))
}

/// A name and its wildcard share one record, so all their values go into the same record set
fn group_challenge_values(challenges: &[PendingChallenge]) -> Vec<(String, Vec<String>)> {
    let grouped: HashMap<String, Vec<String>> = challenges
        .iter()
        .map(|challenge| (challenge.record_name.clone(), challenge.dns_value.clone()))
        .into_group_map();

    grouped.into_iter().sorted().collect()
}

/// Publish `records`, run `step`, then remove whatever got published, also when publishing or
/// `step` failed. A failed removal is only logged, the result of `step` is what counts.
pub(crate) async fn with_published_records<T>(
    solver: &dyn DnsChallengeSolver,
    records: &[(String, Vec<String>)],
    step: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    let mut published = 0;
    let mut publish_result = Ok(());

    for (record_name, values) in records {
        if let Err(err) = solver.publish(record_name, values).await {
            publish_result = Err(err).context(format!("publishing TXT record {}", record_name));
            break;
        }
        published += 1;
    }

    let result = match publish_result {
        Ok(()) => step.await,
        Err(err) => Err(err),
    };

    for (record_name, values) in &records[..published] {
        if let Err(err) = solver.remove(record_name, values).await {
            log::error!("failed to remove TXT record {}: {:#}", record_name, err);
        }
    }

    result
}

async fn wait_for_propagation(resolver: &dyn TxtResolver, challenges: &[PendingChallenge]) -> Result<()> {
    let mut delay = Duration::from_millis(250);
    let mut unsettled = challenges.to_vec();

    for _ in 0..MAX_PROPAGATION_CHECKS {
        sleep(delay).await;

        let mut still_unsettled = vec![];
        for challenge in unsettled {
            let settled = resolver
                .txt_values(&challenge.record_name)
                .await?
                .iter()
                .any(|value| *value == challenge.dns_value);

            if !settled {
                still_unsettled.push(challenge);
            }
        }

        if still_unsettled.is_empty() {
            return Ok(());
        }

        log::debug!(
            "{} challenge records not visible yet, waiting {:?}",
            still_unsettled.len(),
            delay
        );
        unsettled = still_unsettled;
        delay = (delay * 2).min(MAX_POLL_DELAY);
    }

    bail!(
        "TXT records not visible after {} checks: {}",
        MAX_PROPAGATION_CHECKS,
        unsettled.iter().map(|challenge| challenge.record_name.as_str()).join(", ")
    )
}

async fn wait_for_order_ready(order: &mut Order) -> Result<()> {
    let mut delay = Duration::from_millis(250);

    for _ in 0..MAX_ORDER_POLLS {
        sleep(delay).await;

        let state = order.refresh().await.context("refreshing order")?;
        match &state.status {
            OrderStatus::Ready => return Ok(()),
            OrderStatus::Invalid => bail!("order is invalid: {:?}", state.error),
            status => log::debug!("order is {:?}, waiting {:?}", status, delay),
        }

        delay = (delay * 2).min(MAX_POLL_DELAY);
    }

    bail!("order not ready after {} polls", MAX_ORDER_POLLS)
}

/// Split a full chain into the leaf certificate and the rest of the chain
pub(crate) fn split_chain(full_chain: &str) -> Result<(String, String)> {
    let leaf_end = full_chain.find(PEM_CERTIFICATE_END).context("no certificate in issued chain")? + PEM_CERTIFICATE_END.len();
    let (leaf, rest) = full_chain.split_at(leaf_end);

    let intermediates = pem::parse_many(rest).context("parsing issued chain")?;
    ensure!(!intermediates.is_empty(), "issued chain has no intermediate certificates");

    Ok((format!("{}\n", leaf.trim()), format!("{}\n", rest.trim())))
}

/// Lay the issued material out like certbot's live directory
pub(crate) async fn write_live_files(live_dir: &Path, full_chain: &str, private_key: &str) -> Result<()> {
    let (certificate, chain) = split_chain(full_chain)?;

    tokio::fs::create_dir_all(live_dir)
        .await
        .context(format!("creating {}", live_dir.display()))?;

    tokio::fs::write(live_dir.join(CERTIFICATE_FILE), certificate)
        .await
        .context("writing certificate")?;
    tokio::fs::write(live_dir.join(CHAIN_FILE), chain).await.context("writing chain")?;

    write_private_key(&live_dir.join(PRIVATE_KEY_FILE), private_key)
        .await
        .context("writing private key")?;

    Ok(())
}

/// The key file is created owner-only, a leftover from an earlier run is replaced rather than
/// reused with its old permissions
async fn write_private_key(path: &Path, private_key: &str) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err).context(format!("removing stale {}", path.display())),
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await
        .context(format!("creating {}", path.display()))?;

    file.write_all(private_key.as_bytes()).await?;
    file.flush().await?;

    Ok(())
}
