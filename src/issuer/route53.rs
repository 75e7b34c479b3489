use super::acme::DnsChallengeSolver;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_route53::{
    types::{Change, ChangeAction, ChangeBatch, ChangeStatus, ResourceRecord, ResourceRecordSet, RrType},
    Client,
};
use std::time::Duration;

/// TTL of the challenge TXT records, kept short so stale values disappear quickly
const CHALLENGE_RECORD_TTL: i64 = 10;

const MAX_CHANGE_POLLS: u32 = 24;
const CHANGE_POLL_DELAY: Duration = Duration::from_secs(5);

/// Answers DNS-01 challenges by writing TXT records into the matching Route 53 hosted zone
pub(crate) struct Route53Solver {
    client: Client,
}

impl Route53Solver {
    pub(crate) fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }

    /// (zone name, zone id) of every public hosted zone in the account
    async fn public_zones(&self) -> Result<Vec<(String, String)>> {
        let mut zones = vec![];
        let mut pages = self.client.list_hosted_zones().into_paginator().send();

        while let Some(page) = pages.next().await {
            let page = page.context("listing route53 hosted zones page")?;

            for zone in page.hosted_zones() {
                if zone.config().map(|config| config.private_zone()).unwrap_or(false) {
                    continue;
                }

                zones.push((zone.name().to_string(), zone.id().to_string()));
            }
        }

        Ok(zones)
    }

    /// Submit the change and return its change id
    async fn change_txt_record(&self, action: ChangeAction, record_name: &str, values: &[String]) -> Result<String> {
        let zones = self.public_zones().await?;
        let zone_id = find_zone(record_name, &zones).context(format!("no public hosted zone found for {}", record_name))?;

        let mut record_set = ResourceRecordSet::builder()
            .name(record_name)
            .r#type(RrType::Txt)
            .ttl(CHALLENGE_RECORD_TTL);

        // TXT values are quoted on the wire
        for value in values {
            record_set = record_set.resource_records(
                ResourceRecord::builder()
                    .value(format!("\"{}\"", value))
                    .build()
                    .context("building TXT record value")?,
            );
        }

        let record_set = record_set.build().context("building TXT record set")?;

        let change_batch = ChangeBatch::builder()
            .changes(
                Change::builder()
                    .action(action.clone())
                    .resource_record_set(record_set)
                    .build()
                    .context("building record change")?,
            )
            .build()
            .context("building change batch")?;

        log::info!("{} TXT record {} in hosted zone {}", action.as_str(), record_name, zone_id);

        let output = self
            .client
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(change_batch)
            .send()
            .await
            .context(format!("changing route53 record {}", record_name))?;

        Ok(output
            .change_info()
            .context("route53 returned no change info")?
            .id()
            .to_string())
    }

    async fn change_status(&self, change_id: &str) -> Result<ChangeStatus> {
        let output = self
            .client
            .get_change()
            .id(change_id)
            .send()
            .await
            .context(format!("getting route53 change {}", change_id))?;

        Ok(output
            .change_info()
            .context("route53 returned no change info")?
            .status()
            .clone())
    }
}

/// Poll `status` until the change is INSYNC, meaning every authoritative name server serves it
pub(crate) async fn wait_for_insync<F, Fut>(change_id: &str, delay: Duration, mut status: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<ChangeStatus>>,
{
    for _ in 0..MAX_CHANGE_POLLS {
        match status().await? {
            ChangeStatus::Insync => return Ok(()),
            other => log::debug!("route53 change {} is {}, waiting {:?}", change_id, other.as_str(), delay),
        }

        tokio::time::sleep(delay).await;
    }

    bail!("route53 change {} not in sync after {} polls", change_id, MAX_CHANGE_POLLS)
}

#[async_trait]
impl DnsChallengeSolver for Route53Solver {
    async fn publish(&self, record_name: &str, values: &[String]) -> Result<()> {
        let change_id = self.change_txt_record(ChangeAction::Upsert, record_name, values).await?;

        wait_for_insync(&change_id, CHANGE_POLL_DELAY, || self.change_status(&change_id)).await
    }

    async fn remove(&self, record_name: &str, values: &[String]) -> Result<()> {
        self.change_txt_record(ChangeAction::Delete, record_name, values).await?;

        Ok(())
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// The id of the most specific zone containing `record_name`
pub(crate) fn find_zone<'a>(record_name: &str, zones: &'a [(String, String)]) -> Option<&'a str> {
    let record_name = normalize(record_name);

    zones
        .iter()
        .map(|(zone_name, zone_id)| (normalize(zone_name), zone_id))
        .filter(|(zone_name, _)| record_name == *zone_name || record_name.ends_with(&format!(".{}", zone_name)))
        .max_by_key(|(zone_name, _)| zone_name.len())
        .map(|(_, zone_id)| zone_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones() -> Vec<(String, String)> {
        vec![
            ("example.com.".to_string(), "/hostedzone/ZPARENT".to_string()),
            ("dev.example.com.".to_string(), "/hostedzone/ZDEV".to_string()),
            ("example.org.".to_string(), "/hostedzone/ZORG".to_string()),
        ]
    }

    #[test]
    fn test_find_zone_prefers_longest_suffix() {
        assert_eq!(find_zone("_acme-challenge.example.com", &zones()), Some("/hostedzone/ZPARENT"));
        assert_eq!(find_zone("_acme-challenge.api.dev.example.com", &zones()), Some("/hostedzone/ZDEV"));
        assert_eq!(find_zone("_acme-challenge.Example.ORG.", &zones()), Some("/hostedzone/ZORG"));
    }

    #[tokio::test]
    async fn test_wait_for_insync_polls_until_in_sync() -> Result<()> {
        let statuses = std::sync::Mutex::new(vec![ChangeStatus::Insync, ChangeStatus::Pending, ChangeStatus::Pending]);
        let polls = std::sync::atomic::AtomicUsize::new(0);

        wait_for_insync("/change/C1", Duration::ZERO, || {
            polls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let status = statuses.lock().unwrap().pop();
            async move { status.context("polled after in sync") }
        })
        .await?;

        assert_eq!(polls.load(std::sync::atomic::Ordering::SeqCst), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_wait_for_insync_gives_up() {
        let result = wait_for_insync("/change/C1", Duration::ZERO, || async { Ok(ChangeStatus::Pending) }).await;

        assert!(result.is_err());
    }

    #[test]
    fn test_find_zone_requires_label_boundary() {
        assert_eq!(find_zone("_acme-challenge.notexample.com", &zones()), None);
        assert_eq!(find_zone("_acme-challenge.example.net", &zones()), None);
    }
}
