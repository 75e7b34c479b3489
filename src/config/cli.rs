use super::IssuerKind;
use crate::{domains::DomainSet, issuer::LETSENCRYPT_PRODUCTION_DIRECTORY};
use clap::Parser;
use clio::ClioPath;
use log::LevelFilter;
use std::path::PathBuf;

/// Renew a Let's Encrypt certificate through a DNS challenge and publish it to ACM, S3 and SNS.
///
/// Every option can also be given through the environment variable named next to it, which is
/// how the Lambda deployment configures it.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Comma separated list of domains to request the certificate for. The first domain is the
    /// primary one, it names the certificate directory and the S3 keys
    #[clap(long, env = "LETSENCRYPT_DOMAINS", value_parser = DomainSet::parse)]
    pub(crate) domains: DomainSet,

    /// Contact email for the ACME account
    #[clap(long, env = "LETSENCRYPT_EMAIL")]
    pub(crate) email: String,

    /// Renew when the existing certificate expires in this many days or fewer
    #[clap(long, env = "DAYS_TO_EXPIRE", default_value_t = 30, allow_negative_numbers = true)]
    pub(crate) days_to_expire: i64,

    /// If given, the certificate, key and chain are also written to this bucket under
    /// certbot/<primary-domain>/
    #[clap(long, env = "S3_BUCKET_NAME")]
    pub(crate) s3_bucket_name: Option<String>,

    /// If given, a message with the decoded certificate is published to this SNS topic
    #[clap(long, env = "NOTIFICATION_SNS_ARN")]
    pub(crate) notification_sns_arn: Option<String>,

    /// If given, failures are reported to this Sentry DSN before the run fails
    #[clap(long, env = "SENTRY_DSN", hide_env_values = true)]
    pub(crate) sentry_dsn: Option<String>,

    /// ACME directory to request the certificate from. Point this at the Let's Encrypt staging
    /// directory while testing
    #[clap(long, env = "ACME_SERVER", default_value = LETSENCRYPT_PRODUCTION_DIRECTORY)]
    pub(crate) acme_server: url::Url,

    /// How to talk to the ACME server. "native" answers the DNS challenge through Route 53
    /// directly, "certbot" runs the certbot CLI with its Route 53 plugin
    #[clap(long, env = "CERT_ISSUER", value_enum, default_value_t = IssuerKind::Native)]
    pub(crate) issuer: IssuerKind,

    /// Directory under which the issuer keeps its config, work and logs directories
    #[clap(long, env = "CERTRENEW_WORK_ROOT", default_value = "/tmp")]
    pub(crate) work_root: PathBuf,

    /// Only check whether the existing certificate needs renewing, don't issue or publish
    /// anything
    #[clap(long, env = "DRY_RUN")]
    pub(crate) dry_run: bool,

    /// Log verbosity
    #[clap(long, env = "LOG_LEVEL", default_value_t = LevelFilter::Info)]
    pub(crate) log_level: LevelFilter,

    /// Write a YAML summary of the run to this file
    #[clap(long, value_parser = clap::value_parser!(ClioPath))]
    pub(crate) summary_file: Option<ClioPath>,
}
