use crate::{
    domains::DomainSet,
    issuer::{IssuerDirs, LETSENCRYPT_PRODUCTION_DIRECTORY},
};
use anyhow::{ensure, Context, Result};
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use serde_json::Value;
use std::{path::PathBuf, str::FromStr};

pub(crate) use self::path::ConfigPath;
use self::cli::Cli;

mod cli;
mod path;

/// Name of the environment variable pointing at a YAML config file, used instead of CLI arguments
/// and the individual environment variables
pub(crate) const CONFIG_FILE_ENV: &str = "CERTRENEW_CONFIG";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum IssuerKind {
    Native,
    Certbot,
}

/// All configuration options, coalesced into a single struct for convenience
#[derive(serde::Serialize)]
pub(crate) struct RenewConfig {
    pub(crate) domains: DomainSet,
    pub(crate) email: String,
    pub(crate) days_to_expire: i64,
    pub(crate) s3_bucket_name: Option<String>,
    pub(crate) notification_sns_arn: Option<String>,
    #[serde(serialize_with = "redacted")]
    pub(crate) sentry_dsn: Option<sentry::types::Dsn>,
    #[serde(serialize_with = "display")]
    pub(crate) acme_server: url::Url,
    pub(crate) issuer: IssuerKind,
    pub(crate) work_root: PathBuf,
    pub(crate) dry_run: bool,
    #[serde(serialize_with = "display")]
    pub(crate) log_level: LevelFilter,
    pub(crate) summary_file: Option<ConfigPath>,
}

fn redacted<T, S: serde::Serializer>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_str("<redacted>"),
        None => serializer.serialize_none(),
    }
}

fn display<T: std::fmt::Display, S: serde::Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Unset and empty mean the same thing for the optional destinations
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

fn parse_sentry_dsn(value: Option<String>) -> Result<Option<sentry::types::Dsn>> {
    non_empty(value)
        .map(|dsn| sentry::types::Dsn::from_str(&dsn).context("parsing sentry DSN"))
        .transpose()
}

fn optional_string(value: &mut serde_json::Map<String, Value>, key: &str) -> Result<Option<String>> {
    Ok(match value.remove(key) {
        Some(Value::Null) | None => None,
        Some(value) => non_empty(Some(value.as_str().context(format!("{} must be a string", key))?.to_string())),
    })
}

impl RenewConfig {
    pub(crate) fn issuer_dirs(&self) -> IssuerDirs {
        IssuerDirs::under(&self.work_root)
    }

    pub(crate) fn parse_from_config_file(config_bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(config_bytes)?;

        let mut value = value.as_object().context("config file must be a YAML object")?.clone();

        let domains = match value.remove("domains").context("domains is required")? {
            Value::String(domains) => DomainSet::parse(&domains)?,
            Value::Array(domains) => DomainSet::parse(
                &domains
                    .iter()
                    .map(|domain| domain.as_str().context("domains must be an array of strings"))
                    .collect::<Result<Vec<_>>>()?
                    .join(","),
            )?,
            _ => anyhow::bail!("domains must be a string or an array of strings"),
        };

        let email = optional_string(&mut value, "email")?.context("email is required")?;

        let days_to_expire = match value.remove("days_to_expire") {
            Some(value) => value.as_i64().context("days_to_expire must be an integer")?,
            None => 30,
        };

        let s3_bucket_name = optional_string(&mut value, "s3_bucket_name")?;
        let notification_sns_arn = optional_string(&mut value, "notification_sns_arn")?;
        let sentry_dsn = parse_sentry_dsn(optional_string(&mut value, "sentry_dsn")?)?;

        let acme_server = url::Url::parse(
            &optional_string(&mut value, "acme_server")?.unwrap_or_else(|| LETSENCRYPT_PRODUCTION_DIRECTORY.to_string()),
        )
        .context("acme_server must be a URL")?;

        let issuer = match optional_string(&mut value, "issuer")? {
            Some(issuer) => IssuerKind::from_str(&issuer, true)
                .map_err(|err| anyhow::anyhow!(err))
                .context("issuer must be one of native, certbot")?,
            None => IssuerKind::Native,
        };

        let work_root = PathBuf::from(optional_string(&mut value, "work_root")?.unwrap_or_else(|| "/tmp".to_string()));

        let dry_run = value
            .remove("dry_run")
            .unwrap_or(Value::Bool(false))
            .as_bool()
            .context("dry_run must be a boolean")?;

        let log_level = match optional_string(&mut value, "log_level")? {
            Some(log_level) => LevelFilter::from_str(&log_level).context("log_level must be a log level")?,
            None => LevelFilter::Info,
        };

        let summary_file = match optional_string(&mut value, "summary_file")? {
            Some(summary_file) => Some(ConfigPath::new(&summary_file).context(format!("summary_file {}", summary_file))?),
            None => None,
        };

        ensure!(
            value.is_empty(),
            "unknown keys {:?} in config file",
            value.keys().map(|key| key.to_string()).collect::<Vec<String>>().join(", ")
        );

        Ok(Self {
            domains,
            email,
            days_to_expire,
            s3_bucket_name,
            notification_sns_arn,
            sentry_dsn,
            acme_server,
            issuer,
            work_root,
            dry_run,
            log_level,
            summary_file,
        })
    }

    pub(crate) fn parse_from_cli(cli: Cli) -> Result<Self> {
        ensure!(!cli.email.is_empty(), "email must not be empty");

        Ok(Self {
            domains: cli.domains,
            email: cli.email,
            days_to_expire: cli.days_to_expire,
            s3_bucket_name: non_empty(cli.s3_bucket_name),
            notification_sns_arn: non_empty(cli.notification_sns_arn),
            sentry_dsn: parse_sentry_dsn(cli.sentry_dsn)?,
            acme_server: cli.acme_server,
            issuer: cli.issuer,
            work_root: cli.work_root,
            dry_run: cli.dry_run,
            log_level: cli.log_level,
            summary_file: cli.summary_file.map(ConfigPath::from),
        })
    }

    pub(crate) fn new() -> Result<RenewConfig> {
        Ok(match std::env::var(CONFIG_FILE_ENV) {
            Ok(var) => {
                let num_args = std::env::args().len();

                ensure!(
                    num_args == 1,
                    "{CONFIG_FILE_ENV} is set, but there are {num_args} CLI arguments. {CONFIG_FILE_ENV} is meant to be used with no arguments."
                );

                RenewConfig::parse_from_config_file(&std::fs::read(&var).context(format!("reading {} file {}", CONFIG_FILE_ENV, var))?)
                    .context(format!("parsing {} file {}", CONFIG_FILE_ENV, var))?
            }
            Err(_) => {
                let cli = match Cli::try_parse() {
                    Ok(cli) => cli,
                    // --help and --version
                    Err(err) if !err.use_stderr() => err.exit(),
                    Err(err) => return Err(err).context("CLI parsing"),
                };

                RenewConfig::parse_from_cli(cli).context("CLI parsing")?
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSN: &str = "https://public@sentry.example.com/42";

    #[test]
    fn test_parse_from_config_file() -> Result<()> {
        let config = RenewConfig::parse_from_config_file(
            format!(
                r#"
domains: example.com,www.example.com
email: admin@example.com
days_to_expire: 14
s3_bucket_name: certificates
notification_sns_arn: arn:aws:sns:us-east-1:123456789012:certificates
sentry_dsn: {DSN}
issuer: certbot
work_root: /var/tmp
dry_run: true
log_level: debug
"#
            )
            .as_bytes(),
        )?;

        assert_eq!(config.domains.to_string(), "example.com,www.example.com");
        assert_eq!(config.email, "admin@example.com");
        assert_eq!(config.days_to_expire, 14);
        assert_eq!(config.s3_bucket_name.as_deref(), Some("certificates"));
        assert_eq!(
            config.notification_sns_arn.as_deref(),
            Some("arn:aws:sns:us-east-1:123456789012:certificates")
        );
        assert!(config.sentry_dsn.is_some());
        assert_eq!(config.acme_server.as_str(), LETSENCRYPT_PRODUCTION_DIRECTORY);
        assert_eq!(config.issuer, IssuerKind::Certbot);
        assert_eq!(config.issuer_dirs().config_dir, PathBuf::from("/var/tmp/config-dir"));
        assert!(config.dry_run);
        assert_eq!(config.log_level, LevelFilter::Debug);

        Ok(())
    }

    #[test]
    fn test_parse_from_config_file_defaults() -> Result<()> {
        let config = RenewConfig::parse_from_config_file(
            br#"
domains: [example.com, www.example.com]
email: admin@example.com
s3_bucket_name: ""
"#,
        )?;

        assert_eq!(config.domains.primary(), "example.com");
        assert_eq!(config.days_to_expire, 30);
        assert_eq!(config.s3_bucket_name, None);
        assert_eq!(config.notification_sns_arn, None);
        assert!(config.sentry_dsn.is_none());
        assert_eq!(config.issuer, IssuerKind::Native);
        assert_eq!(config.work_root, PathBuf::from("/tmp"));
        assert!(!config.dry_run);

        Ok(())
    }

    #[test]
    fn test_parse_from_config_file_rejects_bad_input() {
        for config in [
            "email: admin@example.com\n",
            "domains: example.com\n",
            "domains: example.com\nemail: admin@example.com\nunknown: 1\n",
            "domains: example.com\nemail: admin@example.com\ndays_to_expire: soon\n",
            "domains: example.com\nemail: admin@example.com\nsentry_dsn: not a dsn\n",
            "domains: example.com\nemail: admin@example.com\nissuer: acme.sh\n",
            "domains: ',example.com'\nemail: admin@example.com\n",
        ] {
            assert!(RenewConfig::parse_from_config_file(config.as_bytes()).is_err(), "{}", config);
        }
    }

    #[test]
    fn test_parse_from_cli() -> Result<()> {
        let cli = Cli::try_parse_from([
            "certrenew",
            "--domains",
            "example.com,www.example.com",
            "--email",
            "admin@example.com",
            "--days-to-expire",
            "10",
            "--s3-bucket-name",
            "",
            "--sentry-dsn",
            DSN,
        ])?;

        let config = RenewConfig::parse_from_cli(cli)?;

        assert_eq!(config.domains.primary(), "example.com");
        assert_eq!(config.days_to_expire, 10);
        assert_eq!(config.s3_bucket_name, None);
        assert!(config.sentry_dsn.is_some());
        assert_eq!(config.issuer, IssuerKind::Native);

        Ok(())
    }

    #[test]
    fn test_summary_redacts_sentry_dsn() -> Result<()> {
        let config = RenewConfig::parse_from_config_file(
            format!("domains: example.com\nemail: admin@example.com\nsentry_dsn: {DSN}\n").as_bytes(),
        )?;

        let serialized = serde_json::to_string(&config)?;

        assert!(!serialized.contains("public@sentry"));
        assert!(serialized.contains("<redacted>"));
        assert!(serialized.contains("\"issuer\":\"native\""));

        Ok(())
    }
}
