use anyhow::{Context, Result};
use config::RenewConfig;
use error_reporting::{ErrorSink, SentrySink};
use lambda_runtime::{service_fn, LambdaEvent};
use renew::Services;
use std::sync::Arc;

mod config;
mod domains;
mod error_reporting;
mod file_utils;
mod inventory;
mod issuer;
mod logging;
mod publisher;
mod renew;

/// Set by the Lambda runtime in every function's environment
const LAMBDA_RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

struct Handler {
    config: RenewConfig,
    services: Services,
    sentry: Option<SentrySink>,
}

impl Handler {
    /// One renewal run, as triggered by the scheduler. The event carries nothing we need.
    async fn invoke(&self) -> Result<serde_json::Value> {
        // Lines logged since the previous invocation of a warm container don't belong to this one
        logging::take_records();

        let result = renew::run(&self.config, &self.services, chrono::Utc::now()).await;

        let summary = logging::Summary::new(&self.config, &result);
        let response = serde_json::to_value(&summary).context("serializing summary");

        let written = match &self.config.summary_file {
            Some(summary_file) => logging::write_summary(&summary, summary_file).context("writing summary file"),
            None => Ok(()),
        };

        error_reporting::report_failure(
            self.sentry.as_ref().map(|sink| sink as &dyn ErrorSink),
            result.and(written).and(response),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;

    let config = match RenewConfig::new().context("parsing configuration") {
        Ok(config) => config,
        Err(err) => {
            let sentry = SentrySink::from_env();
            return error_reporting::report_failure(sentry.as_ref().map(|sink| sink as &dyn ErrorSink), Err(err));
        }
    };

    logging::set_level(config.log_level);

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

    let handler = Arc::new(Handler {
        services: Services::from_aws(&config, &sdk_config),
        sentry: config.sentry_dsn.clone().map(SentrySink::new),
        config,
    });

    if std::env::var(LAMBDA_RUNTIME_API_ENV).is_ok() {
        lambda_runtime::run(service_fn(|_event: LambdaEvent<serde_json::Value>| {
            let handler = Arc::clone(&handler);
            async move { handler.invoke().await.map_err(lambda_runtime::Error::from) }
        }))
        .await
        .map_err(|err| anyhow::anyhow!(err))
        .context("running lambda handler")
    } else {
        handler.invoke().await.map(|_| ())
    }
}
