use anyhow::Result;
use std::time::Duration;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Somewhere to send errors that end a run
pub(crate) trait ErrorSink: Send + Sync {
    fn capture(&self, err: &anyhow::Error);
}

pub(crate) struct SentrySink {
    guard: sentry::ClientInitGuard,
}

impl SentrySink {
    pub(crate) fn new(dsn: sentry::types::Dsn) -> Self {
        Self {
            guard: sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }),
        }
    }

    /// For errors that happen before the configuration is parsed. An unparsable DSN is ignored,
    /// there is nowhere to report that to.
    pub(crate) fn from_env() -> Option<Self> {
        let dsn = std::env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty())?;
        dsn.parse().ok().map(Self::new)
    }
}

impl ErrorSink for SentrySink {
    fn capture(&self, err: &anyhow::Error) {
        let event_id = sentry::integrations::anyhow::capture_anyhow(err);

        // The process may be frozen or exit right after the run fails
        if !self.guard.flush(Some(FLUSH_TIMEOUT)) {
            log::warn!("timed out sending error event {} to sentry", event_id);
        }
    }
}

/// Hand a failed run's error to the sink, if there is one, then pass the result through
/// unchanged
pub(crate) fn report_failure<T>(sink: Option<&dyn ErrorSink>, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        log::error!("renewal failed: {:#}", err);

        if let Some(sink) = sink {
            sink.capture(err);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;
    use serial_test::serial;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        captured: Mutex<Vec<String>>,
    }

    impl ErrorSink for RecordingSink {
        fn capture(&self, err: &anyhow::Error) {
            self.captured.lock().unwrap().push(format!("{:#}", err));
        }
    }

    #[test]
    fn test_failure_is_reported_once_and_returned() {
        let sink = RecordingSink::default();

        let result: Result<()> = report_failure(Some(&sink), Err(anyhow::anyhow!("import rejected")));

        assert_eq!(result.map_err(|err| err.to_string()), Err("import rejected".to_string()));
        assert_eq!(*sink.captured.lock().unwrap(), vec!["import rejected"]);
    }

    #[test]
    fn test_success_is_not_reported() {
        let sink = RecordingSink::default();

        assert_eq!(report_failure(Some(&sink), Ok(3)).ok(), Some(3));
        assert!(sink.captured.lock().unwrap().is_empty());
    }

    #[test]
    #[serial]
    fn test_failure_without_sink_is_logged() {
        logging::tests::capture_logs();

        let result: Result<()> = report_failure(None, Err(anyhow::anyhow!("import rejected")));

        assert!(result.is_err());
        assert!(logging::take_records()
            .iter()
            .any(|line| line.contains("ERROR") && line.ends_with("renewal failed: import rejected")));
    }
}
