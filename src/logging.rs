use crate::{
    config::{ConfigPath, RenewConfig},
    renew::RenewalSummary,
};
use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::{LevelFilter, Metadata, Record};
use std::sync::{Arc, Mutex};

struct CertRenewLogger;

static LOGGER: CertRenewLogger = CertRenewLogger;

pub(crate) fn init() -> Result<()> {
    match log::set_logger(&LOGGER) {
        Ok(_) => log::set_max_level(LevelFilter::Info),
        Err(_) => bail!("logger initialization failed"),
    };

    Ok(())
}

pub(crate) fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

lazy_static! {
    pub(crate) static ref LOG_RECORDS: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
}

/// Drain the captured log lines, so a warm Lambda container doesn't carry them over into the next
/// invocation
pub(crate) fn take_records() -> Vec<String> {
    match LOG_RECORDS.lock() {
        Ok(mut log_records) => std::mem::take(&mut *log_records),
        Err(err) => vec![format!("Failed to lock log records: {}", err)],
    }
}

fn format_record(record: &Record) -> String {
    format!(
        "{} - {} - {}:{}: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.args()
    )
}

impl log::Log for CertRenewLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_string = format_record(record);

            {
                let mut log_records = match LOG_RECORDS.lock() {
                    Ok(log_records) => log_records,
                    Err(err) => {
                        println!("Failed to lock log records: {}", err);
                        return;
                    }
                };
                log_records.push(log_string.clone());
            }

            println!("{}", log_string);
        }
    }

    fn flush(&self) {}
}

/// Everything an invocation did, as returned to the Lambda runtime and written to the summary file
#[derive(serde::Serialize)]
pub(crate) struct Summary<'a> {
    pub(crate) config: &'a RenewConfig,
    pub(crate) renewal: Option<RenewalSummary>,
    pub(crate) error: Option<String>,
    pub(crate) logs: Vec<String>,
}

impl<'a> Summary<'a> {
    pub(crate) fn new(config: &'a RenewConfig, result: &Result<RenewalSummary>) -> Self {
        let (renewal, error) = match result {
            Ok(renewal) => (Some(renewal.clone()), None),
            Err(err) => (None, Some(format!("{:#}", err))),
        };

        Self {
            config,
            renewal,
            error,
            logs: take_records(),
        }
    }
}

pub(crate) fn write_summary(summary: &Summary, summary_file: &ConfigPath) -> Result<()> {
    let summary_file = summary_file.create().context("opening summary file")?;
    serde_yaml::to_writer(summary_file, summary).context("serializing summary file")?;

    Ok(())
}
