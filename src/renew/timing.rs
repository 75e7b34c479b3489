#[derive(Clone, Debug)]
pub(crate) struct RunTime {
    start: std::time::Instant,
    end: std::time::Instant,
}

impl RunTime {
    pub(crate) fn since_start(start: std::time::Instant) -> Self {
        Self {
            start,
            end: std::time::Instant::now(),
        }
    }

    pub(crate) fn duration(&self) -> std::time::Duration {
        self.end - self.start
    }
}

impl serde::Serialize for RunTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let duration = self.duration();
        serializer.serialize_str(&format!("{}.{:03}s", duration.as_secs(), duration.subsec_millis()))
    }
}

/// Steps that didn't run (because no renewal was needed, or the destination isn't configured)
/// have no run time
#[derive(serde::Serialize, Clone, Debug, Default)]
pub(crate) struct RunTimes {
    pub(crate) check_run_time: Option<RunTime>,
    pub(crate) issue_run_time: Option<RunTime>,
    pub(crate) import_run_time: Option<RunTime>,
    pub(crate) upload_run_time: Option<RunTime>,
    pub(crate) notify_run_time: Option<RunTime>,
    pub(crate) total_run_time: Option<RunTime>,
}

/// Run `step` and record how long it took into `slot`, whether it succeeded or not
pub(crate) async fn timed<T, F>(slot: &mut Option<RunTime>, step: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let result = step.await;
    *slot = Some(RunTime::since_start(start));
    result
}
