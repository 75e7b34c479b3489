use anyhow::{Context, Result};
use clio::ClioPath;

/// An output file named in the configuration. `-` means stdout.
#[derive(Clone, Debug)]
pub(crate) struct ConfigPath(ClioPath);

impl ConfigPath {
    pub(crate) fn new(path: &str) -> Result<Self> {
        Ok(Self(ClioPath::new(path).context(format!("invalid path {:?}", path))?))
    }

    /// Open for writing, truncating whatever is there
    pub(crate) fn create(&self) -> Result<clio::Output> {
        self.0
            .clone()
            .create()
            .context(format!("opening {} for writing", self.0.to_string_lossy()))
    }
}

impl From<ClioPath> for ConfigPath {
    fn from(clio_path: ClioPath) -> Self {
        Self(clio_path)
    }
}

impl serde::Serialize for ConfigPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0.to_string_lossy())
    }
}
