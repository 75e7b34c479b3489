use anyhow::{Context, Result};
use fn_error_context::context;
use std::path::Path;
use tokio::io::AsyncReadExt;

pub(crate) async fn read_file_to_string(file_path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(file_path).await?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).await.context("failed to read file")?;
    Ok(contents)
}

/// Read a file holding secret material and remove it right away
#[context("reading and deleting {}", file_path.display())]
pub(crate) async fn read_and_delete_file(file_path: &Path) -> Result<String> {
    let contents = read_file_to_string(file_path).await?;
    tokio::fs::remove_file(file_path).await.context("removing file")?;
    Ok(contents)
}
