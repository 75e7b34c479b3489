use super::CertificateDecoder;
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

/// Shell out to `openssl x509 -noout -text` for the human readable dump of a certificate
pub(crate) struct OpensslDecoder;

#[async_trait]
impl CertificateDecoder for OpensslDecoder {
    async fn decode(&self, certificate: &str) -> Result<String> {
        let mut child = tokio::process::Command::new("openssl")
            .arg("x509")
            .arg("-noout")
            .arg("-text")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawning openssl")?;

        let mut stdin = child.stdin.take().context("openssl stdin")?;
        stdin
            .write_all(certificate.as_bytes())
            .await
            .context("writing certificate to openssl")?;
        // Close stdin so openssl sees EOF
        drop(stdin);

        let output = child.wait_with_output().await.context("waiting for openssl")?;

        ensure!(
            output.status.success(),
            "openssl failed with status code {}, stderr: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr),
        );

        String::from_utf8(output.stdout).context("openssl output is not UTF-8")
    }
}
