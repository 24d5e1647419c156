use crate::collab::VersionControl;
use crate::error::{Result, ShipwrightError};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// `VersionControl` backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitCommitter {
    timeout: Duration,
}

impl Default for GitCommitter {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl GitCommitter {
    pub fn available() -> bool {
        which::which("git").is_ok()
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<std::process::Output> {
        let fut = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ShipwrightError::Timeout {
                operation: format!("git {}", args.first().copied().unwrap_or_default()),
                seconds: self.timeout.as_secs(),
            })??;
        Ok(output)
    }

    async fn git_ok(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self.git(dir, args).await?;
        if !output.status.success() {
            return Err(ShipwrightError::collaborator(
                "git",
                format!(
                    "git {} failed: {}",
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl VersionControl for GitCommitter {
    async fn commit(&self, path: &Path, message: &str) -> Result<Option<String>> {
        self.git_ok(path, &["add", "-A"]).await?;
        // Exit 0 means nothing staged.
        let staged = self.git(path, &["diff", "--cached", "--quiet"]).await?;
        if staged.status.success() {
            return Ok(None);
        }
        self.git_ok(path, &["commit", "-q", "-m", message]).await?;
        let hash = self.git_ok(path, &["rev-parse", "HEAD"]).await?;
        Ok(Some(hash))
    }
}
