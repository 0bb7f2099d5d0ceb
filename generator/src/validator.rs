//! Invokes the forwarder binary in dry-run mode against a candidate config.

use std::time::Duration;

use fluentd::exec::{exec_and_get_output, strip_non_printable};
use tracing::{debug, error, info};

const EXTRA_VALIDATION_SOURCE: &str = "\n# extreme validation\n<source>\n  @type just_exit\n</source>\n";

#[derive(Debug, thiserror::Error)]
pub enum ValidatorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Rejected(String),
}

pub struct Validator {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Validator {
    pub fn new(command_line: &str, timeout: Duration) -> Self {
        let mut parts = command_line.trim().split_whitespace();
        let command = parts.next().unwrap_or_default().to_string();
        let args = parts.map(str::to_string).collect();
        Validator { command, args, timeout }
    }

    async fn run_against_tempfile(&self, contents: &str, namespace: &str, extra_args: &[&str]) -> Result<(), ValidatorError> {
        let mut path = std::env::temp_dir();
        path.push(format!("validate-{namespace}-{}.conf", std::process::id()));
        tokio::fs::write(&path, contents).await?;

        let mut args = self.args.clone();
        args.extend(extra_args.iter().map(|s| s.to_string()));
        args.push(path.to_string_lossy().into_owned());

        let result = exec_and_get_output(&self.command, self.timeout, &args).await;
        let _ = tokio::fs::remove_file(&path).await;

        match result {
            Ok(out) => {
                debug!(namespace, %out, "validation succeeded");
                Ok(())
            }
            Err(err) => {
                let out = strip_non_printable(&err.to_string());
                error!(namespace, %out, "validation command failed");
                Err(ValidatorError::Rejected(out))
            }
        }
    }

    /// Runs the forwarder's dry-run check against `config` as it will
    /// actually be written to disk.
    pub async fn validate_config(&self, config: &str, namespace: &str) -> Result<(), ValidatorError> {
        self.run_against_tempfile(config, namespace, &["--dry-run", "-c"]).await
    }

    /// Runs a stricter check (no supervisor process, config must terminate
    /// cleanly) against a tenant-isolated standalone config.
    pub async fn validate_config_extremely(&self, config: &str, namespace: &str) -> Result<(), ValidatorError> {
        let contents = format!("{config}{EXTRA_VALIDATION_SOURCE}");
        self.run_against_tempfile(&contents, namespace, &["-q", "--no-supervisor", "-c"]).await
    }

    /// Sanity-checks that the configured binary exists and reports its version.
    pub async fn ensure_usable(&self) -> Result<(), ValidatorError> {
        let mut args = self.args.clone();
        args.push("--version".to_string());
        let out = exec_and_get_output(&self.command, self.timeout, &args)
            .await
            .map_err(|err| ValidatorError::Rejected(format!("invalid forwarder binary {}: {err}", self.command)))?;
        info!(command = %self.command, version = out.trim(), "validator ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_a_command_that_succeeds() {
        let validator = Validator::new("true", Duration::from_secs(5));
        validator.validate_config("irrelevant", "ns").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_a_command_that_fails() {
        let validator = Validator::new("false", Duration::from_secs(5));
        let err = validator.validate_config("irrelevant", "ns").await.unwrap_err();
        assert!(matches!(err, ValidatorError::Rejected(_)));
    }
}
