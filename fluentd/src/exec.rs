use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("{command} exited with status {status}: {output}")]
    NonZero {
        command: String,
        status: std::process::ExitStatus,
        output: String,
    },
}

/// Runs `command args...`, merging stdout and stderr, and returns the
/// combined output. If the process hasn't finished within `timeout` it is
/// killed and `ExecError::Timeout` is returned; whatever output was captured
/// up to that point is not surfaced, matching the bounded-wait contract
/// callers rely on for validator invocations.
pub async fn exec_and_get_output(
    command: &str,
    timeout: Duration,
    args: &[String],
) -> Result<String, ExecError> {
    debug!(command, ?args, ?timeout, "executing subprocess");
    let mut child = Command::new(command)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let mut stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");

    let run = async {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let (_, _, status) = tokio::join!(
            stdout.read_to_end(&mut out),
            stderr.read_to_end(&mut err),
            child.wait(),
        );
        out.extend_from_slice(&err);
        (status, out)
    };

    match tokio::time::timeout(timeout, run).await {
        Ok((status, out)) => {
            let text = String::from_utf8_lossy(&out).into_owned();
            match status {
                Ok(status) if status.success() => Ok(text),
                Ok(status) => Err(ExecError::NonZero {
                    command: command.to_string(),
                    status,
                    output: text,
                }),
                Err(source) => Err(ExecError::Spawn {
                    command: command.to_string(),
                    source,
                }),
            }
        }
        Err(_) => {
            let _ = child.start_kill();
            Err(ExecError::Timeout {
                command: command.to_string(),
                timeout,
            })
        }
    }
}

/// Strips non-printable runes (ANSI escapes, control characters) from
/// validator output before surfacing it as an error message.
pub fn strip_non_printable(s: &str) -> String {
    s.chars().filter(|c| !c.is_control() || *c == '\n').collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_simple_command() {
        let out = exec_and_get_output("echo", Duration::from_secs(5), &["hi".to_string()])
            .await
            .unwrap();
        assert_eq!(out.trim(), "hi");
    }

    #[tokio::test]
    async fn times_out() {
        let err = exec_and_get_output(
            "sleep",
            Duration::from_millis(50),
            &["5".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[test]
    fn strips_escape_codes() {
        assert_eq!(strip_non_printable("\x1b[31mred\x1b[0m"), "red");
    }
}
