//! Scoped subprocess invocation shared by the ASR and TTS drivers.
//!
//! Children get an allow-listed environment, captured output, and a hard
//! timeout. `kill_on_drop` guarantees a turn never outlives its subprocess:
//! dropping the future (timeout or turn abort) kills the child.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use sauti_core::error::{Error, Result};

/// Environment variables a child process may inherit.
const ENV_ALLOWLIST: [&str; 5] = ["PATH", "HOME", "TMPDIR", "LANG", "LC_ALL"];

/// Longest stderr/stdout preview that may reach the logs.
pub const OUTPUT_PREVIEW_BYTES: usize = 800;

pub struct Invocation<'a> {
    pub name: &'a str,
    pub bin: &'a Path,
    pub args: Vec<String>,
    pub stdin: Option<&'a [u8]>,
    pub timeout_secs: u64,
}

/// Run to completion and return captured stdout, failing on non-zero exit.
pub async fn run_captured(invocation: Invocation<'_>) -> Result<Vec<u8>> {
    let Invocation {
        name,
        bin,
        args,
        stdin,
        timeout_secs,
    } = invocation;

    let mut cmd = Command::new(bin);
    cmd.args(&args)
        .env_clear()
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for key in ENV_ALLOWLIST {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Subprocess(format!("{name} spawn {}: {e}", bin.display())))?;

    if let Some(input) = stdin {
        let mut handle = child
            .stdin
            .take()
            .ok_or_else(|| Error::Subprocess(format!("{name}: stdin unavailable")))?;
        handle
            .write_all(input)
            .await
            .map_err(|e| Error::Subprocess(format!("{name} stdin write: {e}")))?;
        // Dropping the handle closes the pipe so the child sees EOF.
    }

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| Error::Subprocess(format!("{name} timed out after {timeout_secs}s")))?
        .map_err(|e| Error::Subprocess(format!("{name} wait: {e}")))?;

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        debug!(
            "{name} exited with {code}, stderr: {}",
            preview(&output.stderr)
        );
        return Err(Error::Subprocess(format!(
            "{name} exited with {code}: {}",
            preview(&output.stderr)
        )));
    }

    Ok(output.stdout)
}

/// Lossy, size-capped view of captured output for logging.
pub fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.len() <= OUTPUT_PREVIEW_BYTES {
        return trimmed.to_string();
    }
    let mut cut = OUTPUT_PREVIEW_BYTES;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &trimmed[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn preview_caps_length_on_char_boundary() {
        let short = preview(b"  hello  ");
        assert_eq!(short, "hello");

        let long = "é".repeat(600); // 1200 bytes
        let capped = preview(long.as_bytes());
        assert!(capped.len() <= OUTPUT_PREVIEW_BYTES + '…'.len_utf8());
        assert!(capped.ends_with('…'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_and_feeds_stdin() {
        let out = run_captured(Invocation {
            name: "cat",
            bin: &PathBuf::from("/bin/cat"),
            args: vec![],
            stdin: Some(b"hello subprocess"),
            timeout_secs: 5,
        })
        .await
        .unwrap();
        assert_eq!(out, b"hello subprocess");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_a_subprocess_error() {
        let err = run_captured(Invocation {
            name: "false",
            bin: &PathBuf::from("/bin/false"),
            args: vec![],
            stdin: None,
            timeout_secs: 5,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Subprocess(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_the_child() {
        let err = run_captured(Invocation {
            name: "sleep",
            bin: &PathBuf::from("/bin/sleep"),
            args: vec!["30".to_string()],
            stdin: None,
            timeout_secs: 1,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
