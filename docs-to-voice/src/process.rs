//! External tool invocation with timeouts

use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Result, VoiceError};

/// Locate `tool` on PATH
pub fn find_tool(tool: &str) -> Option<PathBuf> {
    which::which(tool).ok()
}

/// Locate `tool` on PATH or fail with `hint`
pub fn require_tool(tool: &'static str, hint: &str) -> Result<PathBuf> {
    find_tool(tool).ok_or_else(|| VoiceError::MissingTool {
        tool,
        hint: hint.to_string(),
    })
}

/// Run a tool to completion, failing on timeout or non-zero exit.
///
/// `stdin` is written to the child and then closed when provided.
pub async fn run_tool<I, S>(
    tool: &'static str,
    program: &OsStr,
    args: I,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let run = async {
        let mut child = cmd.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }
        Ok::<Output, std::io::Error>(child.wait_with_output().await?)
    };

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result.map_err(|e| VoiceError::ToolFailed {
            tool,
            detail: e.to_string(),
        })?,
        Err(_) => {
            return Err(VoiceError::ToolTimeout {
                tool,
                seconds: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = match output.status.code() {
            Some(code) if stderr.trim().is_empty() => format!("exit {}", code),
            Some(code) => format!("exit {}: {}", code, stderr.trim()),
            None => format!("terminated by signal: {}", stderr.trim()),
        };
        return Err(VoiceError::ToolFailed { tool, detail });
    }

    Ok(output)
}
