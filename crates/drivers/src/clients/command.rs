use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{InfraError, InfraResult};

/// Run `program` to completion and return its stdout.
pub(crate) async fn run(program: &str, args: &[String], stdin: Option<&[u8]>) -> InfraResult<String> {
    debug!(program = %program, args = ?redact(args), "Running command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| InfraError::spawn(program, e))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input)
            .await
            .map_err(|e| InfraError::spawn(program, e))?;
        drop(pipe);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| InfraError::spawn(program, e))?;

    if !output.status.success() {
        return Err(InfraError::CommandFailed {
            program: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// True when a failed command reported a missing object.
pub(crate) fn is_not_found(err: &InfraError) -> bool {
    matches!(err, InfraError::CommandFailed { stderr, .. } if stderr.to_lowercase().contains("not found"))
}

/// Hide bearer tokens from logs.
fn redact(args: &[String]) -> Vec<&str> {
    let mut hide_next = false;
    args.iter()
        .map(|arg| {
            if std::mem::take(&mut hide_next) {
                return "<redacted>";
            }
            if arg == "--token" || arg == "--kube-token" {
                hide_next = true;
            }
            arg.as_str()
        })
        .collect()
}
