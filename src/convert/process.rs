//! External tool invocation

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::render::{RenderError, RenderResult};

/// Run `program` to completion and return its stdout
///
/// The child is killed if the returned future is dropped. Spawn failures
/// and non-zero exits are conversion errors carrying the tool's stderr.
pub(crate) async fn run_tool<I, S>(program: &Path, args: I) -> RenderResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| RenderError::Conversion(format!("Failed to run {}: {}", tool, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RenderError::Conversion(format!(
            "{} failed ({}): {}",
            tool,
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
