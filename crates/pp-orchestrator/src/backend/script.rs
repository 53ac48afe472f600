//! Runner for the host backend controller script
//!
//! The script is invoked as `<interpreter> <script> <action> [args..]` and
//! prints a single JSON object on stdout:
//!
//! ```text
//! {"success": true, "data": ...}
//! {"success": false, "error": "..."}
//! ```
//!
//! Diagnostic output may precede the result, so the last non-empty line of
//! stdout is parsed.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;

/// Failures running the backend script
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("Unparsable backend output: {0}")]
    Malformed(String),

    /// The script ran and reported failure
    #[error("{0}")]
    Reported(String),
}

#[derive(Debug, Deserialize)]
struct Reply {
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Invokes backend actions
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    interpreter: String,
    script: PathBuf,
}

impl ScriptRunner {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Run an action and return its `data` payload
    pub async fn run(&self, action: &str, args: &[&str]) -> Result<Value, ScriptError> {
        tracing::debug!("backend {} {:?}", action, args);

        let output = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg(action)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ScriptError::Spawn {
                program: self.interpreter.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_reply(&stdout) {
            Ok(reply) => reply,
            Err(e) if !output.status.success() => {
                tracing::debug!("backend {} output unusable: {}", action, e);
                Err(ScriptError::Exit {
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Parse the last JSON line of script output
///
/// The outer `Result` is a protocol failure; the inner one is what the
/// script itself reported.
pub fn parse_reply(stdout: &str) -> Result<Result<Value, ScriptError>, ScriptError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ScriptError::Malformed("empty output".to_string()))?;

    let reply: Reply =
        serde_json::from_str(line).map_err(|e| ScriptError::Malformed(format!("{}: {}", e, line)))?;

    if reply.success {
        Ok(Ok(reply.data))
    } else {
        Ok(Err(ScriptError::Reported(
            reply
                .error
                .unwrap_or_else(|| "backend reported failure without a message".to_string()),
        )))
    }
}
