use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::automation::errors::{PushCastError, Result};

/// Cap on each output-stream excerpt surfaced in error logs.
pub const MAX_OUTPUT_EXCERPT_BYTES: usize = 2048;

const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(600);

/// Stdout markers the legacy scripts emit.
const GENERATED_FILE_MARKER: &str = "GENERATED_FILE:";
const AUDIENCE_SIZE_MARKER: &str = "AUDIENCE_SIZE:";

#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub generated_files: Vec<String>,
    pub audience_size: i64,
    pub error: Option<String>,
}

/// Legacy subprocess audience executor. Scripts live under `scripts_dir`
/// and are invoked as `node <scripts_dir>/<script_id>.js`.
pub struct ScriptExecutor {
    scripts_dir: PathBuf,
    script_timeout: Duration,
}

impl ScriptExecutor {
    pub fn new(scripts_dir: PathBuf) -> Self {
        Self {
            scripts_dir,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
        }
    }

    pub fn with_timeout(scripts_dir: PathBuf, script_timeout: Duration) -> Self {
        Self {
            scripts_dir,
            script_timeout,
        }
    }

    pub async fn execute_script(
        &self,
        script_id: &str,
        args: &[String],
        execution_id: &str,
        is_dry_run: bool,
    ) -> Result<ScriptOutput> {
        let script_path = self.scripts_dir.join(format!("{script_id}.js"));
        if !script_path.exists() {
            return Err(PushCastError::AudienceGeneration(format!(
                "Audience script not found: {}",
                script_path.display()
            )));
        }

        let mut command = Command::new("node");
        command
            .arg(&script_path)
            .args(args)
            .env("EXECUTION_ID", execution_id)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if is_dry_run {
            command.arg("--dry-run");
        }

        tracing::info!(
            "Running audience script {} for execution {} (dry_run={})",
            script_id,
            execution_id,
            is_dry_run
        );

        let output = timeout(self.script_timeout, async {
            command
                .spawn()
                .map_err(|e| {
                    PushCastError::AudienceGeneration(format!(
                        "Failed to spawn audience script {script_id}: {e}"
                    ))
                })?
                .wait_with_output()
                .await
                .map_err(|e| {
                    PushCastError::AudienceGeneration(format!(
                        "Audience script {script_id} failed: {e}"
                    ))
                })
        })
        .await
        .map_err(|_| {
            PushCastError::AudienceGeneration(format!(
                "Audience script {} timed out after {}s",
                script_id,
                self.script_timeout.as_secs()
            ))
        })??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let success = output.status.success();

        let generated_files = stdout
            .lines()
            .filter_map(|line| line.strip_prefix(GENERATED_FILE_MARKER))
            .map(|path| path.trim().to_string())
            .collect();

        let audience_size = stdout
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix(AUDIENCE_SIZE_MARKER))
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);

        let error = if success {
            None
        } else {
            // Both streams survive into the log entry, each bounded.
            Some(format!(
                "Audience script {script_id} exited with {}; stdout: {}; stderr: {}",
                output.status,
                truncate_output(&stdout),
                truncate_output(&stderr)
            ))
        };

        Ok(ScriptOutput {
            success,
            stdout,
            stderr,
            generated_files,
            audience_size,
            error,
        })
    }
}

/// Trim a captured output stream to a bound suitable for log entries, on a
/// char boundary.
pub fn truncate_output(stream: &str) -> String {
    if stream.len() <= MAX_OUTPUT_EXCERPT_BYTES {
        return stream.to_string();
    }
    let mut end = MAX_OUTPUT_EXCERPT_BYTES;
    while !stream.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… (truncated)", &stream[..end])
}
