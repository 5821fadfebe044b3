//! Codec that runs an external program
//!
//! Arguments may contain `{profile}`, `{input}`, `{output_dir}` and `{output}`
//! placeholders, filled in per file.

use super::{resolve_output, DeidCodec, DeidRequest};
use crate::config::CodecConfig;
use crate::domain::{DeidError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const STDERR_TAIL: usize = 2000;

#[derive(Debug, Clone)]
pub struct CommandCodec {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandCodec {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    fn render_args(&self, request: &DeidRequest<'_>, output: &std::path::Path) -> Vec<String> {
        let profile = request.profile_path.to_string_lossy();
        let input = request.input.to_string_lossy();
        let output_dir = request.output_dir.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{profile}", &profile)
                    .replace("{input}", &input)
                    .replace("{output_dir}", &output_dir)
                    .replace("{output}", &output)
            })
            .collect()
    }
}

#[async_trait]
impl DeidCodec for CommandCodec {
    async fn deidentify(&self, request: &DeidRequest<'_>) -> Result<PathBuf> {
        let expected = request.destination_name();
        let output = request.output_dir.join(&expected);
        let args = self.render_args(request, &output);

        tracing::debug!(program = %self.program, args = ?args, "Running de-identification program");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeidError::CodecFailure(format!("failed to start {}: {e}", self.program)))?;

        let finished = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                DeidError::CodecFailure(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| DeidError::CodecFailure(format!("{} failed: {e}", self.program)))?;

        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(DeidError::CodecFailure(format!(
                "{} exited with {}: {}",
                self.program,
                finished.status,
                tail.trim()
            )));
        }

        resolve_output(request.output_dir, &expected)
    }
}
