//! Runs the external GTFS transformation tool as a child process.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::TransformerConfig;
use crate::contract::{TransformError, Transformer};

/// Invokes `<command...> --transform=<script> <input_dir> <output_dir>`, the
/// calling convention of the OneBusAway transformer CLI.
#[derive(Debug, Clone)]
pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandTransformer {
    pub fn new(config: &TransformerConfig) -> Result<Self, TransformError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or(TransformError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        })
    }

    fn build(&self, input_dir: &Path, script: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(format!("--transform={}", script.display()))
            .arg(input_dir)
            .arg(output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transformer for CommandTransformer {
    async fn transform(
        &self,
        input_dir: &Path,
        script: &Path,
        output_dir: &Path,
    ) -> Result<(), TransformError> {
        tokio::fs::create_dir_all(output_dir).await?;

        let program = &self.program;
        info!(
            program = %program,
            script = %script.display(),
            input = %input_dir.display(),
            output = %output_dir.display(),
            "Launching transformer"
        );

        let child = self
            .build(input_dir, script, output_dir)
            .spawn()
            .map_err(|source| {
                error!(error = ?source, program = %program, "Failed to launch transformer process");
                TransformError::Spawn {
                    program: program.to_string(),
                    source,
                }
            })?;

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    error!(timeout_secs = limit.as_secs(), "Transformer timed out, killing it");
                    return Err(TransformError::Timeout(limit.as_secs()));
                }
            },
            None => child.wait_with_output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(stdout = %stdout.trim(), "Transformer stdout");
        }

        if output.status.success() {
            info!(status = %output.status, "Transformer finished");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(status = %output.status, stderr = %stderr, "Transformer exited with non-zero code");
            Err(TransformError::Failed {
                status: output.status.to_string(),
                stderr,
            })
        }
    }
}
