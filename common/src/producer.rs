// Producer task runner
//
// The producer is an external program started with no arguments from the
// repository root. It may rewrite any file in the working tree; the pipeline
// only looks at its exit status.

use crate::config::ProducerConfig;
use crate::errors::ProducerError;
use crate::models::Environment;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, instrument};

/// Producer runs the content-generating step of a run
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, workdir: &Path, environment: &Environment)
        -> Result<(), ProducerError>;
}

/// Runs a configured entry point as a child process
#[derive(Debug, Clone)]
pub struct CommandProducer {
    entry_point: String,
    interpreted: bool,
    default_interpreter: String,
}

impl CommandProducer {
    pub fn new(config: &ProducerConfig, default_interpreter: impl Into<String>) -> Self {
        Self {
            entry_point: config.entry_point.clone(),
            interpreted: config.interpreted,
            default_interpreter: default_interpreter.into(),
        }
    }

    /// Program and arguments for this producer under `environment`
    pub fn command_line(&self, environment: &Environment) -> (PathBuf, Vec<String>) {
        if self.interpreted {
            let interpreter = environment
                .interpreter
                .clone()
                .unwrap_or_else(|| PathBuf::from(&self.default_interpreter));
            (interpreter, vec![self.entry_point.clone()])
        } else {
            (PathBuf::from(&self.entry_point), Vec::new())
        }
    }
}

/// PATH with `bin_dir` in front of the inherited value
fn path_with(bin_dir: &Path) -> Result<OsString, std::env::JoinPathsError> {
    let mut paths = vec![bin_dir.to_path_buf()];
    if let Some(current) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&current));
    }
    std::env::join_paths(paths)
}

#[async_trait]
impl Producer for CommandProducer {
    #[instrument(skip(self, environment), fields(entry_point = %self.entry_point))]
    async fn produce(
        &self,
        workdir: &Path,
        environment: &Environment,
    ) -> Result<(), ProducerError> {
        let (program, args) = self.command_line(environment);
        let spawn_error = |reason: String| ProducerError::Spawn {
            entry_point: self.entry_point.clone(),
            reason,
        };

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(bin_dir) = &environment.bin_dir {
            let path = path_with(bin_dir).map_err(|e| spawn_error(e.to_string()))?;
            command.env("PATH", path);
        }
        if let Some(root) = &environment.root {
            command.env("VIRTUAL_ENV", root);
        }

        info!(program = %program.display(), "Starting producer");
        let status = command
            .status()
            .await
            .map_err(|e| spawn_error(e.to_string()))?;

        match status.code() {
            Some(0) => {
                info!("Producer finished");
                Ok(())
            }
            Some(code) => Err(ProducerError::NonZeroExit(code)),
            None => Err(ProducerError::Terminated),
        }
    }
}
