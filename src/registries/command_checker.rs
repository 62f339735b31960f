use crate::config::CheckerConfig;
use crate::data::{CheckReport, StructuralChecker};
use crate::error::CheckerError;
use crate::registries::subprocess::{run_captured, SubprocessError};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Runs an external analyzer over a temporary copy of the source.
///
/// With a work directory the copy is placed there, inside the project, so
/// the analyzer resolves the project's packages.
#[derive(Debug, Clone)]
pub struct CommandChecker {
    program: String,
    args: Vec<String>,
    extension: String,
    timeout_secs: u64,
    work_dir: Option<PathBuf>,
}

impl CommandChecker {
    pub fn from_config(config: &CheckerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            extension: config.extension.clone(),
            timeout_secs: config.timeout_secs,
            work_dir: None,
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}

impl StructuralChecker for CommandChecker {
    fn check(&self, source: &str) -> Result<CheckReport, CheckerError> {
        let mut builder = tempfile::Builder::new();
        let suffix = format!(".{}", self.extension);
        builder.prefix("reconcile_check_").suffix(&suffix);
        let mut file = match &self.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        file.write_all(source.as_bytes())?;
        file.flush()?;

        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(file.path());
        let output = run_captured(&mut command, None, Duration::from_secs(self.timeout_secs))
            .map_err(|e| match e {
                SubprocessError::Spawn(source) => CheckerError::Spawn {
                    program: self.program.clone(),
                    source,
                },
                SubprocessError::Timeout => CheckerError::Timeout(self.timeout_secs),
                SubprocessError::Io(e) => CheckerError::Io(e),
            })?;

        let diagnostics = [output.stdout.trim(), output.stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        tracing::debug!(program = %self.program, ok = output.success, "structural check finished");

        Ok(CheckReport {
            ok: output.success,
            diagnostics,
        })
    }
}
