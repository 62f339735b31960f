use crate::config::GeneratorConfig;
use crate::data::{Completion, TextGenerator};
use crate::error::ServiceError;
use crate::registries::subprocess::{run_captured, SubprocessError};
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::time::Duration;

#[derive(Serialize)]
struct RunnerRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct RunnerResponse {
    success: bool,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Text generation through an external runner speaking JSON over stdio.
///
/// The runner reads `{"model", "prompt"}` on stdin and answers
/// `{"success", "output", "error"}` on stdout.
#[derive(Debug, Clone)]
pub struct ProcessGenerator {
    program: String,
    args: Vec<String>,
    model: String,
    timeout_secs: u64,
}

impl ProcessGenerator {
    pub fn new(command: &[String], model: impl Into<String>, timeout_secs: u64) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            model: model.into(),
            timeout_secs,
        })
    }

    /// `None` when the configuration names no command.
    pub fn from_config(config: &GeneratorConfig) -> Option<Self> {
        Self::new(config.command.as_deref()?, config.model.clone(), config.timeout_secs)
    }
}

impl TextGenerator for ProcessGenerator {
    fn generate(&self, prompt: &str) -> Result<Completion, ServiceError> {
        let request = serde_json::to_vec(&RunnerRequest {
            model: &self.model,
            prompt,
        })
        .map_err(|e| ServiceError::Transport(format!("failed to serialize request: {}", e)))?;

        let mut command = Command::new(&self.program);
        command.args(&self.args);
        let output = run_captured(&mut command, Some(&request), Duration::from_secs(self.timeout_secs))
            .map_err(|e| match e {
                SubprocessError::Timeout => ServiceError::Timeout(self.timeout_secs),
                other => ServiceError::Transport(format!("runner '{}': {}", self.program, other)),
            })?;

        if !output.success {
            return Err(ServiceError::Transport(format!(
                "runner failed. Stdout: {} Stderr: {}",
                output.stdout.trim(),
                output.stderr.trim()
            )));
        }

        let response: RunnerResponse = serde_json::from_str(output.stdout.trim())
            .map_err(|e| ServiceError::InvalidBody(e.to_string()))?;
        if !response.success {
            return Err(ServiceError::Transport(
                response.error.unwrap_or_else(|| "unknown runner error".to_string()),
            ));
        }

        match response.output {
            Some(text) if !text.trim().is_empty() => Ok(Completion::new(text)),
            Some(_) => Err(ServiceError::Empty),
            None => Err(ServiceError::InvalidBody("no output in response".to_string())),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> ProcessGenerator {
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        ProcessGenerator::new(&command, "test-model", 5).unwrap()
    }

    #[test]
    fn test_successful_runner() {
        let generator = shell(r#"cat > /dev/null; echo '{"success": true, "output": "hello"}'"#);
        assert_eq!(generator.generate("hi").unwrap().text, "hello");
    }

    #[test]
    fn test_runner_sees_request() {
        let generator = shell(
            r#"read line; case "$line" in *test-model*) echo '{"success": true, "output": "ok"}';; *) exit 1;; esac"#,
        );
        assert_eq!(generator.generate("prompt").unwrap().text, "ok");
    }

    #[test]
    fn test_runner_reported_error() {
        let generator = shell(r#"cat > /dev/null; echo '{"success": false, "error": "quota"}'"#);
        match generator.generate("hi") {
            Err(ServiceError::Transport(message)) => assert_eq!(message, "quota"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_body_and_exit_status() {
        let generator = shell("cat > /dev/null; echo not json");
        assert!(matches!(generator.generate("hi"), Err(ServiceError::InvalidBody(_))));

        let generator = shell("cat > /dev/null; exit 2");
        assert!(matches!(generator.generate("hi"), Err(ServiceError::Transport(_))));
    }

    #[test]
    fn test_from_config_requires_command() {
        assert!(ProcessGenerator::from_config(&GeneratorConfig::default()).is_none());
    }
}
