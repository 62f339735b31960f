use crate::config::GeneratorConfig;
use crate::data::{Completion, TextGenerator};
use crate::error::ServiceError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Ollama-compatible `POST {endpoint}/api/generate` client.
pub struct HttpGenerator {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: generate_url(&config.endpoint),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn generate_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with("/api/generate") {
        base.to_string()
    } else {
        format!("{}/api/generate", base)
    }
}

impl TextGenerator for HttpGenerator {
    fn generate(&self, prompt: &str) -> Result<Completion, ServiceError> {
        let mut request = self.client.post(&self.url).json(&GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(url = %self.url, model = %self.model, chars = prompt.len(), "generation request");
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                ServiceError::Timeout(self.timeout_secs)
            } else {
                ServiceError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status(status.as_u16()));
        }

        let body: GenerateResponse = response
            .json()
            .map_err(|e| ServiceError::InvalidBody(e.to_string()))?;
        if body.response.trim().is_empty() {
            return Err(ServiceError::Empty);
        }
        Ok(Completion::new(body.response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_url() {
        assert_eq!(generate_url("http://localhost:11434"), "http://localhost:11434/api/generate");
        assert_eq!(generate_url("http://localhost:11434/"), "http://localhost:11434/api/generate");
        assert_eq!(
            generate_url("http://host/api/generate"),
            "http://host/api/generate"
        );
    }

    #[test]
    fn test_new_from_default_config() {
        let generator = HttpGenerator::new(&GeneratorConfig::default()).unwrap();
        assert_eq!(generator.url(), "http://localhost:11434/api/generate");
    }

    #[test]
    fn test_unreachable_endpoint_is_transport_error() {
        let config = GeneratorConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..GeneratorConfig::default()
        };
        let generator = HttpGenerator::new(&config).unwrap();
        assert!(matches!(
            generator.generate("hi"),
            Err(ServiceError::Transport(_) | ServiceError::Timeout(_))
        ));
    }

    #[test]
    #[ignore = "needs a running Ollama server"]
    fn test_live_generation() {
        let generator = HttpGenerator::new(&GeneratorConfig::default()).unwrap();
        assert!(!generator.generate("Say hi").unwrap().text.is_empty());
    }
}
