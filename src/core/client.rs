//! Model gateway: one call, one complete response

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::core::config::TranslatorConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{TranslationUnit, UnitKind};
use crate::core::prompt::{response_text, GenerationSettings, PromptTemplate};

/// Single-call wrapper around the external translation model
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Translate one unit with the given model, returning the raw text
    async fn translate(&self, unit: &TranslationUnit, model: &str) -> Result<String>;
}

/// `generateContent` client backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    api_key: String,
    api_endpoint: String,
    templates: HashMap<UnitKind, PromptTemplate>,
}

impl HttpGateway {
    /// Create a new gateway
    pub fn new(config: &TranslatorConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(TranslationError::ConfigError {
                message: "API key is required for live translation".to_string(),
            });
        }

        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(config.concurrency.workers.max(1))
            .build()?;

        let settings = config.generation_settings();
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            templates: templates(&settings),
        })
    }

    fn endpoint_for(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.api_endpoint, model)
    }

    fn request(&self, model: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(self.endpoint_for(model))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
    }
}

fn templates(settings: &GenerationSettings) -> HashMap<UnitKind, PromptTemplate> {
    [UnitKind::Word, UnitKind::Sentence]
        .into_iter()
        .map(|kind| (kind, PromptTemplate::new(kind, settings.clone())))
        .collect()
}

#[async_trait]
impl ModelGateway for HttpGateway {
    async fn translate(&self, unit: &TranslationUnit, model: &str) -> Result<String> {
        let template = self
            .templates
            .get(&unit.kind)
            .ok_or_else(|| TranslationError::ConfigError {
                message: format!("no prompt template for {}", unit.kind),
            })?;
        let body = template.request_body(unit);

        debug!(unit = %unit.id, model, "Sending generateContent request");

        let response = self
            .request(model, &body)
            .send()
            .await
            .map_err(|e| TranslationError::TransportError {
                model: model.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();

        if status.is_success() {
            let json: serde_json::Value =
                response
                    .json()
                    .await
                    .map_err(|e| TranslationError::TransportError {
                        model: model.to_string(),
                        message: e.to_string(),
                    })?;

            // A blocked or truncated candidate has no parts; the caller treats it as empty
            Ok(response_text(&json).unwrap_or_default())
        } else {
            let status_code = status.as_u16();
            let error_text = response.text().await.unwrap_or_default();

            if status_code == 429 {
                return Err(TranslationError::RateLimitError { retry_after: None });
            }

            Err(TranslationError::ApiError {
                status: status_code,
                message: error_text,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_requires_api_key() {
        let config = TranslatorConfig {
            api_key: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            HttpGateway::new(&config),
            Err(TranslationError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_endpoint_for_model() {
        let config = TranslatorConfig {
            api_key: "test_key".to_string(),
            api_endpoint: "https://example.test/v1beta/".to_string(),
            ..Default::default()
        };
        let gateway = HttpGateway::new(&config).unwrap();
        assert_eq!(
            gateway.endpoint_for("models/gemini-1.5-flash"),
            "https://example.test/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn test_api_key_sent_once() {
        let config = TranslatorConfig {
            api_key: "test_key".to_string(),
            ..Default::default()
        };
        let gateway = HttpGateway::new(&config).unwrap();
        let request = gateway
            .request("models/gemini-1.5-flash", &serde_json::json!({}))
            .build()
            .unwrap();

        let headers = request.headers();
        assert_eq!(headers.get("x-goog-api-key").unwrap(), "test_key");
        assert!(headers.get("authorization").is_none());
    }
}
