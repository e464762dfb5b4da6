//! Per-unit retry on the primary model, then an ordered rollback chain

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::core::client::ModelGateway;
use crate::core::config::TranslatorConfig;
use crate::core::errors::TranslationError;
use crate::core::models::{
    AttemptOutcome, FailureRecord, ModelAttempt, TranslationRecord, TranslationUnit,
};
use crate::core::parser::ResponseParser;

/// Terminal result for one unit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// Accepted by some model in the chain
    Success(TranslationRecord),
    /// Every model exhausted
    Failure(FailureRecord),
}

/// Attempts on the primary model, then each rollback model in order
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Model tried first
    pub primary_model: String,
    /// Attempts on the primary model
    pub max_retries: u32,
    /// Tried in order after the primary model
    pub rollback_models: Vec<String>,
    /// Attempts on each rollback model
    pub rollback_attempts: u32,
    /// Sleep between consecutive calls for one unit
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Policy from the retry settings in `config`
    pub fn from_config(config: &TranslatorConfig) -> Self {
        Self {
            primary_model: config.primary_model.clone(),
            max_retries: config.max_retries,
            rollback_models: config.rollback_models.clone(),
            rollback_attempts: config.rollback_attempts,
            retry_delay: config.retry_delay(),
        }
    }

    /// Models in the order they are tried, with their attempt budgets
    pub fn chain(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        std::iter::once((self.primary_model.as_str(), self.max_retries)).chain(
            self.rollback_models
                .iter()
                .map(|m| (m.as_str(), self.rollback_attempts)),
        )
    }

    /// Drive one unit until it succeeds or every model is exhausted
    pub async fn attempt_unit(
        &self,
        gateway: &dyn ModelGateway,
        parser: &ResponseParser,
        unit: &TranslationUnit,
    ) -> UnitOutcome {
        let mut last_error: Option<TranslationError> = None;
        let mut last_raw_output: Option<String> = None;
        let mut calls = 0u32;

        for (model, attempts) in self.chain() {
            if model != self.primary_model {
                info!(unit = %unit.id, "Rolling back to model {}", model);
            }

            for attempt in 1..=attempts {
                if calls > 0 && !self.retry_delay.is_zero() {
                    sleep(self.retry_delay).await;
                }
                calls += 1;

                let (outcome, result) = match gateway.translate(unit, model).await {
                    Err(e) => (AttemptOutcome::Transport(e.to_string()), Err(e)),
                    Ok(raw) if raw.trim().is_empty() => {
                        last_raw_output = Some(raw);
                        (
                            AttemptOutcome::Empty,
                            Err(TranslationError::EmptyResponseError {
                                model: model.to_string(),
                            }),
                        )
                    }
                    Ok(raw) => {
                        let parsed = parser.parse(&raw);
                        last_raw_output = Some(raw);
                        match parsed {
                            Ok(parsed) => (AttemptOutcome::Accepted, Ok(parsed)),
                            Err(errors) => {
                                let e = TranslationError::ValidationError { errors };
                                (AttemptOutcome::Invalid(e.to_string()), Err(e))
                            }
                        }
                    }
                };

                let record = ModelAttempt {
                    unit_id: unit.id.clone(),
                    model: model.to_string(),
                    attempt,
                    outcome,
                    timestamp: chrono::Utc::now(),
                };
                debug!(
                    unit = %record.unit_id,
                    model = %record.model,
                    attempt = record.attempt,
                    at = %record.timestamp,
                    outcome = ?record.outcome,
                    "Model attempt finished"
                );

                match result {
                    Ok(parsed) => {
                        if calls > 1 {
                            info!(unit = %unit.id, "Translated with {} after {} calls", model, calls);
                        }
                        return UnitOutcome::Success(TranslationRecord {
                            unit_id: unit.id.clone(),
                            fields: parsed.fields,
                            source_model: model.to_string(),
                            parse_warnings: parsed.warnings,
                            response_data: parsed.document,
                        });
                    }
                    Err(e) => {
                        // Validation failures take the same path as transport errors
                        warn!(
                            unit = %unit.id,
                            "{} attempt {}/{} failed: {}",
                            model, attempt, attempts, e
                        );
                        let retryable = e.is_retryable();
                        last_error = Some(e);
                        // Move on to the next model
                        if !retryable {
                            break;
                        }
                    }
                }
            }
        }

        let exhausted = TranslationError::ExhaustionError {
            unit_id: unit.id.to_string(),
            attempts: calls,
        };
        let reason = match last_error {
            Some(e) => format!("{}; last error: {}", exhausted, e),
            None => exhausted.to_string(),
        };
        error!(unit = %unit.id, "{}", reason);

        UnitOutcome::Failure(FailureRecord {
            unit_id: unit.id.clone(),
            kind: unit.kind,
            reason,
            last_raw_output,
        })
    }
}
