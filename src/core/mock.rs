//! Scripted gateway for tests and dry runs
//!
//! The script decides each reply from the unit, the model and the per-unit
//! call number (1-based, counted across all models).

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::core::client::ModelGateway;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::TranslationUnit;

/// What the scripted model does on one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Return this text
    Text(String),
    /// Fail the call
    TransportError(String),
}

type Script = dyn Fn(&TranslationUnit, &str, u32) -> Reply + Send + Sync;

#[derive(Debug, Clone)]
struct Call {
    unit: String,
    model: String,
    at: Instant,
}

/// A `ModelGateway` that replays a script and records every call
pub struct ScriptedGateway {
    script: Box<Script>,
    latency: Duration,
    calls: Mutex<Vec<Call>>,
    per_unit: Mutex<HashMap<String, u32>>,
}

impl std::fmt::Debug for ScriptedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedGateway")
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl ScriptedGateway {
    /// Script receives the unit, the model and the call number for that unit
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&TranslationUnit, &str, u32) -> Reply + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            per_unit: Mutex::new(HashMap::new()),
        }
    }

    /// Always answer with the same text
    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _, _| Reply::Text(text.clone()))
    }

    /// Simulate a slow model
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `(unit id, model)` for every call, in call order
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|call| (call.unit.clone(), call.model.clone()))
            .collect()
    }

    /// When each call started, in call order
    pub async fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().await.iter().map(|call| call.at).collect()
    }

    /// Model name for every call, in call order
    pub async fn models_called(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .map(|call| call.model.clone())
            .collect()
    }

    /// Total calls so far
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn translate(&self, unit: &TranslationUnit, model: &str) -> Result<String> {
        let call = {
            let mut per_unit = self.per_unit.lock().await;
            let counter = per_unit.entry(unit.id.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        self.calls
            .lock()
            .await
            .push(Call {
                unit: unit.id.to_string(),
                model: model.to_string(),
                at: Instant::now(),
            });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match (self.script)(unit, model, call) {
            Reply::Text(text) => Ok(text),
            Reply::TransportError(message) => Err(TranslationError::TransportError {
                model: model.to_string(),
                message,
            }),
        }
    }
}
