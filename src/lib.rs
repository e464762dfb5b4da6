//! Wordbook Translator - concurrent unit translation into SQL artifacts
//!
//! This library drives words or sentences through a language model with
//! bounded concurrency, retry and rollback across fallback models, periodic
//! checkpoints, and an offline JSONL batch path.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod core;
pub mod processors;

// Re-export key types for convenience
pub use core::{
    checkpoint::{OutputPaths, ProgressCheckpoint},
    client::{HttpGateway, ModelGateway},
    config::{ConcurrencyConfig, TranslatorConfig},
    errors::TranslationError,
    lookup::{ExistingUnitLookup, SqliteLookup},
    models::{
        FailureRecord, IngestStats, LanguagePair, RunStats, TranslationRecord, TranslationUnit,
        UnitId, UnitKind,
    },
    parser::ResponseParser,
    pool::{CancelHandle, WorkerPool},
    retry::{RetryPolicy, UnitOutcome},
    store::ArtifactStore,
};

pub use processors::{
    batch::{BatchJobCoordinator, IngestOutputs},
    text::UnitExtractor,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
