//! Shared error kinds for the core crate.
//!
//! Each component gets its own `thiserror` enum so callers can match on kind
//! instead of parsing strings. `CoreError` is the umbrella type the API layer
//! converts into an HTTP response; `anyhow` is reserved for call sites (CLI
//! wiring, the scheduler loop) that chain several fallible steps together and
//! only need a human-readable diagnostic.

use thiserror::Error;

/// Failures from an external signal provider (C1). These never escape the
/// provider in production use - every call site downgrades through the
/// fallback chain - but the type still exists so the chain itself, and
/// tests that force a tier, have something concrete to match on.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to {0} timed out")]
    Timeout(&'static str),
    #[error("rate limited by {0}")]
    RateLimited(&'static str),
    #[error("invalid response from {0}: {1}")]
    InvalidResponse(&'static str, String),
    #[error("no api key configured for {0}")]
    MissingCredential(&'static str),
    #[error("dataset fallback unavailable: {0}")]
    DatasetUnavailable(String),
}

/// Failures from the state store adapter (C2).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("record not found")]
    NotFound,
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Failures from the grounding catalog (C3). Shares the state store's
/// outage semantics since it is backed by the same kind of tree.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures from the scenario orchestrator (C7). `Validation` is the only
/// variant that should ever surface as a non-200 HTTP response.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Failures from the background scheduler (C9). The scheduler loop never
/// exits on these; it logs and continues to the next tick.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown city: {0}")]
    UnknownCity(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Umbrella error the API layer understands how to envelope.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("datastore outage: {0}")]
    DatastoreOutage(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether this error should surface as a non-200 HTTP response.
    /// Only validation failures do; everything else degrades per §7.
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => CoreError::Validation("not found".to_string()),
            other => CoreError::DatastoreOutage(other.to_string()),
        }
    }
}

impl From<CatalogError> for CoreError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Store(store_err) => store_err.into(),
        }
    }
}

impl From<OrchestratorError> for CoreError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation(msg) => CoreError::Validation(msg),
            OrchestratorError::Store(e) => e.into(),
            OrchestratorError::Catalog(e) => e.into(),
        }
    }
}

impl From<SchedulerError> for CoreError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::UnknownCity(city) => {
                CoreError::Validation(format!("unknown city: {city}"))
            }
            SchedulerError::Store(e) => e.into(),
        }
    }
}
