//! Error types for the fingerprinting engine

use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Short input is not represented here: audio shorter than one fingerprint
/// image yields zero fingerprints at ingest and a no-match at query time.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("audio provider failure: {0}")]
    Provider(String),

    #[error("spectral provider failure: {0}")]
    Spectral(String),

    #[error("model store failure: {0}")]
    Store(String),

    #[error("schema mismatch: store persists `{stored}`, runtime expects `{runtime}`")]
    SchemaMismatch { stored: String, runtime: String },

    #[error("command cancelled")]
    Cancelled,
}

impl From<hound::Error> for EngineError {
    fn from(err: hound::Error) -> Self {
        EngineError::Provider(err.to_string())
    }
}

impl From<rubato::ResamplerConstructionError> for EngineError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        EngineError::Provider(err.to_string())
    }
}

impl From<rubato::ResampleError> for EngineError {
    fn from(err: rubato::ResampleError) -> Self {
        EngineError::Provider(err.to_string())
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Store(err.to_string())
    }
}
