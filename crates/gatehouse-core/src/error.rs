//! Error types for Gatehouse.

use thiserror::Error;

/// Static configuration errors. Any of these aborts graph construction
/// before a single node runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Pipeline has no jobs")]
    EmptyPipeline,

    #[error("Job '{0}' is declared more than once")]
    DuplicateJob(String),

    #[error("Job '{job}' needs unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("Cycle detected in job dependencies involving '{job}'")]
    Cycle { job: String },

    #[error("Job '{job}' has a malformed condition: {message}")]
    MalformedCondition { job: String, message: String },

    #[error("Job '{job}' condition references unknown event attribute '{attribute}'")]
    UnknownAttribute { job: String, attribute: String },

    #[error("Job '{job}' matrix axis '{axis}' has no values")]
    EmptyMatrixAxis { job: String, axis: String },

    #[error("Job '{job}' declares artifact key '{key}', which is not a plain file name")]
    InvalidArtifactKey { job: String, key: String },

    #[error("Job '{job}' consumes artifact '{key}' which no job produces")]
    UnknownArtifact { job: String, key: String },

    #[error("Job '{job}' consumes artifact '{key}' but producer '{producer}' is not among its dependencies")]
    ArtifactNotUpstream {
        job: String,
        key: String,
        producer: String,
    },

    #[error("Artifact '{key}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        key: String,
        first: String,
        second: String,
    },

    #[error("Job '{job}' expands to {variants} matrix variants and cannot produce artifact '{key}'")]
    MatrixProducer {
        job: String,
        key: String,
        variants: usize,
    },

    #[error("Gate job '{0}' is not declared")]
    UnknownGateJob(String),
}

impl ConfigError {
    /// Name of the job the error is attributed to, when there is one.
    pub fn job(&self) -> Option<&str> {
        match self {
            ConfigError::EmptyPipeline | ConfigError::DuplicateProducer { .. } => None,
            ConfigError::DuplicateJob(job) | ConfigError::UnknownGateJob(job) => Some(job),
            ConfigError::UnknownDependency { job, .. }
            | ConfigError::Cycle { job }
            | ConfigError::MalformedCondition { job, .. }
            | ConfigError::UnknownAttribute { job, .. }
            | ConfigError::EmptyMatrixAxis { job, .. }
            | ConfigError::InvalidArtifactKey { job, .. }
            | ConfigError::UnknownArtifact { job, .. }
            | ConfigError::ArtifactNotUpstream { job, .. }
            | ConfigError::MatrixProducer { job, .. } => Some(job),
        }
    }
}

/// Errors raised by the artifact exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("Artifact '{key}' already has producer '{existing}', rejected publish from '{attempted}'")]
    DuplicateProducer {
        key: String,
        existing: String,
        attempted: String,
    },

    #[error("Artifact '{key}' requested by '{consumer}' is not yet available")]
    NotYetAvailable { key: String, consumer: String },

    #[error("Unknown artifact key: {0}")]
    UnknownKey(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Runner error: {0}")]
    Runner(String),

    // Secret errors
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Secret provider not configured: {0}")]
    SecretProviderNotConfigured(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error was raised before any node could run.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
