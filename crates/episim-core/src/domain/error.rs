//! Domain-level error taxonomy.

/// Domain errors for specifications, artifact sets and persisted run data.
#[derive(Debug, thiserror::Error)]
pub enum EpisimError {
    #[error("invalid model specification: {0}")]
    InvalidSpecification(String),

    #[error("invalid artifact set: {0}")]
    InvalidArtifactSet(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, EpisimError>;
