//! Error types for canopy.

/// Result type alias for canopy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for canopy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration directory could not be determined.
    #[error("could not determine configuration directory for this platform")]
    ConfigDirNotFound,

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}'")]
    ConfigRead {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("failed to parse config file '{path}'")]
    ConfigParse {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// Failed to write configuration file.
    #[error("failed to write config file '{path}'")]
    ConfigWrite {
        /// Path to the config file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize configuration.
    #[error("failed to serialize config")]
    ConfigSerialize {
        /// Underlying serialization error.
        #[source]
        source: toml::ser::Error,
    },

    /// Model file does not exist.
    #[error("model file does not exist: {path}")]
    ModelFileNotFound {
        /// Path to the missing model file.
        path: std::path::PathBuf,
    },

    /// Failed to load an inference model.
    #[error("failed to load {kind} model: {reason}")]
    ModelLoad {
        /// Kind of model that failed to load.
        kind: crate::inference::ModelKind,
        /// Description of the load failure.
        reason: String,
    },

    /// A cached model handle was requested for the wrong kind.
    #[error("cached model is not a {expected} model")]
    ModelKindMismatch {
        /// The kind the caller expected.
        expected: crate::inference::ModelKind,
    },

    /// Inference failed.
    #[error("inference failed: {reason}")]
    Inference {
        /// Description of the inference failure.
        reason: String,
    },

    /// Image bytes could not be decoded.
    #[error("failed to decode image: {reason}")]
    ImageDecode {
        /// Description of the decode failure.
        reason: String,
    },

    /// Blob reference was not found in the store.
    #[error("blob not found: {reference}")]
    BlobNotFound {
        /// The missing reference.
        reference: String,
    },

    /// Session was not found in the record store.
    #[error("session '{id}' not found")]
    SessionNotFound {
        /// The missing session id.
        id: String,
    },

    /// Calibration parameters required by the estimation method are missing.
    #[error("missing calibration for {method} estimation: {message}")]
    MissingCalibration {
        /// The estimation method that was requested.
        method: String,
        /// What is missing.
        message: String,
    },

    /// A logical invariant was violated; fatal to the owning unit of work.
    #[error("invariant violation: {message}")]
    InvariantViolation {
        /// Full context of the violation.
        message: String,
    },

    /// Region carries no polygon and cannot be processed.
    #[error("region '{region_id}' has no polygon")]
    RegionWithoutPolygon {
        /// The offending region id.
        region_id: String,
    },

    /// The circuit guarding a dependency is open; fail fast.
    ///
    /// Distinct from a genuine failure: it never consumes a retry attempt.
    #[error("circuit open for dependency '{dependency}'")]
    CircuitOpen {
        /// Name of the protected dependency.
        dependency: String,
    },

    /// A unit of work exceeded its independent timeout.
    #[error("{unit} timed out after {seconds}s")]
    UnitTimeout {
        /// The unit of work that timed out.
        unit: String,
        /// The timeout that was exceeded.
        seconds: u64,
    },

    /// Session was cancelled; child results are discarded.
    #[error("session '{id}' was cancelled")]
    SessionCancelled {
        /// The cancelled session id.
        id: String,
    },

    /// Invalid longitude value.
    #[error("invalid longitude: {value} (must be -180.0 to 180.0)")]
    InvalidLongitude {
        /// Invalid longitude value.
        value: f64,
    },

    /// Invalid latitude value.
    #[error("invalid latitude: {value} (must be -90.0 to 90.0)")]
    InvalidLatitude {
        /// Invalid latitude value.
        value: f64,
    },

    /// Spatial hierarchy snapshot could not be read.
    #[error("failed to read spatial hierarchy '{path}'")]
    HierarchyRead {
        /// Path to the hierarchy snapshot.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Spatial hierarchy snapshot could not be parsed.
    #[error("failed to parse spatial hierarchy '{path}'")]
    HierarchyParse {
        /// Path to the hierarchy snapshot.
        path: std::path::PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// Spatial hierarchy is structurally invalid.
    #[error("invalid spatial hierarchy: {message}")]
    HierarchyInvalid {
        /// Description of the structural problem.
        message: String,
    },

    /// Failed to write a report file.
    #[error("failed to write report '{path}'")]
    ReportWrite {
        /// Path to the report file.
        path: std::path::PathBuf,
        /// Underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Failed to serialize a JSON report.
    #[error("failed to serialize JSON report")]
    ReportSerialize {
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// Internal error (for unexpected failures).
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl Error {
    /// Whether this error is a transient infrastructure failure worth
    /// retrying with backoff.
    ///
    /// Malformed input, invariant violations and circuit-open rejections
    /// are never transient; circuit-open additionally does not consume a
    /// retry attempt (see the pipeline worker).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Inference { .. }
                | Self::BlobNotFound { .. }
                | Self::UnitTimeout { .. }
        )
    }
}
