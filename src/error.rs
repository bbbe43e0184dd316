//! Error types for firewatch.

/// Result type alias for firewatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for firewatch.
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

    /// Territory boundary could not be loaded.
    #[error("failed to load boundary '{path}': {reason}")]
    BoundaryLoad {
        /// Path to the boundary file.
        path: std::path::PathBuf,
        /// Description of the failure.
        reason: String,
    },

    /// Serialized tile grid could not be read or written.
    #[error("failed to access tile grid '{path}'")]
    GridStore {
        /// Path to the grid file.
        path: std::path::PathBuf,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// HTTP request could not be completed.
    #[error("request to '{url}' failed")]
    Transport {
        /// URL that failed.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP request returned a non-success status.
    #[error("request to '{url}' returned HTTP {status}")]
    HttpStatus {
        /// URL that failed.
        url: String,
        /// Returned status code.
        status: u16,
    },

    /// Imagery provider returned a response that could not be interpreted.
    #[error("invalid imagery provider response: {reason}")]
    ProviderResponse {
        /// Description of the problem.
        reason: String,
    },

    /// No territory boundary configured.
    #[error("no boundary configured (set paths.boundary or --boundary)")]
    BoundaryNotConfigured,

    /// No classifier model configured.
    #[error("no model configured (set inference.model and inference.labels)")]
    ModelNotConfigured,

    /// Model file not found.
    #[error("model file not found: {path}")]
    ModelFileNotFound {
        /// Path that was not found.
        path: std::path::PathBuf,
    },

    /// Labels file not found.
    #[error("labels file not found: {path}")]
    LabelsFileNotFound {
        /// Path that was not found.
        path: std::path::PathBuf,
    },

    /// Failed to load the classifier model or labels.
    #[error("failed to load classifier: {reason}")]
    ClassifierLoad {
        /// Description of the load failure.
        reason: String,
    },

    /// Classifier forward pass failed.
    #[error("inference failed: {reason}")]
    Inference {
        /// Description of the inference failure.
        reason: String,
    },

    /// Image could not be decoded.
    #[error("failed to decode image '{path}'")]
    ImageDecode {
        /// Path to the image.
        path: std::path::PathBuf,
        /// Underlying decode error.
        #[source]
        source: image::ImageError,
    },

    /// Failed to read an append-only log.
    #[error("failed to read log '{path}'")]
    LogRead {
        /// Path to the log file.
        path: std::path::PathBuf,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// Failed to append to a log.
    #[error("failed to write log '{path}'")]
    LogWrite {
        /// Path to the log file.
        path: std::path::PathBuf,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// Existing log header does not match the expected columns.
    #[error("log '{path}' has header [{found}], expected [{expected}]")]
    LogSchemaMismatch {
        /// Path to the log file.
        path: std::path::PathBuf,
        /// Header that was expected.
        expected: String,
        /// Header found on disk.
        found: String,
    },

    /// Log lacks a required column.
    #[error("log '{path}' has no '{column}' column")]
    MissingColumn {
        /// Path to the log file.
        path: std::path::PathBuf,
        /// Name of the missing column.
        column: String,
    },

    /// Failed to copy a file.
    #[error("failed to copy '{from}' to '{to}'")]
    FileCopy {
        /// Source path.
        from: std::path::PathBuf,
        /// Destination path.
        to: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create output directory.
    #[error("failed to create output directory '{path}'")]
    OutputDirCreateFailed {
        /// Path to the output directory.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Run directory does not exist.
    #[error("run '{run_id}' not found in '{path}'")]
    RunNotFound {
        /// Requested run id.
        run_id: String,
        /// Directory that was searched.
        path: std::path::PathBuf,
    },

    /// Run is locked by another process.
    #[error("run is locked by another process: {path}")]
    RunLocked {
        /// Path to the lock file.
        path: std::path::PathBuf,
    },

    /// Failed to create lock file.
    #[error("failed to create lock file '{path}'")]
    LockCreate {
        /// Path to the lock file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to remove lock file.
    #[error("failed to remove lock file '{path}'")]
    LockRemove {
        /// Path to the lock file.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Object storage is not configured.
    #[error("no storage bucket configured (set storage.bucket or --bucket)")]
    StorageNotConfigured,

    /// Object storage command exited unsuccessfully.
    #[error("storage command '{command}' failed: {reason}")]
    StorageCommand {
        /// Command line that was executed.
        command: String,
        /// Description of the failure.
        reason: String,
    },

    /// Internal error (for unexpected failures).
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}
