//! Crate-wide error taxonomy.
//!
//! Every public operation in this crate returns [`Result<T>`], a thin alias
//! over the [`Error`] enum below. Subsystems that need a narrower, private
//! error type (see `cache::invalidation`, `snapshot::codec`) define their own
//! and convert into this one at the module boundary, mirroring the
//! `XxxError` + `type Result<T>` convention used throughout this codebase's
//! `database` and `scheduling` modules.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("config file not found: {0}")]
    ConfigFileNotFound(String),

    #[error("config yaml error: {0}")]
    ConfigYamlError(String),

    #[error("config parse error: {0}")]
    ConfigParseError(String),

    #[error("config validation error: {0}")]
    ConfigValidationError(String),

    #[error("config invalid value: {0}")]
    ConfigInvalidValue(String),

    #[error("unknown command: {0}")]
    CommandUnknown(String),

    #[error("command syntax error: {0}")]
    CommandSyntaxError(String),

    #[error("command invalid argument: {0}")]
    CommandInvalidArgument(String),

    #[error("command invalid vector: {0}")]
    CommandInvalidVector(String),

    #[error("vector not found: {0}")]
    VectorNotFound(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    VectorDimensionMismatch { expected: usize, actual: usize },

    #[error("network already running")]
    NetworkAlreadyRunning,

    #[error("socket creation failed: {0}")]
    NetworkSocketCreationFailed(String),

    #[error("invalid bind address: {0}")]
    NetworkInvalidBindAddress(String),

    #[error("bind failed: {0}")]
    NetworkBindFailed(String),

    #[error("listen failed: {0}")]
    NetworkListenFailed(String),

    #[error("snapshot save failed: {0}")]
    SnapshotSaveFailed(String),

    #[error("snapshot load failed: {0}")]
    SnapshotLoadFailed(String),

    #[error("snapshot verify failed: {0}")]
    SnapshotVerifyFailed(String),

    #[error("snapshot info failed: {0}")]
    SnapshotInfoFailed(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl Error {
    /// The dotted error-kind name, used in `ERROR <kind>: <message>` style
    /// protocol responses and in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::NotFound(_) => "not_found",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::AlreadyExists(_) => "already_exists",
            Error::Timeout(_) => "timeout",
            Error::OutOfRange(_) => "out_of_range",
            Error::ConfigFileNotFound(_) => "config_file_not_found",
            Error::ConfigYamlError(_) => "config_yaml_error",
            Error::ConfigParseError(_) => "config_parse_error",
            Error::ConfigValidationError(_) => "config_validation_error",
            Error::ConfigInvalidValue(_) => "config_invalid_value",
            Error::CommandUnknown(_) => "command_unknown",
            Error::CommandSyntaxError(_) => "command_syntax_error",
            Error::CommandInvalidArgument(_) => "command_invalid_argument",
            Error::CommandInvalidVector(_) => "command_invalid_vector",
            Error::VectorNotFound(_) => "vector_not_found",
            Error::VectorDimensionMismatch { .. } => "vector_dimension_mismatch",
            Error::NetworkAlreadyRunning => "network_already_running",
            Error::NetworkSocketCreationFailed(_) => "network_socket_creation_failed",
            Error::NetworkInvalidBindAddress(_) => "network_invalid_bind_address",
            Error::NetworkBindFailed(_) => "network_bind_failed",
            Error::NetworkListenFailed(_) => "network_listen_failed",
            Error::SnapshotSaveFailed(_) => "snapshot_save_failed",
            Error::SnapshotLoadFailed(_) => "snapshot_load_failed",
            Error::SnapshotVerifyFailed(_) => "snapshot_verify_failed",
            Error::SnapshotInfoFailed(_) => "snapshot_info_failed",
            Error::InternalError(_) => "internal_error",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::InternalError(err.to_string())
    }
}
