//! Error types for headcni

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for headcni operations
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    #[error("Invalid network configuration: {0}")]
    Config(String),

    #[error("Failed to parse network configuration: {0}")]
    ConfigParse(#[source] serde_json::Error),

    #[error("No {0} configured: set it in the network configuration or via {1}")]
    MissingPath(&'static str, &'static str),

    #[error("Field '{key}' has the wrong type: expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    // ========================================================================
    // Subnet Environment Errors
    // ========================================================================
    #[error("Subnet environment file {0} does not exist")]
    EnvFileNotFound(PathBuf),

    #[error("Failed to read subnet environment file {path}: {source}")]
    EnvFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse subnet environment file {path}: {source}")]
    EnvParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse {field} '{value}': {source}")]
    InvalidCidr {
        field: String,
        value: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("Failed to parse route gateway '{0}'")]
    InvalidGateway(String),

    #[error("Invalid mtu '{0}': expected a positive integer")]
    InvalidMtu(String),

    #[error("Invalid ipmasq '{0}': expected true or false")]
    InvalidIpMasq(String),

    #[error("{} is missing {}", path.display(), fields.join(", "))]
    MissingFields { path: PathBuf, fields: Vec<String> },

    // ========================================================================
    // Delegate / Chain Errors
    // ========================================================================
    #[error("Delegate plugin '{plugin_type}' failed: {message}")]
    Delegate { plugin_type: String, message: String },

    #[error("Plugin chain step {index} ({plugin_type}) failed: {source}")]
    ChainStep {
        index: usize,
        plugin_type: String,
        #[source]
        source: Box<Error>,
    },

    #[error("State persistence error: {0}")]
    State(String),

    #[error("Invalid container id: {0}")]
    InvalidContainerId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Plumbing
    // ========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a delegate invocation error
    pub fn delegate(plugin_type: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Delegate {
            plugin_type: plugin_type.into(),
            message: msg.into(),
        }
    }

    /// Create a state persistence error
    pub fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Annotate an error with the chain step that produced it
    pub fn at_step(self, index: usize, plugin_type: impl Into<String>) -> Self {
        Error::ChainStep {
            index,
            plugin_type: plugin_type.into(),
            source: Box::new(self),
        }
    }

    /// Errors caused by the network configuration itself
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::MissingPath(..)
                | Error::TypeMismatch { .. }
        )
    }

    /// Errors caused by a bad or missing subnet environment file
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Error::EnvFileNotFound(_)
                | Error::EnvFileRead { .. }
                | Error::EnvParse { .. }
                | Error::InvalidCidr { .. }
                | Error::InvalidGateway(_)
                | Error::InvalidMtu(_)
                | Error::InvalidIpMasq(_)
                | Error::MissingFields { .. }
        )
    }

    /// The innermost error, looking through chain step annotations
    pub fn root(&self) -> &Error {
        match self {
            Error::ChainStep { source, .. } => source.root(),
            other => other,
        }
    }
}
