//! Error types for wgsync

use thiserror::Error;

/// Result type alias using wgsync Error
pub type Result<T> = std::result::Result<T, Error>;

/// wgsync error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Document structure and edit preconditions
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Peer with public key {public_key} already present")]
    DuplicatePeer { public_key: String },

    #[error("Peer with public key {public_key} not found")]
    PeerNotFound { public_key: String },

    #[error("Address {cidr} already present on the interface")]
    AddressAlreadyPresent { cidr: String },

    #[error("Address {cidr} not found on the interface")]
    AddressNotFound { cidr: String },

    #[error("No rule or address references {cidr}; document and registry have drifted")]
    RuleNotFound { cidr: String },

    #[error("Subnet {cidr} is already isolated")]
    SubnetAlreadyIsolated { cidr: String },

    // Input validation
    #[error("Network {network} has no usable host address")]
    NoUsableHost { network: String },

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    // Registry
    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Resource already exists: {kind} with id {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Subnet {id} has {clients} attached client(s)")]
    SubnetInUse { id: String, clients: usize },

    // Boundaries
    #[error("Key provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable taxonomy label for structured failures
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Database(_) => "database_error",
            Error::Serialization(_) => "serialization_error",
            Error::MalformedDocument(_) => "malformed_document",
            Error::DuplicatePeer { .. } => "duplicate_peer",
            Error::PeerNotFound { .. } => "peer_not_found",
            Error::AddressAlreadyPresent { .. } => "address_already_present",
            Error::AddressNotFound { .. } => "address_not_found",
            Error::RuleNotFound { .. } => "rule_not_found",
            Error::SubnetAlreadyIsolated { .. } => "subnet_already_isolated",
            Error::NoUsableHost { .. } => "no_usable_host",
            Error::InvalidNetwork(_) => "invalid_network",
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::SubnetInUse { .. } => "subnet_in_use",
            Error::ProvisioningFailed(_) => "provisioning_failed",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Internal(_) => "internal",
        }
    }

    pub fn not_found(kind: &str, id: impl ToString) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    pub fn already_exists(kind: &str, id: impl ToString) -> Self {
        Error::AlreadyExists {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}
