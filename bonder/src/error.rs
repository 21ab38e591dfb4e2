//! Error types for the bonder
//!
//! Errors are split along the lines the engine reacts to: transient gateway
//! failures are swallowed at the watcher iteration boundary, precondition
//! failures are raised before anything is submitted, and remote rejections
//! are handed back to whoever issued the action.

use alloy::primitives::{Address, B256};
use thiserror::Error;

/// Main error type for the bonder
#[derive(Error, Debug)]
pub enum BonderError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transient RPC failures talking to a chain
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Local guard rejected the action before submission
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    /// A submitted transaction was rejected by the chain
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// Caller identity is not allowed to perform an administrative action
    #[error("Permission denied: {caller} is not governance {governance}")]
    Permission { caller: Address, governance: Address },

    /// The local root projection cannot move to the requested state
    #[error("Invalid transition for root {root_hash}: {from} -> {to}")]
    InvalidTransition {
        root_hash: B256,
        from: &'static str,
        to: &'static str,
    },

    /// The persistent state store failed
    #[error("State store error: {0}")]
    Store(#[from] sled::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid private key format")]
    InvalidPrivateKey,

    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("Unknown chain slug: {0}")]
    UnknownChain(String),

    #[error("Chain {0} is not configured")]
    ChainNotConfigured(String),

    #[error("Home chain must be part of the configured chains")]
    MissingHomeChain,
}

/// Chain gateway (RPC) errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("RPC request to {chain} failed: {message}")]
    Rpc { chain: String, message: String },

    /// A read call reverted; for indexed lookups this means "no such entry"
    #[error("Call {call} on {chain} reverted: {message}")]
    CallReverted {
        chain: String,
        call: &'static str,
        message: String,
    },

    #[error("Failed to decode response of {call}: {message}")]
    Decode { call: &'static str, message: String },

    #[error("Call {call} is not available on {chain}")]
    Unsupported { chain: String, call: &'static str },
}

/// Local precondition failures. Nothing is submitted when one of these fires.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("Destination chain id {chain_id} is paused")]
    ChainPaused { chain_id: u64 },

    #[error("Messenger wrapper address not set for chain id {chain_id}")]
    WrapperNotSet { chain_id: u64 },

    #[error("No pending transfers to commit for chain id {chain_id}")]
    NothingToCommit { chain_id: u64 },

    #[error("Transfer root {root_hash} is already bonded")]
    AlreadyBonded { root_hash: B256 },

    #[error("Insufficient credit: required {required}, available {available}")]
    InsufficientCredit { required: String, available: String },

    #[error("Insufficient token balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Transfer root {root_hash} has no bond")]
    NotBonded { root_hash: B256 },

    #[error("Transfer root {root_hash} is already challenged")]
    AlreadyChallenged { root_hash: B256 },

    #[error("Challenge period for {root_hash} ended at {ended_at}")]
    ChallengePeriodOver { root_hash: B256, ended_at: u64 },

    #[error("Transfer root {root_hash} is not challenged")]
    NotChallenged { root_hash: B256 },

    #[error("Challenge on {root_hash} already resolved")]
    AlreadyResolved { root_hash: B256 },

    #[error("Challenge resolution for {root_hash} not allowed before {deadline} (now {now})")]
    ResolutionPeriodNotElapsed {
        root_hash: B256,
        deadline: u64,
        now: u64,
    },

    #[error("Unknown chain id {chain_id}")]
    UnknownChainId { chain_id: u64 },

    #[error("Source and destination are both {chain}")]
    SameChain { chain: String },
}

/// Transaction-related errors (remote rejection)
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction failed to submit: {0}")]
    SubmissionFailed(String),

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("Transaction dropped before confirmation: {0}")]
    Dropped(String),
}

/// Error severity levels for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Transient errors that may resolve on retry
    Transient,
    /// Errors requiring attention but not critical
    Warning,
    /// Critical errors requiring immediate attention
    Critical,
    /// Fatal errors that prevent operation
    Fatal,
}

impl BonderError {
    /// Get the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BonderError::Config(_) => ErrorSeverity::Fatal,
            BonderError::Gateway(e) => e.severity(),
            BonderError::Precondition(_) => ErrorSeverity::Warning,
            BonderError::Transaction(e) => e.severity(),
            BonderError::Permission { .. } => ErrorSeverity::Critical,
            BonderError::InvalidTransition { .. } => ErrorSeverity::Warning,
            BonderError::Store(_) => ErrorSeverity::Critical,
            BonderError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.severity(), ErrorSeverity::Transient)
    }

    /// Whether this is a lookup that reverted, i.e. "entry does not exist"
    pub fn is_call_reverted(&self) -> bool {
        matches!(self, BonderError::Gateway(GatewayError::CallReverted { .. }))
    }

    /// Get a short error code for metrics/logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BonderError::Config(_) => "CONFIG_ERROR",
            BonderError::Gateway(_) => "GATEWAY_ERROR",
            BonderError::Precondition(_) => "PRECONDITION_FAILED",
            BonderError::Transaction(_) => "TRANSACTION_ERROR",
            BonderError::Permission { .. } => "PERMISSION_DENIED",
            BonderError::InvalidTransition { .. } => "INVALID_TRANSITION",
            BonderError::Store(_) => "STORE_ERROR",
            BonderError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl GatewayError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            GatewayError::Rpc { .. } => ErrorSeverity::Transient,
            GatewayError::CallReverted { .. } => ErrorSeverity::Warning,
            GatewayError::Decode { .. } => ErrorSeverity::Critical,
            GatewayError::Unsupported { .. } => ErrorSeverity::Fatal,
        }
    }
}

impl TransactionError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            TransactionError::SubmissionFailed(_) => ErrorSeverity::Transient,
            TransactionError::Reverted { .. } => ErrorSeverity::Warning,
            TransactionError::Dropped(_) => ErrorSeverity::Transient,
        }
    }
}

/// Result type alias using BonderError
pub type BonderResult<T> = std::result::Result<T, BonderError>;
