//! Error types for the arbitrage keeper

use thiserror::Error;

/// Main error type for the keeper
#[derive(Error, Debug)]
pub enum ArbError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("HTTP error from {endpoint}: {message}")]
    Http { endpoint: String, message: String },

    #[error("Cache error at {path}: {message}")]
    Cache { path: String, message: String },

    #[error("No gas data for tier {tier}")]
    NoGasData { tier: String },

    #[error("Nonce error for {address}: {message}")]
    Nonce { address: String, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Contract call error on {contract}: {message}")]
    Contract { contract: String, message: String },

    #[error("ABI decoding error: {0}")]
    Decode(String),

    #[error("No ABI available for contract {0}")]
    AbiUnavailable(String),

    #[error("Router {0} is not configured")]
    UnknownRouter(String),

    #[error("Invalid swap route: {0}")]
    InvalidRoute(String),

    #[error("Route not available for {source_token} to {target} in {contract}")]
    RouteUnavailable {
        source_token: String,
        target: String,
        contract: String,
    },

    #[error("Route is disabled for {source_token} to {target} in {contract}")]
    RouteDisabled {
        source_token: String,
        target: String,
        contract: String,
    },

    #[error("Invalid amount: {0}")]
    Amount(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArbError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArbError::Rpc(_)
                | ArbError::Http { .. }
                | ArbError::Timeout { .. }
                | ArbError::Contract { .. }
        )
    }

    /// Configuration faults are never retried and stop the control loop
    pub fn is_config_fault(&self) -> bool {
        matches!(
            self,
            ArbError::Config(_)
                | ArbError::AbiUnavailable(_)
                | ArbError::UnknownRouter(_)
                | ArbError::InvalidRoute(_)
                | ArbError::RouteUnavailable { .. }
                | ArbError::RouteDisabled { .. }
        )
    }
}

/// Result type for keeper operations
pub type ArbResult<T> = Result<T, ArbError>;
