//! Backtest errors
use std::io;

use alloy_primitives::Address;
use thiserror::Error;

use crate::chain::ChainError;

/// Represents the outer-level, user-facing errors of the backtest-sim package.
///
/// Variants are grouped the way callers are expected to react to them:
/// - Configuration errors (`MissingRole`, `InvalidConfig`, `StructuralMismatch`) are raised while
///   a runner is constructed and are never retried.
/// - Precondition errors (`NotDeployed`, `AlreadyDeployed`, `NotInitialized`, `InvalidRange`,
///   `WrongNetwork`) are raised before any side effect happens.
/// - `UnsupportedFeedType` is raised while reading reference state and aborts the run.
/// - `Chain` wraps anything the chain facade reports. Reverts of historical transactions never
///   reach the caller as this variant during a replay; see `Runner::submit_txs`.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Missing reference role: {0}")]
    MissingRole(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Structural mismatch with on-chain contract: {0}")]
    StructuralMismatch(String),
    #[error("{0} not deployed")]
    NotDeployed(&'static str),
    #[error("{0} already deployed")]
    AlreadyDeployed(&'static str),
    #[error("Runner not initialized")]
    NotInitialized,
    #[error("Invalid block range: start {start}, stop {stop}, step {step}")]
    InvalidRange { start: u64, stop: u64, step: u64 },
    #[error("Wrong network: {0}")]
    WrongNetwork(String),
    #[error("Feed {feed} has unsupported type {feed_type}")]
    UnsupportedFeedType { feed: Address, feed_type: u8 },
    #[error("Artifact error: {0}")]
    Artifact(String),
    #[error("Record error: {0}")]
    Record(String),
    #[error("{0} not implemented")]
    NotImplemented(&'static str),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl BacktestError {
    /// Whether this error is a transaction revert reported by the chain.
    pub fn is_revert(&self) -> bool {
        matches!(self, BacktestError::Chain(ChainError::Reverted { .. }))
    }
}

impl From<csv::Error> for BacktestError {
    fn from(error: csv::Error) -> Self {
        BacktestError::Record(error.to_string())
    }
}

impl From<io::Error> for BacktestError {
    fn from(error: io::Error) -> Self {
        BacktestError::Record(error.to_string())
    }
}
