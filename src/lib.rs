//! Backtest-sim: historical backtesting of strategy contracts
//!
//! This library evaluates a "backtester" strategy contract against the real
//! history of a protocol, on a local fork of the chain. It supports two ways
//! of driving the strategy through history:
//!
//! - backtest: reference state is read at every step and written into mock
//!   contracts that stand in for the reference ones, so the strategy's
//!   position is valued as if it had existed at that block.
//! - replay: the fork is reset to a past block and every historical
//!   transaction after it is re-executed from its original sender.
//!
//! The main entry point is the [`runner::Runner`], parameterized by a
//! [`runner::ProtocolAdapter`] for each supported protocol (Curve V2,
//! Uniswap V3 and Gearbox V2). The strategy's value at every visited block
//! is handed to a [`recorder::Recorder`] together with the reference state.
pub mod account;
pub mod chain;
pub mod config;
pub mod constants;
pub mod contract;
pub mod errors;
pub mod models;
pub mod protocol;
pub mod recorder;
pub mod roles;
pub mod runner;
pub mod snapshot;
pub mod u256_num;

#[cfg(test)]
mod testing;
