//! Runtime configuration
//!
//! Read from a JSON file, or from the environment (a `.env` file is loaded first):
//!
//! | variable | field | default |
//! |---|---|---|
//! | `FORK_RPC_URL` | `fork_rpc_url` | `http://127.0.0.1:8545` |
//! | `ETH_RPC_URL` | `upstream_rpc_url` | required |
//! | `BACKTEST_ACCOUNT` | `account` | first unlocked account of the fork |
//! | `BACKTEST_MIN_BALANCE` | `min_balance` | 10_000 ether |
//! | `BACKTEST_ARTIFACTS` | `artifacts_dir` | `out` |
//! | `BACKTEST_RESULTS` | `results_dir` | `results` |
//! | `BACKTEST_POLL_INTERVAL_MS` | `poll_interval_ms` | 100 |
use std::{env, fs, path::PathBuf, str::FromStr, time::Duration};

use alloy_primitives::{Address, U256};
use serde::Deserialize;

use crate::{constants::DEFAULT_MIN_BALANCE, errors::BacktestError};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_fork_rpc_url")]
    pub fork_rpc_url: String,
    pub upstream_rpc_url: String,
    #[serde(default)]
    pub account: Option<Address>,
    #[serde(default = "default_min_balance")]
    pub min_balance: U256,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_fork_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_min_balance() -> U256 {
    *DEFAULT_MIN_BALANCE
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn parse_var<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, BacktestError> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| BacktestError::InvalidConfig(format!("{}={} is malformed", key, v)))
        })
        .transpose()
}

impl RunnerConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self, BacktestError> {
        let content = fs::read_to_string(path)
            .map_err(|e| BacktestError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| BacktestError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn from_env() -> Result<Self, BacktestError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from a variable lookup, e.g. the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BacktestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let upstream_rpc_url = lookup("ETH_RPC_URL")
            .ok_or_else(|| BacktestError::InvalidConfig("ETH_RPC_URL is not set".to_string()))?;
        Ok(Self {
            fork_rpc_url: lookup("FORK_RPC_URL").unwrap_or_else(default_fork_rpc_url),
            upstream_rpc_url,
            account: parse_var("BACKTEST_ACCOUNT", lookup("BACKTEST_ACCOUNT"))?,
            min_balance: parse_var("BACKTEST_MIN_BALANCE", lookup("BACKTEST_MIN_BALANCE"))?
                .unwrap_or_else(default_min_balance),
            artifacts_dir: lookup("BACKTEST_ARTIFACTS")
                .map(PathBuf::from)
                .unwrap_or_else(default_artifacts_dir),
            results_dir: lookup("BACKTEST_RESULTS")
                .map(PathBuf::from)
                .unwrap_or_else(default_results_dir),
            poll_interval_ms: parse_var(
                "BACKTEST_POLL_INTERVAL_MS",
                lookup("BACKTEST_POLL_INTERVAL_MS"),
            )?
            .unwrap_or_else(default_poll_interval_ms),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
