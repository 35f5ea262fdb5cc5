use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::errors::BacktestError;

/// Reference contract addresses keyed by the role they play in a protocol, e.g. `pool`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleAddresses(BTreeMap<String, Address>);

impl RoleAddresses {
    pub fn new<I, K>(roles: I) -> Self
    where
        I: IntoIterator<Item = (K, Address)>,
        K: Into<String>,
    {
        Self(
            roles
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    /// Checks that every required role is configured.
    pub fn require(&self, keys: &[&str]) -> Result<(), BacktestError> {
        match keys
            .iter()
            .find(|key| !self.0.contains_key(**key))
        {
            Some(missing) => Err(BacktestError::MissingRole(missing.to_string())),
            None => Ok(()),
        }
    }

    pub fn get(&self, key: &str) -> Result<Address, BacktestError> {
        self.0
            .get(key)
            .copied()
            .ok_or_else(|| BacktestError::MissingRole(key.to_string()))
    }
}
