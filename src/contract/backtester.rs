use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use tracing::info;

use super::{artifacts::ArtifactStore, Call, ContractHandle};
use crate::{
    chain::{BlockTag, ChainContext, TxReceipt},
    errors::BacktestError,
};

/// The strategy contract under test.
///
/// It holds the strategy's position, reports its `value()` and executes calls on the operator's
/// behalf, either one at a time or atomically in a batch.
#[derive(Debug)]
pub struct Backtester<C> {
    contract: ContractHandle<C>,
}

impl<C> Clone for Backtester<C> {
    fn clone(&self) -> Self {
        Self { contract: self.contract.clone() }
    }
}

impl<C: ChainContext> Backtester<C> {
    pub fn new(address: Address, chain: Arc<C>) -> Self {
        Self { contract: ContractHandle::new(address, chain) }
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub fn value(&self) -> Result<U256, BacktestError> {
        self.contract
            .call("value()", (), BlockTag::Latest)
    }

    pub fn count(&self) -> Result<U256, BacktestError> {
        self.contract
            .call("count()", (), BlockTag::Latest)
    }

    /// Stores an identifier (e.g. an LP position token id) in the strategy's storage.
    pub fn push(&self, from: Address, id: U256) -> Result<TxReceipt, BacktestError> {
        self.contract
            .send(from, "push(uint256)", (id,), U256::ZERO)
    }

    pub fn multicall(&self, from: Address, calls: &[Call]) -> Result<TxReceipt, BacktestError> {
        let targets: Vec<Address> = calls.iter().map(|c| c.target).collect();
        let datas: Vec<Bytes> = calls
            .iter()
            .map(|c| c.data.clone())
            .collect();
        let values: Vec<U256> = calls.iter().map(|c| c.value).collect();
        let total = values
            .iter()
            .fold(U256::ZERO, |acc, v| acc.saturating_add(*v));
        self.contract.send(
            from,
            "multicall(address[],bytes[],uint256[])",
            (targets, datas, values),
            total,
        )
    }

    pub fn execute(&self, from: Address, call: &Call) -> Result<TxReceipt, BacktestError> {
        self.contract.send(
            from,
            "execute(address,bytes,uint256)",
            (call.target, call.data.clone(), call.value),
            call.value,
        )
    }
}

/// A contract that the strategy will be deployed from.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDeployment {
    pub artifact: &'static str,
    /// ABI encoded constructor arguments
    pub args: Vec<u8>,
}

/// Holds the strategy contract of a runner, which is deployed at most once.
#[derive(Debug)]
pub struct StrategySlot<C> {
    backtester: Option<Backtester<C>>,
}

impl<C> Default for StrategySlot<C> {
    fn default() -> Self {
        Self { backtester: None }
    }
}

impl<C: ChainContext> StrategySlot<C> {
    pub fn is_deployed(&self) -> bool {
        self.backtester.is_some()
    }

    pub fn get(&self) -> Result<&Backtester<C>, BacktestError> {
        self.backtester
            .as_ref()
            .ok_or(BacktestError::NotDeployed("backtester strategy"))
    }

    pub fn deploy(
        &mut self,
        artifacts: &ArtifactStore,
        chain: Arc<C>,
        from: Address,
        deployment: &StrategyDeployment,
    ) -> Result<&Backtester<C>, BacktestError> {
        if self.backtester.is_some() {
            return Err(BacktestError::AlreadyDeployed("backtester strategy"));
        }
        let mut init_code = artifacts.bytecode(deployment.artifact)?;
        init_code.extend_from_slice(&deployment.args);
        let address = chain.deploy(from, init_code.into())?;
        info!(strategy = deployment.artifact, %address, "Deployed backtester strategy");
        Ok(self
            .backtester
            .insert(Backtester::new(address, chain)))
    }
}
