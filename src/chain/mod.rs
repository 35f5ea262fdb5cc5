//! Chain facade
//!
//! Everything the runners know about the chain goes through [`ChainContext`]: reading the head,
//! forking and resetting, point-in-time calls, transaction submission and account management on
//! the fork. All calls are blocking; they are the only suspension points of a run.
//!
//! [`rpc::RpcChain`] implements it over an ethers provider talking to an anvil or hardhat fork.
use alloy_primitives::{Address, Bytes, B256, U256};
use strum_macros::{Display, EnumString};
use thiserror::Error;

pub mod rpc;
pub mod utils;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Reverted: {reason}")]
    Reverted { reason: String },
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("Decoding error: {0}")]
    Decode(String),
    #[error("Missing data: {0}")]
    Missing(String),
}

/// Local fork providers that expose the admin RPC namespace the runners rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ForkProvider {
    #[strum(serialize = "anvil")]
    Anvil,
    #[strum(serialize = "hardhat")]
    Hardhat,
}

impl ForkProvider {
    /// Detects the provider from a `web3_clientVersion` response.
    pub fn from_client_version(version: &str) -> Option<Self> {
        let version = version.to_lowercase();
        if version.starts_with("anvil") {
            Some(ForkProvider::Anvil)
        } else if version.starts_with("hardhatnetwork") || version.contains("hardhat") {
            Some(ForkProvider::Hardhat)
        } else {
            None
        }
    }

    /// Name of an admin RPC method in this provider's namespace, e.g. `anvil_setBalance`.
    pub fn method(&self, name: &str) -> String {
        format!("{}_{}", self, name)
    }
}

#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq, Default)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
    pub base_fee: Option<U256>,
}

/// Block at which a point-in-time call is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockTag {
    #[default]
    Latest,
    Number(u64),
}

impl From<Option<u64>> for BlockTag {
    fn from(value: Option<u64>) -> Self {
        value.map_or(BlockTag::Latest, BlockTag::Number)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// A transaction to be mined on the fork. `to == None` deploys `data` as init code.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TxRequest {
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub gas: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TxReceipt {
    pub hash: B256,
    pub block_number: u64,
    pub contract_address: Option<Address>,
    pub gas_used: U256,
}

/// A transaction as it was included in a block of the canonical chain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoricalTx {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub gas: U256,
}

impl From<&HistoricalTx> for TxRequest {
    fn from(tx: &HistoricalTx) -> Self {
        TxRequest {
            from: tx.from,
            to: tx.to,
            data: tx.data.clone(),
            value: tx.value,
            gas: Some(tx.gas),
        }
    }
}

/// Handle over the forked chain and its upstream.
///
/// Implementations are not required to be thread safe: a runner owns its chain context and drives
/// it from a single thread.
pub trait ChainContext {
    /// The fork provider behind this context, or `None` if the node is not a local fork.
    fn fork_provider(&self) -> Option<ForkProvider>;

    fn head(&self) -> Result<BlockHeader, ChainError>;

    /// Re-forks the upstream chain at block `number`.
    fn reset_fork(&self, number: u64) -> Result<(), ChainError>;

    fn set_next_block_base_fee(&self, fee: U256) -> Result<(), ChainError>;

    /// Transactions of block `number` on the upstream (canonical) chain, in block order.
    fn reference_transactions(&self, number: u64) -> Result<Vec<HistoricalTx>, ChainError>;

    fn call(&self, request: &CallRequest, block: BlockTag) -> Result<Bytes, ChainError>;

    /// Mines a transaction. A transaction that reverts is reported as `ChainError::Reverted`.
    fn send(&self, tx: &TxRequest) -> Result<TxReceipt, ChainError>;

    fn deploy(&self, from: Address, init_code: Bytes) -> Result<Address, ChainError> {
        let receipt =
            self.send(&TxRequest { from, to: None, data: init_code, ..Default::default() })?;
        receipt
            .contract_address
            .ok_or_else(|| ChainError::Missing(format!("contract address in tx {}", receipt.hash)))
    }

    fn balance(&self, address: Address) -> Result<U256, ChainError>;

    fn set_balance(&self, address: Address, amount: U256) -> Result<(), ChainError>;

    fn nonce(&self, address: Address) -> Result<u64, ChainError>;

    /// Unlocks `address` so transactions can be sent from it without its key.
    fn impersonate(&self, address: Address) -> Result<(), ChainError>;

    /// First unlocked account of the node.
    fn default_account(&self) -> Result<Address, ChainError>;
}
