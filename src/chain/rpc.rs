use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, Bytes, U256};
use ethers::{
    providers::{Http, JsonRpcClient, Middleware, Provider},
    types::{
        transaction::eip2718::TypedTransaction, Block, BlockId, BlockNumber, TransactionRequest, H256,
        U64,
    },
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use super::{
    utils::{coerce_error, from_ethers_bytes, from_h160, from_h256, to_ethers_bytes, to_h160},
    BlockHeader, BlockTag, CallRequest, ChainContext, ChainError, ForkProvider, HistoricalTx,
    TxReceipt, TxRequest,
};
use crate::u256_num::{convert_alloy_to_ethers, convert_ethers_to_alloy};

/// Number of receipt polls before a sent transaction is considered lost.
const MAX_RECEIPT_POLLS: u32 = 600;

/// A [`ChainContext`] over JSON-RPC: a local fork (anvil or hardhat) for execution and the
/// canonical chain it forks from for historical blocks.
#[derive(Clone, Debug)]
pub struct RpcChain<P: JsonRpcClient> {
    /// Client connected to the local fork
    client: Arc<Provider<P>>,
    /// Client connected to the canonical chain
    upstream: Arc<Provider<P>>,
    /// Url the fork is (re)created from
    upstream_url: String,
    fork_provider: Option<ForkProvider>,
    poll_interval: Duration,
    /// Tokio runtime to execute async code
    pub runtime: Option<Arc<Runtime>>,
}

impl RpcChain<Http> {
    /// Connects to a fork node and its upstream over HTTP.
    pub fn connect(
        fork_url: &str,
        upstream_url: &str,
        poll_interval: Duration,
    ) -> Result<Self, ChainError> {
        let client =
            Provider::<Http>::try_from(fork_url).map_err(|e| ChainError::Rpc(e.to_string()))?;
        let upstream =
            Provider::<Http>::try_from(upstream_url).map_err(|e| ChainError::Rpc(e.to_string()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .is_err()
            .then(Runtime::new)
            .transpose()
            .map_err(|e| ChainError::Rpc(format!("Failed to start runtime: {}", e)))?
            .map(Arc::new);
        Self::new(
            Arc::new(client),
            Arc::new(upstream),
            upstream_url.to_string(),
            runtime,
            poll_interval,
        )
    }
}

impl<P: JsonRpcClient> RpcChain<P> {
    pub fn new(
        client: Arc<Provider<P>>,
        upstream: Arc<Provider<P>>,
        upstream_url: String,
        runtime: Option<Arc<Runtime>>,
        poll_interval: Duration,
    ) -> Result<Self, ChainError> {
        let mut chain = Self {
            client,
            upstream,
            upstream_url,
            fork_provider: None,
            poll_interval,
            runtime,
        };
        let version = chain
            .block_on(chain.client.client_version())
            .map_err(|e| coerce_error(&e))?;
        chain.fork_provider = ForkProvider::from_client_version(&version);
        info!(%version, provider = ?chain.fork_provider, "Connected to chain");
        Ok(chain)
    }

    fn block_on<F: core::future::Future>(&self, f: F) -> F::Output {
        match &self.runtime {
            Some(runtime) => runtime.block_on(f),
            None => futures::executor::block_on(f),
        }
    }

    fn request<T, R>(&self, method: &str, params: T) -> Result<R, ChainError>
    where
        T: std::fmt::Debug + Serialize + Send + Sync,
        R: std::fmt::Debug + Serialize + DeserializeOwned + Send,
    {
        debug!(method, ?params, "RPC request");
        self.block_on(self.client.request(method, params))
            .map_err(|e| coerce_error(&e))
    }

    fn admin_method(&self, name: &str) -> Result<String, ChainError> {
        self.fork_provider
            .map(|provider| provider.method(name))
            .ok_or_else(|| {
                ChainError::UnsupportedProvider(format!("{} requires anvil or hardhat", name))
            })
    }

    fn wait_for_receipt(&self, hash: H256) -> Result<TxReceipt, ChainError> {
        for _ in 0..MAX_RECEIPT_POLLS {
            let receipt = self
                .block_on(self.client.get_transaction_receipt(hash))
                .map_err(|e| coerce_error(&e))?;
            if let Some(receipt) = receipt {
                if receipt.status == Some(U64::zero()) {
                    return Err(ChainError::Reverted {
                        reason: format!("transaction {:?} reverted", hash),
                    });
                }
                return Ok(TxReceipt {
                    hash: from_h256(receipt.transaction_hash),
                    block_number: receipt
                        .block_number
                        .map(|n| n.as_u64())
                        .unwrap_or_default(),
                    contract_address: receipt.contract_address.map(from_h160),
                    gas_used: receipt
                        .gas_used
                        .map(convert_ethers_to_alloy)
                        .unwrap_or_default(),
                });
            }
            std::thread::sleep(self.poll_interval);
        }
        Err(ChainError::Missing(format!("receipt for transaction {:?}", hash)))
    }
}

fn block_header<T>(block: &Block<T>) -> Result<BlockHeader, ChainError> {
    Ok(BlockHeader {
        number: block
            .number
            .ok_or_else(|| ChainError::Missing("block number".to_string()))?
            .as_u64(),
        hash: block
            .hash
            .map(from_h256)
            .unwrap_or_default(),
        timestamp: block.timestamp.as_u64(),
        base_fee: block
            .base_fee_per_gas
            .map(convert_ethers_to_alloy),
    })
}

fn block_id(block: BlockTag) -> BlockId {
    match block {
        BlockTag::Latest => BlockId::Number(BlockNumber::Latest),
        BlockTag::Number(number) => BlockId::Number(BlockNumber::Number(number.into())),
    }
}

impl<P: JsonRpcClient> ChainContext for RpcChain<P> {
    fn fork_provider(&self) -> Option<ForkProvider> {
        self.fork_provider
    }

    fn head(&self) -> Result<BlockHeader, ChainError> {
        let block = self
            .block_on(self.client.get_block(BlockNumber::Latest))
            .map_err(|e| coerce_error(&e))?
            .ok_or_else(|| ChainError::Missing("latest block".to_string()))?;
        block_header(&block)
    }

    fn reset_fork(&self, number: u64) -> Result<(), ChainError> {
        let method = self.admin_method("reset")?;
        let block_number = match self.fork_provider {
            Some(ForkProvider::Anvil) => json!(format!("0x{:x}", number)),
            _ => json!(number),
        };
        let params = vec![json!({
            "forking": {
                "jsonRpcUrl": self.upstream_url,
                "blockNumber": block_number,
            }
        })];
        let _: Value = self.request(&method, params)?;
        debug!(number, "Fork reset");
        Ok(())
    }

    fn set_next_block_base_fee(&self, fee: U256) -> Result<(), ChainError> {
        let method = self.admin_method("setNextBlockBaseFeePerGas")?;
        let _: Value = self.request(&method, vec![json!(format!("0x{:x}", fee))])?;
        Ok(())
    }

    fn reference_transactions(&self, number: u64) -> Result<Vec<HistoricalTx>, ChainError> {
        let block = self
            .block_on(self.upstream.get_block_with_txs(number))
            .map_err(|e| coerce_error(&e))?
            .ok_or_else(|| ChainError::Missing(format!("upstream block {}", number)))?;
        Ok(block
            .transactions
            .iter()
            .map(|tx| HistoricalTx {
                hash: from_h256(tx.hash),
                from: from_h160(tx.from),
                to: tx.to.map(from_h160),
                data: from_ethers_bytes(&tx.input),
                value: convert_ethers_to_alloy(tx.value),
                gas: convert_ethers_to_alloy(tx.gas),
            })
            .collect())
    }

    fn call(&self, request: &CallRequest, block: BlockTag) -> Result<Bytes, ChainError> {
        let mut tx = TransactionRequest::new()
            .to(to_h160(request.to))
            .data(to_ethers_bytes(&request.data))
            .value(convert_alloy_to_ethers(request.value));
        if let Some(from) = request.from {
            tx = tx.from(to_h160(from));
        }
        let tx: TypedTransaction = tx.into();
        let output = self
            .block_on(self.client.call(&tx, Some(block_id(block))))
            .map_err(|e| coerce_error(&e))?;
        Ok(from_ethers_bytes(&output))
    }

    fn send(&self, tx: &TxRequest) -> Result<TxReceipt, ChainError> {
        let mut request = TransactionRequest::new()
            .from(to_h160(tx.from))
            .data(to_ethers_bytes(&tx.data))
            .value(convert_alloy_to_ethers(tx.value));
        if let Some(to) = tx.to {
            request = request.to(to_h160(to));
        }
        if let Some(gas) = tx.gas {
            request = request.gas(convert_alloy_to_ethers(gas));
        }
        let hash: H256 = self.request("eth_sendTransaction", vec![request])?;
        self.wait_for_receipt(hash)
    }

    fn balance(&self, address: Address) -> Result<U256, ChainError> {
        let balance = self
            .block_on(
                self.client
                    .get_balance(to_h160(address), None),
            )
            .map_err(|e| coerce_error(&e))?;
        Ok(convert_ethers_to_alloy(balance))
    }

    fn set_balance(&self, address: Address, amount: U256) -> Result<(), ChainError> {
        let method = self.admin_method("setBalance")?;
        let params = vec![json!(address.to_string()), json!(format!("0x{:x}", amount))];
        let _: Value = self.request(&method, params)?;
        Ok(())
    }

    fn nonce(&self, address: Address) -> Result<u64, ChainError> {
        let nonce = self
            .block_on(
                self.client
                    .get_transaction_count(to_h160(address), None),
            )
            .map_err(|e| coerce_error(&e))?;
        Ok(nonce.as_u64())
    }

    fn impersonate(&self, address: Address) -> Result<(), ChainError> {
        let method = self.admin_method("impersonateAccount")?;
        let _: Value = self.request(&method, vec![json!(address.to_string())])?;
        Ok(())
    }

    fn default_account(&self) -> Result<Address, ChainError> {
        let accounts = self
            .block_on(self.client.get_accounts())
            .map_err(|e| coerce_error(&e))?;
        accounts
            .first()
            .copied()
            .map(from_h160)
            .ok_or_else(|| ChainError::Missing("unlocked account on node".to_string()))
    }
}
