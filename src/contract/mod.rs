//! Typed handles over deployed contracts
//!
//! Calls are encoded as `keccak256(signature)[..4] ++ abi_encode_params(args)`. Arguments are
//! always passed as a tuple, `()` for none and `(x,)` for one.
use std::sync::Arc;

use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_sol_types::{SolType, SolValue};

use crate::{
    chain::{BlockTag, CallRequest, ChainContext, ChainError, TxReceipt, TxRequest},
    errors::BacktestError,
};

pub mod artifacts;
pub mod backtester;
pub mod erc20;

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// ABI encodes `args` the way function parameters are encoded.
pub fn encode_args<A: SolValue>(args: A) -> Vec<u8> {
    let mut encoded = args.abi_encode();
    // Dynamic tuples are prefixed by their offset
    if <A::SolType as SolType>::ENCODED_SIZE.is_none() && encoded.len() >= 32 {
        encoded.drain(..32);
    }
    encoded
}

pub fn encode_input<A: SolValue>(signature: &str, args: A) -> Vec<u8> {
    let mut call_data = selector(signature).to_vec();
    call_data.extend(encode_args(args));
    call_data
}

/// Encodes a call whose only parameters are static words, e.g. `set_balances(uint256[3])`.
///
/// Fixed size arrays are encoded inline, so an array whose length is only known at runtime is
/// encoded by concatenating its words.
pub fn encode_words(signature: &str, words: &[U256]) -> Vec<u8> {
    let mut call_data = selector(signature).to_vec();
    for word in words {
        call_data.extend(word.to_be_bytes::<32>());
    }
    call_data
}

pub fn decode_output<R>(data: &[u8]) -> Result<R, ChainError>
where
    R: SolValue + From<<R::SolType as SolType>::RustType>,
{
    R::abi_decode(data, true).map_err(|e| ChainError::Decode(e.to_string()))
}

/// Decodes a `uint8` return value such as `decimals()`.
///
/// `uint8` shares its encoding with `uint16`, so the word is decoded as `uint16` and narrowed.
pub fn decode_uint8(data: &[u8]) -> Result<u8, ChainError> {
    let value: u16 = decode_output(data)?;
    u8::try_from(value).map_err(|_| ChainError::Decode(format!("{} does not fit in uint8", value)))
}

/// A call to be executed by the strategy contract on the operator's behalf.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Call {
    pub target: Address,
    pub data: Bytes,
    pub value: U256,
}

#[derive(Debug)]
pub struct ContractHandle<C> {
    address: Address,
    chain: Arc<C>,
}

impl<C> Clone for ContractHandle<C> {
    fn clone(&self) -> Self {
        Self { address: self.address, chain: Arc::clone(&self.chain) }
    }
}

impl<C: ChainContext> ContractHandle<C> {
    pub fn new(address: Address, chain: Arc<C>) -> Self {
        Self { address, chain }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    /// Executes a read-only call at `block` and decodes its return value.
    pub fn call<A, R>(&self, signature: &str, args: A, block: BlockTag) -> Result<R, BacktestError>
    where
        A: SolValue,
        R: SolValue + From<<R::SolType as SolType>::RustType>,
    {
        let output = self.call_raw(encode_input(signature, args), block)?;
        Ok(decode_output(&output)?)
    }

    /// Executes a read-only call returning a single `uint8`.
    pub fn call_uint8<A: SolValue>(
        &self,
        signature: &str,
        args: A,
        block: BlockTag,
    ) -> Result<u8, BacktestError> {
        let output = self.call_raw(encode_input(signature, args), block)?;
        Ok(decode_uint8(&output)?)
    }

    pub fn call_raw(&self, data: Vec<u8>, block: BlockTag) -> Result<Bytes, ChainError> {
        let request = CallRequest { from: None, to: self.address, data: data.into(), value: U256::ZERO };
        self.chain.call(&request, block)
    }

    pub fn send<A: SolValue>(
        &self,
        from: Address,
        signature: &str,
        args: A,
        value: U256,
    ) -> Result<TxReceipt, BacktestError> {
        Ok(self.send_raw(from, encode_input(signature, args), value)?)
    }

    pub fn send_raw(
        &self,
        from: Address,
        data: Vec<u8>,
        value: U256,
    ) -> Result<TxReceipt, ChainError> {
        self.chain.send(&TxRequest {
            from,
            to: Some(self.address),
            data: data.into(),
            value,
            gas: None,
        })
    }

    /// Builds a call to this contract for batching through the strategy contract.
    pub fn calldata<A: SolValue>(&self, signature: &str, args: A) -> Call {
        Call { target: self.address, data: encode_input(signature, args).into(), value: U256::ZERO }
    }
}
