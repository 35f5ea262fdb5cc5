use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolValue;
use ethers::{
    providers::{ProviderError, RpcError},
    types::{Bytes as EthersBytes, H160, H256},
};
use hex::FromHex;

use super::ChainError;

pub fn to_h160(address: Address) -> H160 {
    H160(**address)
}

pub fn from_h160(address: H160) -> Address {
    Address::from(address.0)
}

pub fn from_h256(hash: H256) -> B256 {
    B256::from(hash.0)
}

pub fn to_ethers_bytes(data: &Bytes) -> EthersBytes {
    EthersBytes::from(data.to_vec())
}

pub fn from_ethers_bytes(data: &EthersBytes) -> Bytes {
    Bytes::copy_from_slice(data.as_ref())
}

/// Maps a provider error to a `ChainError`, recognising execution reverts.
///
/// Nodes report reverts as JSON-RPC errors whose message mentions the revert and whose `data`
/// field carries the ABI encoded revert payload.
pub fn coerce_error(err: &ProviderError) -> ChainError {
    if let Some(response) = err.as_error_response() {
        if response
            .message
            .to_lowercase()
            .contains("revert")
        {
            let reason = response
                .data
                .as_ref()
                .and_then(|data| data.as_str())
                .filter(|data| data.starts_with("0x"))
                .map(parse_solidity_error_message)
                .unwrap_or_else(|| response.message.clone());
            return ChainError::Reverted { reason };
        }
        return ChainError::Rpc(format!("{} (code {})", response.message, response.code));
    }
    ChainError::Rpc(err.to_string())
}

/// Decodes an ABI encoded revert payload into a readable reason.
///
/// Handles `Error(string)`, `Panic(uint256)` and selector-less string reverts.
pub fn parse_solidity_error_message(data: &str) -> String {
    let undecodable = || format!("Failed to decode: {}", data);
    let Some(bytes) = data
        .strip_prefix("0x")
        .and_then(|hex| Vec::from_hex(hex).ok())
    else {
        return undecodable();
    };
    if bytes.len() < 4 {
        return undecodable();
    }

    let (selector, payload) = bytes.split_at(4);
    let decoded = match selector {
        ERROR_SELECTOR => String::abi_decode(payload, true).ok(),
        PANIC_SELECTOR => U256::abi_decode(payload, true)
            .ok()
            .map(|code| match panic_reason(code) {
                Some(reason) => reason.to_string(),
                None => format!("Panic({})", code),
            }),
        _ => None,
    };
    decoded
        .or_else(|| String::abi_decode(&bytes, true).ok())
        .unwrap_or_else(undecodable)
}

const ERROR_SELECTOR: &[u8] = &[0x08, 0xc3, 0x79, 0xa0];
const PANIC_SELECTOR: &[u8] = &[0x4e, 0x48, 0x7b, 0x71];

/// Solidity panic codes.
fn panic_reason(code: U256) -> Option<&'static str> {
    let code: u64 = code.try_into().ok()?;
    Some(match code {
        0x00 => "GenericCompilerPanic",
        0x01 => "AssertionError",
        0x11 => "ArithmeticOver/Underflow",
        0x12 => "ZeroDivisionError",
        0x21 => "UnknownEnumMember",
        0x22 => "BadStorageByteArrayEncoding",
        0x31 => "EmptyArray",
        0x32 => "OutOfBounds",
        0x41 => "OutOfMemory",
        0x51 => "BadFunctionPointer",
        _ => return None,
    })
}
