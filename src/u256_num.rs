//! Numeric methods for the U256 and I256 types
use alloy_primitives::{Sign, I256, U256};
use ethers::types::U256 as EthersU256;
use num_bigint::{BigInt, BigUint, Sign as BigSign};

pub fn u256_to_biguint(value: U256) -> BigUint {
    let value_bytes: [u8; 32] = value.to_be_bytes();
    BigUint::from_bytes_be(&value_bytes)
}

pub fn i256_to_bigint(value: I256) -> BigInt {
    let (sign, abs) = value.into_sign_and_abs();
    let sign = if abs.is_zero() {
        BigSign::NoSign
    } else if sign == Sign::Negative {
        BigSign::Minus
    } else {
        BigSign::Plus
    };
    BigInt::from_biguint(sign, u256_to_biguint(abs))
}

/// Converts a `BigInt` back into an `I256`, returning `None` if it does not fit.
pub fn bigint_to_i256(value: &BigInt) -> Option<I256> {
    let (sign, bytes) = value.to_bytes_be();
    if bytes.len() > 32 {
        return None;
    }
    let abs = U256::try_from_be_slice(&bytes)?;
    let sign = if sign == BigSign::Minus { Sign::Negative } else { Sign::Positive };
    I256::checked_from_sign_and_abs(sign, abs)
}

pub fn convert_ethers_to_alloy(ethers_u256: EthersU256) -> U256 {
    let mut bytes = [0u8; 32];
    ethers_u256.to_big_endian(&mut bytes);
    U256::from_be_bytes(bytes)
}

pub fn convert_alloy_to_ethers(value: U256) -> EthersU256 {
    EthersU256::from_big_endian(&value.to_be_bytes::<32>())
}
