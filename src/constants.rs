use alloy_primitives::{Address, U256};
use lazy_static::lazy_static;

lazy_static! {
    /// Allowance used for infinite approvals.
    pub static ref MAX_APPROVAL: U256 = U256::MAX;
    /// 1e18
    pub static ref WAD: U256 = U256::from(1_000_000_000_000_000_000u128);
    /// Default balance the execution account is topped up to before every step (10_000 ether).
    pub static ref DEFAULT_MIN_BALANCE: U256 = *WAD * U256::from(10_000u64);
    pub static ref WETH_ADDRESS: Address = Address::from_slice(
        &hex::decode("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")
            .expect("Invalid string for WETH address"),
    );
    pub static ref STETH_ADDRESS: Address = Address::from_slice(
        &hex::decode("ae7ab96520DE3A18E5e111B5EaAb095312D7fE84")
            .expect("Invalid string for stETH address"),
    );
    /// Gearbox V2 Lido adapter.
    pub static ref LIDO_ADAPTER_ADDRESS: Address = Address::from_slice(
        &hex::decode("711198f626C329CD2212f3100B59BD7dd2aD6697")
            .expect("Invalid string for Lido adapter address"),
    );
}

/// Seconds added to the head timestamp for position manager deadlines.
pub const DEADLINE_BUFFER: u64 = 86_400;

pub const MOCK_ERC20: &str = "MockERC20";
