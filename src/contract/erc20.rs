use std::sync::Arc;

use alloy_primitives::{Address, U256};

use super::{artifacts::ArtifactStore, Call, ContractHandle};
use crate::{
    chain::{BlockTag, ChainContext},
    constants::{MAX_APPROVAL, MOCK_ERC20},
    errors::BacktestError,
};

/// An ERC20 token. Mock tokens additionally expose `mint` and `burnFrom` to the operator.
#[derive(Debug)]
pub struct Erc20<C> {
    contract: ContractHandle<C>,
}

impl<C> Clone for Erc20<C> {
    fn clone(&self) -> Self {
        Self { contract: self.contract.clone() }
    }
}

impl<C: ChainContext> Erc20<C> {
    pub fn new(address: Address, chain: Arc<C>) -> Self {
        Self { contract: ContractHandle::new(address, chain) }
    }

    /// Deploys a `MockERC20(name, symbol, decimals)` from `from`.
    pub fn deploy_mock(
        artifacts: &ArtifactStore,
        chain: Arc<C>,
        from: Address,
        name: &str,
        symbol: &str,
        decimals: u8,
    ) -> Result<Self, BacktestError> {
        let address = artifacts.deploy(
            chain.as_ref(),
            from,
            MOCK_ERC20,
            // uint8 is encoded through uint16, both take a full word
            (name.to_string(), symbol.to_string(), u16::from(decimals)),
        )?;
        Ok(Self::new(address, chain))
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub fn symbol(&self) -> Result<String, BacktestError> {
        self.contract
            .call("symbol()", (), BlockTag::Latest)
    }

    pub fn decimals(&self) -> Result<u8, BacktestError> {
        self.contract
            .call_uint8("decimals()", (), BlockTag::Latest)
    }

    pub fn balance_of(&self, owner: Address, block: BlockTag) -> Result<U256, BacktestError> {
        self.contract
            .call("balanceOf(address)", (owner,), block)
    }

    pub fn total_supply(&self, block: BlockTag) -> Result<U256, BacktestError> {
        self.contract
            .call("totalSupply()", (), block)
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> Result<U256, BacktestError> {
        self.contract
            .call("allowance(address,address)", (owner, spender), BlockTag::Latest)
    }

    pub fn mint(&self, from: Address, to: Address, amount: U256) -> Result<(), BacktestError> {
        self.contract
            .send(from, "mint(address,uint256)", (to, amount), U256::ZERO)?;
        Ok(())
    }

    pub fn burn_from(&self, from: Address, owner: Address, amount: U256) -> Result<(), BacktestError> {
        self.contract
            .send(from, "burnFrom(address,uint256)", (owner, amount), U256::ZERO)?;
        Ok(())
    }

    pub fn transfer(&self, from: Address, to: Address, amount: U256) -> Result<(), BacktestError> {
        self.contract
            .send(from, "transfer(address,uint256)", (to, amount), U256::ZERO)?;
        Ok(())
    }

    pub fn mint_call(&self, to: Address, amount: U256) -> Call {
        self.contract
            .calldata("mint(address,uint256)", (to, amount))
    }

    /// Infinite approval of `spender`, to be executed by the token holder.
    pub fn approve_call(&self, spender: Address) -> Call {
        self.contract
            .calldata("approve(address,uint256)", (spender, *MAX_APPROVAL))
    }
}
