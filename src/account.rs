use alloy_primitives::{Address, U256};
use tracing::{debug, info};

use crate::{chain::ChainContext, errors::BacktestError};

/// The account signing every mock-mutating and strategy transaction.
///
/// Gas and value transfers deplete it during a run, so it is topped back up to `min_balance`
/// before every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionAccount {
    pub address: Address,
    pub min_balance: U256,
}

impl ExecutionAccount {
    /// Uses `configured` as an impersonated account if given, else the node's first account.
    pub fn resolve<C: ChainContext>(
        chain: &C,
        configured: Option<Address>,
        min_balance: U256,
    ) -> Result<Self, BacktestError> {
        let address = match configured {
            Some(address) => {
                chain.impersonate(address)?;
                debug!(%address, "Impersonating execution account");
                address
            }
            None => chain.default_account()?,
        };
        Ok(Self { address, min_balance })
    }

    /// Tops the balance up to `min_balance` if it fell below.
    pub fn fund<C: ChainContext>(&self, chain: &C) -> Result<(), BacktestError> {
        let balance = chain.balance(self.address)?;
        if balance < self.min_balance {
            info!(address = %self.address, %balance, "Replenishing funds in account ...");
            chain.set_balance(self.address, self.min_balance)?;
        }
        Ok(())
    }
}
