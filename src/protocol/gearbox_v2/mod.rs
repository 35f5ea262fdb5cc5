//! Gearbox V2 credit accounts
//!
//! A credit account's value depends on the oracle prices of its collaterals. The reference price
//! oracle is pointed at mock aggregators for the tracked collaterals, and the latest round of
//! each reference feed is replayed into its mock. Composite feeds are collapsed into a plain
//! USD aggregator round.
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, I256, U256};
use num_bigint::BigInt;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    account::ExecutionAccount,
    chain::{BlockTag, ChainContext, ChainError},
    constants::{LIDO_ADAPTER_ADDRESS, STETH_ADDRESS, WAD, WETH_ADDRESS},
    contract::{
        backtester::{Backtester, StrategyDeployment},
        encode_args, encode_input, ContractHandle,
    },
    errors::BacktestError,
    roles::RoleAddresses,
    runner::{ExecutionContext, ProtocolAdapter},
    u256_num::{bigint_to_i256, i256_to_bigint},
};

pub mod enums;
pub mod state;

use enums::PriceFeedType;
pub use state::{GearboxV2State, RoundData};

pub const MOCK_FEED: &str = "MockAggregatorV3";
pub const STRATEGY: &str = "GearboxV2CABacktest";

const OPEN_CREDIT_ACCOUNT_SIGNATURE: &str =
    "openCreditAccountMulticall(uint256,address,(address,bytes)[],uint16)";

fn default_collateral_amount() -> U256 {
    *WAD * U256::from(10u64)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GearboxV2StethParams {
    /// ETH sent as collateral when opening the credit account.
    #[serde(default = "default_collateral_amount")]
    pub collateral_amount: U256,
    #[serde(default)]
    pub borrow_amount: U256,
}

impl Default for GearboxV2StethParams {
    fn default() -> Self {
        Self { collateral_amount: default_collateral_amount(), borrow_amount: U256::ZERO }
    }
}

/// A collateral token of the credit manager whose feed is replayed.
#[derive(Debug)]
pub struct TrackedCollateral<C> {
    pub token: Address,
    pub feed: ContractHandle<C>,
}

#[derive(Debug)]
pub struct GearboxV2Refs<C> {
    pub manager: ContractHandle<C>,
    pub facade: ContractHandle<C>,
    pub price_oracle: ContractHandle<C>,
    /// All collateral tokens of the credit manager.
    pub tokens: Vec<Address>,
    pub tracked: Vec<TrackedCollateral<C>>,
}

/// Reads the latest round of `feed` at `block` as a USD aggregator round.
///
/// Feeds without `priceFeedType()` are plain Chainlink aggregators.
pub fn read_round<C: ChainContext>(
    feed: &ContractHandle<C>,
    block: BlockTag,
) -> Result<RoundData, BacktestError> {
    let feed_type = match feed.call_uint8("priceFeedType()", (), block) {
        Ok(feed_type) => feed_type,
        Err(err) if err.is_revert() => PriceFeedType::Chainlink as u8,
        Err(err) => return Err(err),
    };
    match PriceFeedType::try_from(feed_type) {
        Ok(PriceFeedType::Chainlink) => latest_round(feed, block),
        Ok(PriceFeedType::CompositeEth) => {
            let chain = Arc::clone(feed.chain());
            let target = ContractHandle::new(
                feed.call("targetEthPriceFeed()", (), block)?,
                Arc::clone(&chain),
            );
            let eth_usd = ContractHandle::new(feed.call("ethUsdPriceFeed()", (), block)?, chain);
            let denominator: I256 = feed.call("answerDenominator()", (), block)?;
            if denominator.is_zero() {
                return Err(BacktestError::StructuralMismatch(format!(
                    "composite feed {} has a zero answer denominator",
                    feed.address()
                )));
            }

            let mut round = latest_round(&target, block)?;
            let eth_usd_round = latest_round(&eth_usd, block)?;
            let answer = i256_to_bigint(round.answer) * i256_to_bigint(eth_usd_round.answer) /
                i256_to_bigint(denominator);
            round.answer = composite_answer(&answer)?;
            debug!(feed = %feed.address(), answer = %round.answer, "Collapsed composite feed");
            Ok(round)
        }
        _ => Err(BacktestError::UnsupportedFeedType { feed: feed.address(), feed_type }),
    }
}

fn latest_round<C: ChainContext>(
    feed: &ContractHandle<C>,
    block: BlockTag,
) -> Result<RoundData, BacktestError> {
    let data: (U256, I256, U256, U256, U256) = feed.call("latestRoundData()", (), block)?;
    Ok(data.into())
}

fn composite_answer(answer: &BigInt) -> Result<I256, BacktestError> {
    bigint_to_i256(answer).ok_or_else(|| {
        ChainError::Decode(format!("composite answer {} does not fit in int256", answer)).into()
    })
}

/// Opens a stETH credit account for WETH and stETH collaterals through the Lido adapter.
#[derive(Debug)]
pub struct GearboxV2StethAdapter<C> {
    params: GearboxV2StethParams,
    refs: GearboxV2Refs<C>,
    /// Mock aggregators, index aligned with `refs.tracked`.
    mocks: Option<Vec<ContractHandle<C>>>,
}

impl<C: ChainContext> GearboxV2StethAdapter<C> {
    pub const REQUIRED_ROLES: &'static [&'static str] = &["manager"];

    pub fn new(
        chain: Arc<C>,
        roles: &RoleAddresses,
        params: GearboxV2StethParams,
    ) -> Result<Self, BacktestError> {
        roles.require(Self::REQUIRED_ROLES)?;
        let manager = ContractHandle::new(roles.get("manager")?, Arc::clone(&chain));
        let facade = ContractHandle::new(
            manager.call("creditFacade()", (), BlockTag::Latest)?,
            Arc::clone(&chain),
        );
        let price_oracle = ContractHandle::new(
            manager.call("priceOracle()", (), BlockTag::Latest)?,
            Arc::clone(&chain),
        );

        let count: U256 = manager.call("collateralTokensCount()", (), BlockTag::Latest)?;
        let mut tokens = Vec::new();
        let mut i = U256::ZERO;
        while i < count {
            let (token, _liquidation_threshold): (Address, u16) =
                manager.call("collateralTokens(uint256)", (i,), BlockTag::Latest)?;
            tokens.push(token);
            i += U256::from(1);
        }

        let mut tracked = Vec::new();
        for token in [*WETH_ADDRESS, *STETH_ADDRESS] {
            if !tokens.contains(&token) {
                return Err(BacktestError::StructuralMismatch(format!(
                    "token {} is not a collateral of credit manager {}",
                    token,
                    manager.address()
                )));
            }
            let feed: Address =
                price_oracle.call("priceFeeds(address)", (token,), BlockTag::Latest)?;
            tracked.push(TrackedCollateral {
                token,
                feed: ContractHandle::new(feed, Arc::clone(&chain)),
            });
        }

        let adapted: Address =
            manager.call("adapterToContract(address)", (*LIDO_ADAPTER_ADDRESS,), BlockTag::Latest)?;
        if adapted.is_zero() {
            return Err(BacktestError::StructuralMismatch(format!(
                "adapter {} not supported by credit manager {}",
                *LIDO_ADAPTER_ADDRESS,
                manager.address()
            )));
        }

        Ok(Self {
            params,
            refs: GearboxV2Refs { manager, facade, price_oracle, tokens, tracked },
            mocks: None,
        })
    }

    pub fn refs(&self) -> &GearboxV2Refs<C> {
        &self.refs
    }

    pub fn mocks(&self) -> Result<&[ContractHandle<C>], BacktestError> {
        self.mocks
            .as_deref()
            .ok_or(BacktestError::NotDeployed("gearbox v2 mock feeds"))
    }

    /// Reads the latest rounds of the mock feeds.
    pub fn mocks_state(&self, block: BlockTag) -> Result<GearboxV2State, BacktestError> {
        let rounds = self
            .mocks()?
            .iter()
            .map(|feed| latest_round(feed, block))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GearboxV2State { rounds })
    }

    /// Points the reference price oracle at the mock feeds, as the oracle's configurator.
    fn register_mock_feeds(&self, ctx: &ExecutionContext<C>) -> Result<(), BacktestError> {
        let oracle = &self.refs.price_oracle;
        let acl = ContractHandle::new(
            oracle.call("_acl()", (), BlockTag::Latest)?,
            Arc::clone(&ctx.chain),
        );
        let configurator: Address = acl.call("owner()", (), BlockTag::Latest)?;
        ExecutionAccount { address: configurator, min_balance: *WAD }.fund(ctx.chain.as_ref())?;
        ctx.chain.impersonate(configurator)?;

        for (collateral, mock) in self.refs.tracked.iter().zip(self.mocks()?) {
            oracle.send(
                configurator,
                "addPriceFeed(address,address)",
                (collateral.token, mock.address()),
                U256::ZERO,
            )?;
            info!(token = %collateral.token, feed = %mock.address(), "Set mock price feed");
        }
        Ok(())
    }

    /// Opens the credit account on behalf of the strategy, depositing the collateral and the
    /// borrowed amount into Lido.
    fn open_credit_account(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
    ) -> Result<(), BacktestError> {
        let deposit = self
            .params
            .collateral_amount
            .checked_add(self.params.borrow_amount)
            .ok_or_else(|| {
                BacktestError::InvalidConfig("collateral plus borrow amount overflows".to_string())
            })?;
        let submit: Bytes = encode_input("submit(uint256)", (deposit,)).into();
        let mut call = self.refs.facade.calldata(
            OPEN_CREDIT_ACCOUNT_SIGNATURE,
            (
                self.params.borrow_amount,
                strategy.address(),
                vec![(*LIDO_ADAPTER_ADDRESS, submit)],
                0u16,
            ),
        );
        call.value = self.params.collateral_amount;
        strategy.execute(ctx.operator(), &call)?;
        info!(
            strategy = %strategy.address(),
            collateral = %self.params.collateral_amount,
            borrowed = %self.params.borrow_amount,
            "Opened credit account"
        );
        Ok(())
    }
}

impl<C: ChainContext> ProtocolAdapter<C> for GearboxV2StethAdapter<C> {
    type State = GearboxV2State;

    fn name(&self) -> &'static str {
        "GearboxV2STETHRunner"
    }

    fn deploy_mocks(&mut self, ctx: &ExecutionContext<C>) -> Result<(), BacktestError> {
        let mut mocks = Vec::with_capacity(self.refs.tracked.len());
        for collateral in &self.refs.tracked {
            let feed = &collateral.feed;
            let description: String = feed.call("description()", (), BlockTag::Latest)?;
            let decimals = feed.call_uint8("decimals()", (), BlockTag::Latest)?;
            let version: U256 = feed.call("version()", (), BlockTag::Latest)?;
            let mock = ctx.artifacts.deploy(
                ctx.chain.as_ref(),
                ctx.operator(),
                MOCK_FEED,
                (description, u16::from(decimals), version),
            )?;
            mocks.push(ContractHandle::new(mock, Arc::clone(&ctx.chain)));
        }
        self.mocks = Some(mocks);
        Ok(())
    }

    fn strategy_deployment(&self, _mocking: bool) -> Result<StrategyDeployment, BacktestError> {
        Ok(StrategyDeployment {
            artifact: STRATEGY,
            args: encode_args((self.refs.manager.address(),)),
        })
    }

    fn refs_state(&self, block: BlockTag) -> Result<GearboxV2State, BacktestError> {
        let rounds = self
            .refs
            .tracked
            .iter()
            .map(|collateral| read_round(&collateral.feed, block))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GearboxV2State { rounds })
    }

    fn set_mocks_state(
        &self,
        ctx: &ExecutionContext<C>,
        state: &GearboxV2State,
    ) -> Result<(), BacktestError> {
        let mocks = self.mocks()?;
        if mocks.len() != state.rounds.len() {
            return Err(BacktestError::StructuralMismatch(format!(
                "{} rounds for {} mock feeds",
                state.rounds.len(),
                mocks.len()
            )));
        }
        for (mock, round) in mocks.iter().zip(&state.rounds) {
            let calls: Vec<Bytes> = vec![
                encode_input("setRound((uint80,int256,uint256,uint256,uint80))", (round.as_tuple(),))
                    .into(),
                encode_input("setLatestRoundId(uint80)", (round.round_id,)).into(),
            ];
            mock.send(ctx.operator(), "calls(bytes[])", (calls,), U256::ZERO)?;
        }
        Ok(())
    }

    fn init_mocks_state(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
        state: &GearboxV2State,
    ) -> Result<(), BacktestError> {
        self.set_mocks_state(ctx, state)?;
        self.register_mock_feeds(ctx)?;
        self.open_credit_account(ctx, strategy)?;
        self.set_mocks_state(ctx, state)
    }

    fn init_strategy(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
    ) -> Result<(), BacktestError> {
        self.open_credit_account(ctx, strategy)
    }
}
