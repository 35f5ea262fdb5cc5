//! Curve V2 (tricrypto) liquidity provision
//!
//! The mock pool exposes setters for every storage value that enters the LP token's valuation:
//! balances, `D`, the packed A/gamma ramp and the packed oracle prices. The LP token supply is
//! reconciled by minting to or burning from the operator.
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use serde::Deserialize;
use tracing::info;

use crate::{
    chain::{BlockTag, ChainContext},
    contract::{
        backtester::{Backtester, StrategyDeployment},
        encode_args, encode_words,
        erc20::Erc20,
        Call, ContractHandle,
    },
    errors::BacktestError,
    roles::RoleAddresses,
    runner::{ExecutionContext, ProtocolAdapter},
};

pub mod state;

pub use state::CurveV2State;

pub const MOCK_POOL: &str = "MockTricrypto2";
pub const STRATEGY: &str = "CurveV2LPBacktest";

// Parameters of the mock pool. Valuation only depends on what the setters write.
const MOCK_A: u64 = 1_000_000;
const MOCK_GAMMA: u64 = 10_000_000_000_000;
const MOCK_MID_FEE: u64 = 5_000_000;
const MOCK_OUT_FEE: u64 = 30_000_000;
const MOCK_ALLOWED_EXTRA_PROFIT: u64 = 2_000_000_000_000;
const MOCK_FEE_GAMMA: u64 = 500_000_000_000_000;
const MOCK_ADJUSTMENT_STEP: u64 = 2_000_000_000_000_000;
const MOCK_ADMIN_FEE: u64 = 5_000_000_000;
const MOCK_MA_HALF_TIME: u64 = 600;
const MOCK_INITIAL_PRICE: u64 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CurveV2LpParams {
    pub num_coins: usize,
    /// Amount of each coin the strategy adds as liquidity.
    pub amounts: Vec<U256>,
}

/// A pool with its coins and LP token, either the reference or its mock.
#[derive(Debug)]
pub struct CurveV2Contracts<C> {
    pub pool: ContractHandle<C>,
    pub coins: Vec<Erc20<C>>,
    pub lp: Erc20<C>,
}

impl<C: ChainContext> CurveV2Contracts<C> {
    /// Reads the pool state at `block`.
    pub fn read_state(&self, block: BlockTag) -> Result<CurveV2State, BacktestError> {
        let n = self.coins.len();
        let balances = (0..n)
            .map(|i| {
                self.pool
                    .call("balances(uint256)", (U256::from(i),), block)
            })
            .collect::<Result<Vec<U256>, _>>()?;
        let prices = (0..n - 1)
            .map(|k| {
                self.pool
                    .call("price_oracle(uint256)", (U256::from(k),), block)
            })
            .collect::<Result<Vec<U256>, _>>()?;
        Ok(CurveV2State {
            balances,
            d: self.pool.call("D()", (), block)?,
            a_gamma: [
                self.pool
                    .call("initial_A_gamma()", (), block)?,
                self.pool
                    .call("future_A_gamma()", (), block)?,
                self.pool
                    .call("initial_A_gamma_time()", (), block)?,
                self.pool
                    .call("future_A_gamma_time()", (), block)?,
            ],
            prices,
            total_supply: self.lp.total_supply(block)?,
        })
    }
}

#[derive(Debug)]
pub struct CurveV2LpAdapter<C> {
    params: CurveV2LpParams,
    refs: CurveV2Contracts<C>,
    mocks: Option<CurveV2Contracts<C>>,
}

impl<C: ChainContext> CurveV2LpAdapter<C> {
    pub const REQUIRED_ROLES: &'static [&'static str] = &["pool"];

    /// Discovers the reference pool's coins and LP token and validates `params` against them.
    pub fn new(
        chain: Arc<C>,
        roles: &RoleAddresses,
        params: CurveV2LpParams,
    ) -> Result<Self, BacktestError> {
        roles.require(Self::REQUIRED_ROLES)?;
        if params.num_coins < 2 {
            return Err(BacktestError::InvalidConfig(format!(
                "a pool has at least 2 coins, got {}",
                params.num_coins
            )));
        }
        if params.amounts.len() != params.num_coins {
            return Err(BacktestError::InvalidConfig(format!(
                "{} amounts given for {} coins",
                params.amounts.len(),
                params.num_coins
            )));
        }

        let pool = ContractHandle::new(roles.get("pool")?, Arc::clone(&chain));
        let mut coins = Vec::with_capacity(params.num_coins);
        for i in 0..params.num_coins {
            let coin: Address = pool.call("coins(uint256)", (U256::from(i),), BlockTag::Latest)?;
            coins.push(Erc20::new(coin, Arc::clone(&chain)));
        }
        match pool.call::<_, Address>("coins(uint256)", (U256::from(params.num_coins),), BlockTag::Latest) {
            Ok(extra) => {
                return Err(BacktestError::StructuralMismatch(format!(
                    "pool {} has more than {} coins, found {} at index {}",
                    pool.address(),
                    params.num_coins,
                    extra,
                    params.num_coins
                )))
            }
            Err(err) if err.is_revert() => {}
            Err(err) => return Err(err),
        }
        let lp: Address = pool.call("token()", (), BlockTag::Latest)?;

        for (i, (coin, amount)) in coins
            .iter()
            .zip(params.amounts.iter())
            .enumerate()
        {
            let balance = coin.balance_of(pool.address(), BlockTag::Latest)?;
            if *amount > balance {
                return Err(BacktestError::InvalidConfig(format!(
                    "amount {} of coin {} exceeds pool balance {}",
                    amount, i, balance
                )));
            }
        }

        Ok(Self {
            params,
            refs: CurveV2Contracts { pool, coins, lp: Erc20::new(lp, chain) },
            mocks: None,
        })
    }

    pub fn refs(&self) -> &CurveV2Contracts<C> {
        &self.refs
    }

    pub fn mocks(&self) -> Result<&CurveV2Contracts<C>, BacktestError> {
        self.mocks
            .as_ref()
            .ok_or(BacktestError::NotDeployed("curve v2 mocks"))
    }

    fn add_liquidity_call(&self, pool: Address) -> Call {
        let mut words = self.params.amounts.clone();
        // min_mint_amount
        words.push(U256::ZERO);
        Call {
            target: pool,
            data: encode_words(
                &format!("add_liquidity(uint256[{}],uint256)", self.params.num_coins),
                &words,
            )
            .into(),
            value: U256::ZERO,
        }
    }

    /// Approves and adds liquidity through the strategy, which must already hold the amounts.
    fn add_liquidity(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
        contracts: &CurveV2Contracts<C>,
        mut calls: Vec<Call>,
    ) -> Result<(), BacktestError> {
        let pool = contracts.pool.address();
        calls.extend(
            contracts
                .coins
                .iter()
                .map(|coin| coin.approve_call(pool)),
        );
        strategy.multicall(ctx.operator(), &calls)?;
        strategy.execute(ctx.operator(), &self.add_liquidity_call(pool))?;
        Ok(())
    }
}

impl<C: ChainContext> ProtocolAdapter<C> for CurveV2LpAdapter<C> {
    type State = CurveV2State;

    fn name(&self) -> &'static str {
        "CurveV2LPRunner"
    }

    fn deploy_mocks(&mut self, ctx: &ExecutionContext<C>) -> Result<(), BacktestError> {
        let operator = ctx.operator();
        let mut coins = Vec::with_capacity(self.refs.coins.len());
        for (i, coin) in self.refs.coins.iter().enumerate() {
            coins.push(Erc20::deploy_mock(
                &ctx.artifacts,
                Arc::clone(&ctx.chain),
                operator,
                &format!("Mock Coin{}", i),
                &coin.symbol()?,
                coin.decimals()?,
            )?);
        }
        let lp = Erc20::deploy_mock(
            &ctx.artifacts,
            Arc::clone(&ctx.chain),
            operator,
            "Mock Curve V2 LP",
            "crv3m",
            18,
        )?;

        let initial_prices = vec![U256::from(MOCK_INITIAL_PRICE); coins.len() - 1];
        let pool = ctx.artifacts.deploy(
            ctx.chain.as_ref(),
            operator,
            MOCK_POOL,
            (
                operator,
                operator,
                U256::from(MOCK_A),
                U256::from(MOCK_GAMMA),
                U256::from(MOCK_MID_FEE),
                U256::from(MOCK_OUT_FEE),
                U256::from(MOCK_ALLOWED_EXTRA_PROFIT),
                U256::from(MOCK_FEE_GAMMA),
                U256::from(MOCK_ADJUSTMENT_STEP),
                U256::from(MOCK_ADMIN_FEE),
                U256::from(MOCK_MA_HALF_TIME),
                initial_prices,
                coins
                    .iter()
                    .map(Erc20::address)
                    .collect::<Vec<_>>(),
                lp.address(),
            ),
        )?;
        info!(%pool, lp = %lp.address(), "Deployed Curve V2 mocks");

        self.mocks = Some(CurveV2Contracts {
            pool: ContractHandle::new(pool, Arc::clone(&ctx.chain)),
            coins,
            lp,
        });
        Ok(())
    }

    fn strategy_deployment(&self, mocking: bool) -> Result<StrategyDeployment, BacktestError> {
        let pool = if mocking { self.mocks()?.pool.address() } else { self.refs.pool.address() };
        Ok(StrategyDeployment {
            artifact: STRATEGY,
            args: encode_args((pool, U256::from(self.params.num_coins))),
        })
    }

    fn refs_state(&self, block: BlockTag) -> Result<CurveV2State, BacktestError> {
        self.refs.read_state(block)
    }

    fn set_mocks_state(
        &self,
        ctx: &ExecutionContext<C>,
        state: &CurveV2State,
    ) -> Result<(), BacktestError> {
        let mocks = self.mocks()?;
        let operator = ctx.operator();
        let n = self.params.num_coins;

        mocks.pool.send_raw(
            operator,
            encode_words(&format!("set_balances(uint256[{}])", n), &state.balances),
            U256::ZERO,
        )?;
        mocks
            .pool
            .send(operator, "set_D(uint256)", (state.d,), U256::ZERO)?;
        mocks.pool.send_raw(
            operator,
            encode_words("set_A_gamma(uint256[4])", &state.a_gamma),
            U256::ZERO,
        )?;
        mocks.pool.send_raw(
            operator,
            encode_words(&format!("set_packed_prices(uint256[{}])", n - 1), &state.prices),
            U256::ZERO,
        )?;

        // The operator holds every LP token the strategy does not
        let supply = mocks.lp.total_supply(BlockTag::Latest)?;
        if state.total_supply > supply {
            mocks
                .lp
                .mint(operator, operator, state.total_supply - supply)?;
        } else if state.total_supply < supply {
            mocks
                .lp
                .burn_from(operator, operator, supply - state.total_supply)?;
        }
        Ok(())
    }

    fn init_mocks_state(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
        state: &CurveV2State,
    ) -> Result<(), BacktestError> {
        self.set_mocks_state(ctx, state)?;

        let mocks = self.mocks()?;
        let mints = mocks
            .coins
            .iter()
            .zip(self.params.amounts.iter())
            .map(|(coin, amount)| coin.mint_call(strategy.address(), *amount))
            .collect();
        self.add_liquidity(ctx, strategy, mocks, mints)?;

        let minted = mocks
            .lp
            .balance_of(strategy.address(), BlockTag::Latest)?;
        info!(%minted, "Added liquidity to mock pool");
        mocks
            .lp
            .burn_from(ctx.operator(), ctx.operator(), minted)?;

        self.set_mocks_state(ctx, state)
    }

    fn init_strategy(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
    ) -> Result<(), BacktestError> {
        for (coin, amount) in self
            .refs
            .coins
            .iter()
            .zip(self.params.amounts.iter())
        {
            coin.transfer(ctx.operator(), strategy.address(), *amount)?;
        }
        self.add_liquidity(ctx, strategy, &self.refs, Vec::new())
    }
}
