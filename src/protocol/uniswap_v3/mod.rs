//! Uniswap V3 liquidity provision
//!
//! Mocks a pool together with its factory and position manager, so that the strategy's position
//! is a real NFT position whose value follows the price, liquidity and fee growth accumulators
//! written into the mock pool.
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use lazy_static::lazy_static;
use serde::Deserialize;
use tracing::info;

use crate::{
    chain::{BlockTag, ChainContext, ChainError},
    constants::DEADLINE_BUFFER,
    contract::{
        backtester::{Backtester, StrategyDeployment},
        encode_args, encode_input,
        erc20::Erc20,
        ContractHandle,
    },
    errors::BacktestError,
    roles::RoleAddresses,
    runner::{ExecutionContext, ProtocolAdapter},
};

pub mod enums;
pub mod state;

use enums::{check_ticks, FeeAmount};
pub use enums::UniswapV3Strategy;
pub use state::UniswapV3State;

lazy_static! {
    /// Price the mock pool is initialized at before the first state is written.
    static ref INITIAL_SQRT_PRICE_X96: U256 = U256::from(1_000_000_000u64) << 96;
}

const MINT_SIGNATURE: &str =
    "mint((address,address,uint24,int24,int24,uint256,uint256,uint256,uint256,address,uint256))";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UniswapV3LpParams {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount0: U256,
    pub amount1: U256,
}

#[derive(Debug)]
pub struct UniswapV3Refs<C> {
    pub pool: ContractHandle<C>,
    pub manager: ContractHandle<C>,
    pub tokens: [Erc20<C>; 2],
    pub fee: FeeAmount,
}

#[derive(Debug)]
pub struct UniswapV3Mocks<C> {
    /// Index aligned with the reference tokens.
    pub tokens: [Erc20<C>; 2],
    pub weth: Address,
    pub deployer: Address,
    pub factory: ContractHandle<C>,
    pub manager: ContractHandle<C>,
    pub pool: ContractHandle<C>,
}

/// Reads the state of `pool` with the fee growth outside of `ticks`.
pub fn read_pool_state<C: ChainContext>(
    pool: &ContractHandle<C>,
    ticks: (i32, i32),
    block: BlockTag,
) -> Result<UniswapV3State, BacktestError> {
    let (sqrt_price_x96, tick, _, _, _, _, _): (U256, i32, u16, u16, u16, u16, bool) =
        pool.call("slot0()", (), block)?;
    let (_, _, lower0, lower1, _, _, _, _): (u128, i128, U256, U256, i64, U256, u32, bool) =
        pool.call("ticks(int24)", (ticks.0,), block)?;
    let (_, _, upper0, upper1, _, _, _, _): (u128, i128, U256, U256, i64, U256, u32, bool) =
        pool.call("ticks(int24)", (ticks.1,), block)?;
    Ok(UniswapV3State {
        sqrt_price_x96,
        tick,
        liquidity: pool.call("liquidity()", (), block)?,
        fee_growth_global0_x128: pool.call("feeGrowthGlobal0X128()", (), block)?,
        fee_growth_global1_x128: pool.call("feeGrowthGlobal1X128()", (), block)?,
        tick_lower_fee_growth_outside0_x128: lower0,
        tick_lower_fee_growth_outside1_x128: lower1,
        tick_upper_fee_growth_outside0_x128: upper0,
        tick_upper_fee_growth_outside1_x128: upper1,
    })
}

#[derive(Debug)]
pub struct UniswapV3LpAdapter<C> {
    strategy: UniswapV3Strategy,
    params: UniswapV3LpParams,
    refs: UniswapV3Refs<C>,
    mocks: Option<UniswapV3Mocks<C>>,
}

impl<C: ChainContext> UniswapV3LpAdapter<C> {
    pub const REQUIRED_ROLES: &'static [&'static str] = &["pool", "manager"];

    pub fn new(
        chain: Arc<C>,
        roles: &RoleAddresses,
        strategy: UniswapV3Strategy,
        params: UniswapV3LpParams,
    ) -> Result<Self, BacktestError> {
        roles.require(Self::REQUIRED_ROLES)?;
        let pool = ContractHandle::new(roles.get("pool")?, Arc::clone(&chain));
        let manager = ContractHandle::new(roles.get("manager")?, Arc::clone(&chain));

        let fee: u32 = pool.call("fee()", (), BlockTag::Latest)?;
        let fee = FeeAmount::try_from(fee).map_err(|_| {
            BacktestError::StructuralMismatch(format!("pool {} has unknown fee {}", pool.address(), fee))
        })?;
        // Mocks are created with the medium fee, so ticks must suit both pools
        check_ticks(params.tick_lower, params.tick_upper, fee)?;
        check_ticks(params.tick_lower, params.tick_upper, FeeAmount::Medium)?;

        let token0: Address = pool.call("token0()", (), BlockTag::Latest)?;
        let token1: Address = pool.call("token1()", (), BlockTag::Latest)?;

        Ok(Self {
            strategy,
            params,
            refs: UniswapV3Refs {
                pool,
                manager,
                tokens: [Erc20::new(token0, Arc::clone(&chain)), Erc20::new(token1, chain)],
                fee,
            },
            mocks: None,
        })
    }

    pub fn refs(&self) -> &UniswapV3Refs<C> {
        &self.refs
    }

    pub fn mocks(&self) -> Result<&UniswapV3Mocks<C>, BacktestError> {
        self.mocks
            .as_ref()
            .ok_or(BacktestError::NotDeployed("uniswap v3 mocks"))
    }

    fn ticks(&self) -> (i32, i32) {
        (self.params.tick_lower, self.params.tick_upper)
    }

    /// Deploys the two mock tokens so that the mock of token0 sorts below the mock of token1,
    /// keeping the pool's token order.
    fn deploy_tokens(&self, ctx: &ExecutionContext<C>) -> Result<[Erc20<C>; 2], BacktestError> {
        let operator = ctx.operator();
        let nonce = ctx.chain.nonce(operator)?;
        let order = if operator.create(nonce) < operator.create(nonce + 1) { [0, 1] } else { [1, 0] };

        let mut deployed = Vec::with_capacity(2);
        for i in order {
            let token = &self.refs.tokens[i];
            let symbol = token.symbol()?;
            let decimals = token.decimals()?;
            deployed.push((
                i,
                Erc20::deploy_mock(
                    &ctx.artifacts,
                    Arc::clone(&ctx.chain),
                    operator,
                    &format!("Mock Token{}", i),
                    &symbol,
                    decimals,
                )?,
            ));
        }
        deployed.sort_by_key(|(i, _)| *i);
        let mut tokens = deployed.into_iter().map(|(_, t)| t);
        match (tokens.next(), tokens.next()) {
            (Some(token0), Some(token1)) => Ok([token0, token1]),
            _ => Err(BacktestError::NotDeployed("uniswap v3 mock tokens")),
        }
    }

    /// Mints the position through the strategy, which must hold and have approved both amounts,
    /// then stores its id in the strategy.
    fn mint_position(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
        manager: &ContractHandle<C>,
        tokens: [Address; 2],
        fee: FeeAmount,
    ) -> Result<U256, BacktestError> {
        let deadline = U256::from(ctx.chain.head()?.timestamp + DEADLINE_BUFFER);
        let params = (
            tokens[0],
            tokens[1],
            fee.as_u24(),
            self.params.tick_lower,
            self.params.tick_upper,
            self.params.amount0,
            self.params.amount1,
            U256::ZERO,
            U256::ZERO,
            strategy.address(),
            deadline,
        );
        strategy.execute(ctx.operator(), &manager.calldata(MINT_SIGNATURE, (params,)))?;

        let count: U256 = manager.call("balanceOf(address)", (strategy.address(),), BlockTag::Latest)?;
        let index = count
            .checked_sub(U256::from(1))
            .ok_or_else(|| ChainError::Missing(format!("position of {}", strategy.address())))?;
        let id: U256 = manager.call(
            "tokenOfOwnerByIndex(address,uint256)",
            (strategy.address(), index),
            BlockTag::Latest,
        )?;
        strategy.push(ctx.operator(), id)?;
        info!(%id, manager = %manager.address(), "Minted position");
        Ok(id)
    }
}

impl<C: ChainContext> ProtocolAdapter<C> for UniswapV3LpAdapter<C> {
    type State = UniswapV3State;

    fn name(&self) -> &'static str {
        self.strategy.runner_name()
    }

    fn deploy_mocks(&mut self, ctx: &ExecutionContext<C>) -> Result<(), BacktestError> {
        let operator = ctx.operator();
        let tokens = self.deploy_tokens(ctx)?;

        let mut weth = None;
        for token in &tokens {
            if token.symbol()? == "WETH" {
                weth = Some(token.address());
            }
        }
        let weth = match weth {
            Some(weth) => weth,
            None => Erc20::deploy_mock(
                &ctx.artifacts,
                Arc::clone(&ctx.chain),
                operator,
                "Mock WETH9",
                "WETH",
                18,
            )?
            .address(),
        };

        let chain = ctx.chain.as_ref();
        let deployer = ctx
            .artifacts
            .deploy(chain, operator, "MockUniswapV3PoolDeployer", ())?;
        let factory = ContractHandle::new(
            ctx.artifacts
                .deploy(chain, operator, "MockUniswapV3Factory", (deployer,))?,
            Arc::clone(&ctx.chain),
        );
        let manager = ContractHandle::new(
            ctx.artifacts.deploy(
                chain,
                operator,
                "MockNonfungiblePositionManager",
                (factory.address(), weth),
            )?,
            Arc::clone(&ctx.chain),
        );

        let key = (tokens[0].address(), tokens[1].address(), FeeAmount::Medium.as_u24());
        factory.send(operator, "createPool(address,address,uint24)", key, U256::ZERO)?;
        let pool: Address = factory.call("getPool(address,address,uint24)", key, BlockTag::Latest)?;
        let pool = ContractHandle::new(pool, Arc::clone(&ctx.chain));
        pool.send(operator, "initialize(uint160)", (*INITIAL_SQRT_PRICE_X96,), U256::ZERO)?;
        info!(pool = %pool.address(), manager = %manager.address(), "Deployed Uniswap V3 mocks");

        self.mocks = Some(UniswapV3Mocks { tokens, weth, deployer, factory, manager, pool });
        Ok(())
    }

    fn strategy_deployment(&self, mocking: bool) -> Result<StrategyDeployment, BacktestError> {
        let manager =
            if mocking { self.mocks()?.manager.address() } else { self.refs.manager.address() };
        Ok(StrategyDeployment { artifact: self.strategy.artifact(), args: encode_args((manager,)) })
    }

    fn refs_state(&self, block: BlockTag) -> Result<UniswapV3State, BacktestError> {
        read_pool_state(&self.refs.pool, self.ticks(), block)
    }

    fn set_mocks_state(
        &self,
        ctx: &ExecutionContext<C>,
        state: &UniswapV3State,
    ) -> Result<(), BacktestError> {
        let mocks = self.mocks()?;
        let calls: Vec<Bytes> = vec![
            encode_input("setSqrtPriceX96(uint160)", (state.sqrt_price_x96,)).into(),
            encode_input("setLiquidity(uint128)", (state.liquidity,)).into(),
            encode_input(
                "setFeeGrowthGlobalX128(uint256,uint256)",
                (state.fee_growth_global0_x128, state.fee_growth_global1_x128),
            )
            .into(),
            encode_input(
                "setFeeGrowthOutsideX128(int24,uint256,uint256)",
                (
                    self.params.tick_lower,
                    state.tick_lower_fee_growth_outside0_x128,
                    state.tick_lower_fee_growth_outside1_x128,
                ),
            )
            .into(),
            encode_input(
                "setFeeGrowthOutsideX128(int24,uint256,uint256)",
                (
                    self.params.tick_upper,
                    state.tick_upper_fee_growth_outside0_x128,
                    state.tick_upper_fee_growth_outside1_x128,
                ),
            )
            .into(),
        ];
        mocks
            .pool
            .send(ctx.operator(), "calls(bytes[])", (calls,), U256::ZERO)?;
        Ok(())
    }

    fn init_mocks_state(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
        state: &UniswapV3State,
    ) -> Result<(), BacktestError> {
        self.set_mocks_state(ctx, state)?;

        let mocks = self.mocks()?;
        let manager = mocks.manager.address();
        let [token0, token1] = &mocks.tokens;
        strategy.multicall(
            ctx.operator(),
            &[
                token0.approve_call(manager),
                token1.approve_call(manager),
                token0.mint_call(strategy.address(), self.params.amount0),
                token1.mint_call(strategy.address(), self.params.amount1),
            ],
        )?;
        self.mint_position(
            ctx,
            strategy,
            &mocks.manager,
            [token0.address(), token1.address()],
            FeeAmount::Medium,
        )?;

        self.set_mocks_state(ctx, state)
    }

    fn init_strategy(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
    ) -> Result<(), BacktestError> {
        let [token0, token1] = &self.refs.tokens;
        token0.transfer(ctx.operator(), strategy.address(), self.params.amount0)?;
        token1.transfer(ctx.operator(), strategy.address(), self.params.amount1)?;
        let manager = self.refs.manager.address();
        strategy.multicall(
            ctx.operator(),
            &[token0.approve_call(manager), token1.approve_call(manager)],
        )?;
        self.mint_position(
            ctx,
            strategy,
            &self.refs.manager,
            [token0.address(), token1.address()],
            self.refs.fee,
        )?;
        Ok(())
    }
}
