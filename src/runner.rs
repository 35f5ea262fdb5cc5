//! Backtest and replay scheduling
//!
//! A [`Runner`] owns one session: the chain context, the execution account, a protocol adapter and
//! the strategy contract. It walks a block range and, for every block, reads reference state,
//! applies it (by writing into mocks or by replaying the block's transactions), evaluates the
//! strategy and records the result. Steps never overlap: mocks are shared mutable state and each
//! step depends on the writes of the one before.
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tracing::{debug, error, info, warn};

use crate::{
    account::ExecutionAccount,
    chain::{BlockTag, ChainContext, ChainError, HistoricalTx, TxRequest},
    contract::{
        artifacts::ArtifactStore,
        backtester::{Backtester, StrategyDeployment, StrategySlot},
    },
    errors::BacktestError,
    models::{BlockRange, RunnerStatus},
    recorder::Recorder,
    snapshot::Snapshot,
};

/// What every protocol adapter gets to work with.
#[derive(Debug)]
pub struct ExecutionContext<C> {
    pub chain: Arc<C>,
    pub artifacts: ArtifactStore,
    pub account: ExecutionAccount,
}

impl<C: ChainContext> ExecutionContext<C> {
    pub fn new(chain: Arc<C>, artifacts: ArtifactStore, account: ExecutionAccount) -> Self {
        Self { chain, artifacts, account }
    }

    /// Address signing every mock-mutating and strategy transaction.
    pub fn operator(&self) -> Address {
        self.account.address
    }
}

/// Protocol specific half of a runner.
///
/// An adapter reads reference state, writes it into its mocks and knows how to open the
/// strategy's initial position, either against its mocks or against the reference contracts.
pub trait ProtocolAdapter<C: ChainContext> {
    type State: Snapshot + Clone;

    fn name(&self) -> &'static str;

    /// Deploys fresh mocks for every reference contract the strategy touches.
    fn deploy_mocks(&mut self, ctx: &ExecutionContext<C>) -> Result<(), BacktestError>;

    /// Contract and constructor arguments of the strategy. With `mocking` the strategy is wired
    /// to the mocks, otherwise to the reference contracts.
    fn strategy_deployment(&self, mocking: bool) -> Result<StrategyDeployment, BacktestError>;

    /// Reads the reference state at `block`.
    fn refs_state(&self, block: BlockTag) -> Result<Self::State, BacktestError>;

    /// Writes `state` into the mocks. Applying the same state twice leaves the mocks unchanged.
    fn set_mocks_state(
        &self,
        ctx: &ExecutionContext<C>,
        state: &Self::State,
    ) -> Result<(), BacktestError>;

    /// One-time genesis: aligns the mocks with `state` and opens the strategy's position on them.
    fn init_mocks_state(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
        state: &Self::State,
    ) -> Result<(), BacktestError>;

    /// Opens the strategy's position against the reference contracts.
    fn init_strategy(
        &self,
        ctx: &ExecutionContext<C>,
        strategy: &Backtester<C>,
    ) -> Result<(), BacktestError>;

    /// Rebalances the strategy after block `number`. Passive strategies do nothing.
    fn update_strategy(
        &self,
        _ctx: &ExecutionContext<C>,
        _strategy: &Backtester<C>,
        _number: u64,
        _state: &Self::State,
    ) -> Result<(), BacktestError> {
        Ok(())
    }

    /// Evaluates the strategy along simulated state paths. `strategy` is `None` until the runner
    /// has been set up.
    fn forwardtest(
        &self,
        _ctx: &ExecutionContext<C>,
        _strategy: Option<&Backtester<C>>,
        _paths: &[Vec<Self::State>],
    ) -> Result<Vec<Vec<U256>>, BacktestError> {
        Err(BacktestError::NotImplemented("forwardtest"))
    }
}

/// Outcome of submitting a batch of historical transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitSummary {
    pub applied: usize,
    pub reverted: usize,
}

pub struct Runner<C: ChainContext, A: ProtocolAdapter<C>> {
    ctx: ExecutionContext<C>,
    adapter: A,
    strategy: StrategySlot<C>,
    status: RunnerStatus,
    initialized: bool,
}

impl<C: ChainContext, A: ProtocolAdapter<C>> Runner<C, A> {
    /// Creates a runner and funds its execution account.
    pub fn new(ctx: ExecutionContext<C>, adapter: A) -> Result<Self, BacktestError> {
        ctx.account.fund(ctx.chain.as_ref())?;
        Ok(Self {
            ctx,
            adapter,
            strategy: StrategySlot::default(),
            status: RunnerStatus::Uninitialized,
            initialized: false,
        })
    }

    pub fn status(&self) -> RunnerStatus {
        self.status
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn context(&self) -> &ExecutionContext<C> {
        &self.ctx
    }

    pub fn strategy(&self) -> Result<&Backtester<C>, BacktestError> {
        self.strategy.get()
    }

    /// Deploys the mocks, if `mocking`, then the strategy.
    pub fn setup(&mut self, mocking: bool) -> Result<(), BacktestError> {
        if self.strategy.is_deployed() {
            return Err(BacktestError::AlreadyDeployed("backtester strategy"));
        }
        self.status = RunnerStatus::Setup;
        if mocking {
            info!(runner = self.adapter.name(), "Deploying mocks ...");
            self.adapter.deploy_mocks(&self.ctx)?;
        }
        let deployment = self
            .adapter
            .strategy_deployment(mocking)?;
        self.strategy.deploy(
            &self.ctx.artifacts,
            Arc::clone(&self.ctx.chain),
            self.ctx.operator(),
            &deployment,
        )?;
        self.initialized = true;
        Ok(())
    }

    /// Transplants reference state into mocks at every `range.step` block and records the
    /// strategy's value.
    pub fn backtest(
        &mut self,
        recorder: &mut dyn Recorder,
        range: BlockRange,
    ) -> Result<(), BacktestError> {
        let result = self.run_backtest(recorder, range);
        self.finish(result)
    }

    /// Re-executes every historical transaction from `start` to `stop` on the fork and records the
    /// strategy's value after each block.
    pub fn replay(
        &mut self,
        recorder: &mut dyn Recorder,
        start: u64,
        stop: Option<u64>,
    ) -> Result<(), BacktestError> {
        let result = self.run_replay(recorder, start, stop);
        self.finish(result)
    }

    pub fn forwardtest(&self, paths: &[Vec<A::State>]) -> Result<Vec<Vec<U256>>, BacktestError> {
        self.adapter
            .forwardtest(&self.ctx, self.strategy.get().ok(), paths)
    }

    /// Submits historical transactions from their original senders.
    ///
    /// With `ignore_reverts`, a reverting transaction is logged and counted; it has no effect on
    /// the fork. Otherwise the first revert aborts the batch.
    pub fn submit_txs(
        &self,
        txs: &[HistoricalTx],
        ignore_reverts: bool,
    ) -> Result<SubmitSummary, BacktestError> {
        let chain = self.ctx.chain.as_ref();
        let mut summary = SubmitSummary::default();
        for tx in txs {
            chain.impersonate(tx.from)?;
            match chain.send(&TxRequest::from(tx)) {
                Ok(receipt) => {
                    debug!(hash = %tx.hash, block = receipt.block_number, "Applied historical tx");
                    summary.applied += 1;
                }
                Err(ChainError::Reverted { reason }) if ignore_reverts => {
                    warn!(hash = %tx.hash, %reason, "Historical tx reverted");
                    summary.reverted += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(summary)
    }

    /// Re-forks at `number` and carries the base fee of the fork head over to the next block.
    pub fn reset_fork(&self, number: u64) -> Result<(), BacktestError> {
        let chain = self.ctx.chain.as_ref();
        chain.reset_fork(number)?;
        let head = chain.head()?;
        match head.base_fee {
            Some(base_fee) => chain.set_next_block_base_fee(base_fee)?,
            None => debug!(number = head.number, "Fork head has no base fee"),
        }
        if self.ctx.operator() != chain.default_account()? {
            chain.impersonate(self.ctx.operator())?;
        }
        self.ctx.account.fund(chain)?;
        Ok(())
    }

    fn ensure_fork(&self) -> Result<(), BacktestError> {
        match self.ctx.chain.fork_provider() {
            Some(provider) => {
                debug!(%provider, "Connected to fork");
                Ok(())
            }
            None => Err(BacktestError::WrongNetwork("not connected to a local fork".to_string())),
        }
    }

    fn ensure_initialized(&self) -> Result<(), BacktestError> {
        if self.initialized {
            Ok(())
        } else {
            Err(BacktestError::NotInitialized)
        }
    }

    fn finish(&mut self, result: Result<(), BacktestError>) -> Result<(), BacktestError> {
        match &result {
            Ok(()) => self.status = RunnerStatus::Complete,
            Err(err) => {
                error!(runner = self.adapter.name(), %err, "Run failed");
                self.status = RunnerStatus::Failed;
            }
        }
        result
    }

    fn run_backtest(
        &mut self,
        recorder: &mut dyn Recorder,
        range: BlockRange,
    ) -> Result<(), BacktestError> {
        self.ensure_fork()?;
        let range = range.resolve(self.ctx.chain.head()?.number)?;

        info!("Setting up runner ...");
        self.setup(true)?;
        self.ensure_initialized()?;
        let strategy = self.strategy.get()?.clone();

        info!("Initializing state of mocks from block number {} ...", range.start);
        let state = self
            .adapter
            .refs_state(BlockTag::Number(range.start))?;
        self.adapter
            .init_mocks_state(&self.ctx, &strategy, &state)?;

        self.status = RunnerStatus::Running;
        for number in range.blocks() {
            info!("Processing block {} ...", number);
            let state = self
                .adapter
                .refs_state(BlockTag::Number(number))?;
            info!(?state, "State of refs at block {}", number);
            self.adapter
                .set_mocks_state(&self.ctx, &state)?;
            self.step(recorder, &strategy, number, &state)?;
        }
        Ok(())
    }

    fn run_replay(
        &mut self,
        recorder: &mut dyn Recorder,
        start: u64,
        stop: Option<u64>,
    ) -> Result<(), BacktestError> {
        self.ensure_fork()?;
        let range = BlockRange::replay(start, stop).resolve(self.ctx.chain.head()?.number)?;

        info!("Resetting fork to block number {} ...", range.start);
        self.reset_fork(range.start)?;

        info!("Setting up runner ...");
        self.setup(false)?;
        self.ensure_initialized()?;
        let strategy = self.strategy.get()?.clone();
        self.adapter
            .init_strategy(&self.ctx, &strategy)?;

        self.status = RunnerStatus::Running;
        for number in range.blocks() {
            info!("Processing block {} ...", number);
            let state = self.adapter.refs_state(BlockTag::Latest)?;
            info!(?state, "State of refs at block {}", number);

            let txs = self
                .ctx
                .chain
                .reference_transactions(number)?;
            info!("Submitting {} txs from block {} ...", txs.len(), number);
            let summary = self.submit_txs(&txs, true)?;
            debug!(applied = summary.applied, reverted = summary.reverted, "Submitted txs");

            self.step(recorder, &strategy, number, &state)?;
        }
        Ok(())
    }

    /// Evaluation tail shared by both loops: value, record, update, replenish.
    fn step(
        &self,
        recorder: &mut dyn Recorder,
        strategy: &Backtester<C>,
        number: u64,
        state: &A::State,
    ) -> Result<(), BacktestError> {
        let value = strategy.value()?;
        info!("Backtester value at block {}: {}", number, value);
        recorder.record(number, value, state)?;
        self.adapter
            .update_strategy(&self.ctx, strategy, number, state)?;
        self.ctx
            .account
            .fund(self.ctx.chain.as_ref())
    }
}
