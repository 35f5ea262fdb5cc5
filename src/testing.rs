//! In-memory chain for unit tests
//!
//! `FakeChain` implements `ChainContext` over a set of in-memory contracts that decode the same
//! calldata the runners send to real contracts. Reference contracts keep per-block state so that
//! point-in-time reads can be checked, and every transaction is atomic: a failing call restores
//! all contract state and balances.
use std::{
    any::Any,
    cell::{Cell, RefCell},
    collections::{BTreeMap, HashMap, HashSet},
    fmt::Debug,
    sync::Arc,
};

use alloy_primitives::{Address, Bytes, B256, I256, U256};
use alloy_sol_types::SolValue;
use lazy_static::lazy_static;

use crate::{
    account::ExecutionAccount,
    chain::{
        BlockHeader, BlockTag, CallRequest, ChainContext, ChainError, ForkProvider, HistoricalTx,
        TxReceipt, TxRequest,
    },
    contract::{artifacts::ArtifactStore, selector},
    errors::BacktestError,
    recorder::Recorder,
    runner::ExecutionContext,
    snapshot::{flatten_row, Snapshot},
};

lazy_static! {
    pub static ref OPERATOR: Address = Address::repeat_byte(0x0a);
}

pub const HEAD_NUMBER: u64 = 16_254_800;
pub const HEAD_TIMESTAMP: u64 = 1_671_716_000;

/// Artifact names and the tag their fake bytecode carries.
const ARTIFACTS: &[(&str, u8)] = &[
    ("MockERC20", 1),
    ("MockBacktest", 2),
    ("CurveV2LPBacktest", 3),
    ("UniswapV3LPBacktest", 4),
    ("UniswapV3LPTotal0Backtest", 5),
    ("UniswapV3LPTotal1Backtest", 6),
    ("GearboxV2CABacktest", 7),
    ("MockTricrypto2", 8),
    ("MockUniswapV3PoolDeployer", 9),
    ("MockUniswapV3Factory", 10),
    ("MockNonfungiblePositionManager", 11),
    ("MockAggregatorV3", 12),
];

pub fn artifact_store() -> ArtifactStore {
    ArtifactStore::in_memory(
        ARTIFACTS
            .iter()
            .map(|(name, tag)| (name.to_string(), vec![0xfe, *tag]))
            .collect(),
    )
}

/// Execution context signing with `OPERATOR`, topped up to 10_000 ether.
pub fn context(chain: &Arc<FakeChain>) -> ExecutionContext<FakeChain> {
    ExecutionContext::new(
        Arc::clone(chain),
        artifact_store(),
        ExecutionAccount {
            address: *OPERATOR,
            min_balance: U256::from(10_000u64) * U256::from(10u64).pow(U256::from(18u64)),
        },
    )
}

pub fn revert(reason: &str) -> ChainError {
    ChainError::Reverted { reason: reason.to_string() }
}

fn decode_err(err: alloy_sol_types::Error) -> ChainError {
    ChainError::Decode(err.to_string())
}

macro_rules! args {
    ($data:expr, $t:ty) => {
        <$t as SolValue>::abi_decode_params($data, true).map_err(decode_err)?
    };
}

/// Resolves a selector against the signatures a fake understands.
fn lookup(abi: &[&'static str], sel: [u8; 4]) -> Result<&'static str, ChainError> {
    abi.iter()
        .find(|sig| selector(sig) == sel)
        .copied()
        .ok_or_else(|| revert("unknown selector"))
}

fn words(data: &[u8]) -> Vec<U256> {
    data.chunks(32)
        .map(U256::from_be_slice)
        .collect()
}

/// Current state plus per-block history for point-in-time reads.
#[derive(Debug, Clone, Default)]
pub struct Versioned<T> {
    pub current: T,
    pub history: BTreeMap<u64, T>,
}

impl<T: Clone> Versioned<T> {
    pub fn new(current: T) -> Self {
        Self { current, history: BTreeMap::new() }
    }

    pub fn with_history(history: Vec<(u64, T)>) -> Self {
        let history: BTreeMap<u64, T> = history.into_iter().collect();
        let current = history
            .values()
            .next_back()
            .cloned()
            .expect("history must not be empty");
        Self { current, history }
    }

    pub fn at(&self, block: Option<u64>) -> &T {
        match block {
            Some(number) => self
                .history
                .range(..=number)
                .next_back()
                .map(|(_, v)| v)
                .unwrap_or(&self.current),
            None => &self.current,
        }
    }
}

pub struct Env<'a> {
    pub chain: &'a FakeChain,
    pub sender: Address,
    pub this: Address,
    pub value: U256,
    pub block: Option<u64>,
}

impl Env<'_> {
    pub fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        self.call_with_value(to, data, U256::ZERO)
    }

    pub fn call_with_value(
        &self,
        to: Address,
        data: Vec<u8>,
        value: U256,
    ) -> Result<Vec<u8>, ChainError> {
        self.chain
            .execute(self.this, to, &data, value, self.block)
    }
}

pub trait FakeContract: Debug {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError>;
    fn clone_box(&self) -> Box<dyn FakeContract>;
    fn as_any(&self) -> &dyn Any;
}

macro_rules! fake_contract_boilerplate {
    () => {
        fn clone_box(&self) -> Box<dyn FakeContract> {
            Box::new(self.clone())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    ResetFork(u64),
    SetNextBaseFee(U256),
    SetBalance(Address, U256),
    Impersonate(Address),
    Sent { from: Address, to: Option<Address>, signature: Option<[u8; 4]>, reverted: bool },
}

type World = (HashMap<Address, Box<dyn FakeContract>>, HashMap<Address, U256>);

#[derive(Debug)]
pub struct FakeChain {
    contracts: RefCell<HashMap<Address, Box<dyn FakeContract>>>,
    balances: RefCell<HashMap<Address, U256>>,
    nonces: RefCell<HashMap<Address, u64>>,
    unlocked: RefCell<HashSet<Address>>,
    head: RefCell<BlockHeader>,
    history: RefCell<HashMap<u64, Vec<HistoricalTx>>>,
    events: RefCell<Vec<ChainEvent>>,
    tx_count: Cell<u64>,
    fork_provider: Option<ForkProvider>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeChain {
    pub fn new() -> Self {
        Self::with_provider(Some(ForkProvider::Anvil))
    }

    pub fn with_provider(fork_provider: Option<ForkProvider>) -> Self {
        let chain = Self {
            contracts: RefCell::new(HashMap::new()),
            balances: RefCell::new(HashMap::new()),
            nonces: RefCell::new(HashMap::new()),
            unlocked: RefCell::new(HashSet::from([*OPERATOR])),
            head: RefCell::new(BlockHeader {
                number: HEAD_NUMBER,
                hash: B256::repeat_byte(0x11),
                timestamp: HEAD_TIMESTAMP,
                base_fee: Some(U256::from(20_000_000_000u64)),
            }),
            history: RefCell::new(HashMap::new()),
            events: RefCell::new(Vec::new()),
            tx_count: Cell::new(0),
            fork_provider,
        };
        chain
            .balances
            .borrow_mut()
            .insert(*OPERATOR, U256::from(10u64).pow(U256::from(24u64)));
        chain
    }

    pub fn install(&self, address: Address, contract: Box<dyn FakeContract>) {
        self.contracts
            .borrow_mut()
            .insert(address, contract);
    }

    /// Inspects an installed contract.
    pub fn inspect<T: 'static, R>(&self, address: Address, f: impl FnOnce(&T) -> R) -> R {
        let contracts = self.contracts.borrow();
        let contract = contracts
            .get(&address)
            .and_then(|c| c.as_any().downcast_ref::<T>())
            .expect("no contract of this type at address");
        f(contract)
    }

    pub fn set_head(&self, number: u64) {
        self.head.borrow_mut().number = number;
    }

    pub fn push_history(&self, number: u64, txs: Vec<HistoricalTx>) {
        self.history
            .borrow_mut()
            .insert(number, txs);
    }

    pub fn events(&self) -> Vec<ChainEvent> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    fn save(&self) -> World {
        let contracts = self
            .contracts
            .borrow()
            .iter()
            .map(|(k, v)| (*k, v.clone_box()))
            .collect();
        (contracts, self.balances.borrow().clone())
    }

    fn restore(&self, world: World) {
        *self.contracts.borrow_mut() = world.0;
        *self.balances.borrow_mut() = world.1;
    }

    fn transfer_eth(&self, from: Address, to: Address, value: U256) -> Result<(), ChainError> {
        let mut balances = self.balances.borrow_mut();
        let from_balance = balances
            .get(&from)
            .copied()
            .unwrap_or_default();
        if from_balance < value {
            return Err(revert("insufficient funds"));
        }
        balances.insert(from, from_balance - value);
        *balances.entry(to).or_default() += value;
        Ok(())
    }

    /// Executes a message call. Nested calls to other contracts go through `Env::call`.
    pub fn execute(
        &self,
        sender: Address,
        to: Address,
        data: &[u8],
        value: U256,
        block: Option<u64>,
    ) -> Result<Vec<u8>, ChainError> {
        if !value.is_zero() {
            self.transfer_eth(sender, to, value)?;
        }
        let contract = self.contracts.borrow_mut().remove(&to);
        let Some(mut contract) = contract else {
            return if data.is_empty() { Ok(vec![]) } else { Err(revert("call to non-contract")) };
        };
        let result = if data.len() < 4 {
            Err(revert("no fallback"))
        } else {
            let env = Env { chain: self, sender, this: to, value, block };
            let sel = [data[0], data[1], data[2], data[3]];
            contract.handle(&env, sel, &data[4..])
        };
        self.contracts
            .borrow_mut()
            .insert(to, contract);
        result
    }

    fn create(&self, deployer: Address, init_code: &[u8]) -> Result<Address, ChainError> {
        if init_code.len() < 2 || init_code[0] != 0xfe {
            return Err(revert("unknown init code"));
        }
        let nonce = self.nonce(deployer)?;
        let address = deployer.create(nonce);
        let contract = build_contract(init_code[1], &init_code[2..])?;
        self.install(address, contract);
        Ok(address)
    }

    fn bump_nonce(&self, address: Address) {
        *self
            .nonces
            .borrow_mut()
            .entry(address)
            .or_default() += 1;
    }
}

fn narrow(value: u16) -> Result<u8, ChainError> {
    u8::try_from(value).map_err(|_| revert("uint8 out of range"))
}

fn build_contract(tag: u8, args: &[u8]) -> Result<Box<dyn FakeContract>, ChainError> {
    Ok(match tag {
        1 => {
            let (name, symbol, decimals) = args!(args, (String, String, u16));
            Box::new(FakeErc20::new(&name, &symbol, narrow(decimals)?))
        }
        2 => Box::new(FakeBacktester::new(BacktesterKind::Plain)),
        3 => {
            let (pool, _) = args!(args, (Address, U256));
            Box::new(FakeBacktester::new(BacktesterKind::CurveLp { pool }))
        }
        4..=7 => {
            let (_manager,) = args!(args, (Address,));
            Box::new(FakeBacktester::new(BacktesterKind::Plain))
        }
        8 => Box::new(FakeCurvePool::from_ctor(args)?),
        9 => Box::new(FakeNoop),
        10 => {
            let (_deployer,) = args!(args, (Address,));
            Box::new(FakeUniswapFactory::default())
        }
        11 => {
            let (factory, weth) = args!(args, (Address, Address));
            Box::new(FakePositionManager::new(factory, weth))
        }
        12 => {
            let (description, decimals, version) = args!(args, (String, u16, U256));
            Box::new(FakeFeed::mock(&description, narrow(decimals)?, version))
        }
        _ => return Err(revert("unknown artifact")),
    })
}

impl ChainContext for FakeChain {
    fn fork_provider(&self) -> Option<ForkProvider> {
        self.fork_provider
    }

    fn head(&self) -> Result<BlockHeader, ChainError> {
        Ok(*self.head.borrow())
    }

    fn reset_fork(&self, number: u64) -> Result<(), ChainError> {
        if self.fork_provider.is_none() {
            return Err(ChainError::UnsupportedProvider("reset".to_string()));
        }
        self.events
            .borrow_mut()
            .push(ChainEvent::ResetFork(number));
        self.head.borrow_mut().number = number;
        Ok(())
    }

    fn set_next_block_base_fee(&self, fee: U256) -> Result<(), ChainError> {
        self.events
            .borrow_mut()
            .push(ChainEvent::SetNextBaseFee(fee));
        Ok(())
    }

    fn reference_transactions(&self, number: u64) -> Result<Vec<HistoricalTx>, ChainError> {
        Ok(self
            .history
            .borrow()
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    fn call(&self, request: &CallRequest, block: BlockTag) -> Result<Bytes, ChainError> {
        let block = match block {
            BlockTag::Latest => None,
            BlockTag::Number(number) => Some(number),
        };
        let saved = self.save();
        let result = self.execute(
            request.from.unwrap_or_default(),
            request.to,
            &request.data,
            request.value,
            block,
        );
        self.restore(saved);
        result.map(Bytes::from)
    }

    fn send(&self, tx: &TxRequest) -> Result<TxReceipt, ChainError> {
        if !self.unlocked.borrow().contains(&tx.from) {
            return Err(ChainError::Rpc(format!("unknown account {}", tx.from)));
        }
        let saved = self.save();
        let result = match tx.to {
            Some(to) => self
                .execute(tx.from, to, &tx.data, tx.value, None)
                .map(|_| None),
            None => self.create(tx.from, &tx.data).map(Some),
        };
        self.bump_nonce(tx.from);
        if result.is_err() {
            self.restore(saved);
        }
        let signature = (tx.data.len() >= 4 && tx.to.is_some())
            .then(|| [tx.data[0], tx.data[1], tx.data[2], tx.data[3]]);
        self.events
            .borrow_mut()
            .push(ChainEvent::Sent {
                from: tx.from,
                to: tx.to,
                signature,
                reverted: result.is_err(),
            });
        self.tx_count.set(self.tx_count.get() + 1);
        let contract_address = result?;
        let mut head = self.head.borrow_mut();
        head.number += 1;
        Ok(TxReceipt {
            hash: B256::from(U256::from(self.tx_count.get())),
            block_number: head.number,
            contract_address,
            gas_used: U256::from(21_000u64),
        })
    }

    fn balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self
            .balances
            .borrow()
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    fn set_balance(&self, address: Address, amount: U256) -> Result<(), ChainError> {
        self.events
            .borrow_mut()
            .push(ChainEvent::SetBalance(address, amount));
        self.balances
            .borrow_mut()
            .insert(address, amount);
        Ok(())
    }

    fn nonce(&self, address: Address) -> Result<u64, ChainError> {
        Ok(self
            .nonces
            .borrow()
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    fn impersonate(&self, address: Address) -> Result<(), ChainError> {
        self.events
            .borrow_mut()
            .push(ChainEvent::Impersonate(address));
        self.unlocked.borrow_mut().insert(address);
        Ok(())
    }

    fn default_account(&self) -> Result<Address, ChainError> {
        Ok(*OPERATOR)
    }
}

/// Records rows in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    pub rows: Vec<Vec<(String, String)>>,
}

impl MemoryRecorder {
    pub fn column(&self, name: &str) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| {
                row.iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
            })
            .collect()
    }
}

impl Recorder for MemoryRecorder {
    fn record(
        &mut self,
        number: u64,
        value: U256,
        state: &dyn Snapshot,
    ) -> Result<(), BacktestError> {
        self.rows
            .push(flatten_row(number, value, state));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FakeNoop;

impl FakeContract for FakeNoop {
    fn handle(&mut self, _env: &Env, _sel: [u8; 4], _args: &[u8]) -> Result<Vec<u8>, ChainError> {
        Err(revert("unknown selector"))
    }

    fake_contract_boilerplate!();
}

#[derive(Debug, Clone)]
pub struct FakeErc20 {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub balances: HashMap<Address, U256>,
    pub allowances: HashMap<(Address, Address), U256>,
    pub total_supply: Versioned<U256>,
}

const ERC20_ABI: &[&str] = &[
    "name()",
    "symbol()",
    "decimals()",
    "totalSupply()",
    "balanceOf(address)",
    "allowance(address,address)",
    "approve(address,uint256)",
    "transfer(address,uint256)",
    "transferFrom(address,address,uint256)",
    "mint(address,uint256)",
    "burnFrom(address,uint256)",
];

impl FakeErc20 {
    pub fn new(name: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            total_supply: Versioned::default(),
        }
    }

    pub fn with_balance(mut self, owner: Address, amount: U256) -> Self {
        self.balances.insert(owner, amount);
        self.total_supply.current += amount;
        self
    }

    pub fn balance(&self, owner: Address) -> U256 {
        self.balances
            .get(&owner)
            .copied()
            .unwrap_or_default()
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: U256) -> Result<(), ChainError> {
        let from_balance = self.balance(from);
        if from_balance < amount {
            return Err(revert("ERC20: transfer amount exceeds balance"));
        }
        self.balances
            .insert(from, from_balance - amount);
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }
}

impl FakeContract for FakeErc20 {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        match lookup(ERC20_ABI, sel)? {
            "name()" => Ok(self.name.clone().abi_encode()),
            "symbol()" => Ok(self.symbol.clone().abi_encode()),
            "decimals()" => Ok(u16::from(self.decimals).abi_encode()),
            "totalSupply()" => Ok(self
                .total_supply
                .at(env.block)
                .abi_encode()),
            "balanceOf(address)" => {
                let (owner,) = args!(args, (Address,));
                Ok(self.balance(owner).abi_encode())
            }
            "allowance(address,address)" => {
                let key = args!(args, (Address, Address));
                Ok(self
                    .allowances
                    .get(&key)
                    .copied()
                    .unwrap_or_default()
                    .abi_encode())
            }
            "approve(address,uint256)" => {
                let (spender, amount) = args!(args, (Address, U256));
                self.allowances
                    .insert((env.sender, spender), amount);
                Ok(true.abi_encode())
            }
            "transfer(address,uint256)" => {
                let (to, amount) = args!(args, (Address, U256));
                self.move_balance(env.sender, to, amount)?;
                Ok(true.abi_encode())
            }
            "transferFrom(address,address,uint256)" => {
                let (from, to, amount) = args!(args, (Address, Address, U256));
                let allowance = self
                    .allowances
                    .get(&(from, env.sender))
                    .copied()
                    .unwrap_or_default();
                if allowance < amount {
                    return Err(revert("ERC20: insufficient allowance"));
                }
                if allowance != U256::MAX {
                    self.allowances
                        .insert((from, env.sender), allowance - amount);
                }
                self.move_balance(from, to, amount)?;
                Ok(true.abi_encode())
            }
            "mint(address,uint256)" => {
                let (to, amount) = args!(args, (Address, U256));
                *self.balances.entry(to).or_default() += amount;
                self.total_supply.current += amount;
                Ok(vec![])
            }
            "burnFrom(address,uint256)" => {
                let (owner, amount) = args!(args, (Address, U256));
                let balance = self.balance(owner);
                if balance < amount {
                    return Err(revert("ERC20: burn amount exceeds balance"));
                }
                self.balances
                    .insert(owner, balance - amount);
                self.total_supply.current -= amount;
                Ok(vec![])
            }
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

#[derive(Debug, Clone, PartialEq)]
pub enum BacktesterKind {
    /// Reports whatever was last stored with `setValue`.
    Plain,
    /// Reports its LP token balance in `pool`.
    CurveLp { pool: Address },
}

#[derive(Debug, Clone)]
pub struct FakeBacktester {
    pub kind: BacktesterKind,
    pub ids: Vec<U256>,
    pub value: U256,
}

const BACKTESTER_ABI: &[&str] = &[
    "value()",
    "count()",
    "push(uint256)",
    "setValue(uint256)",
    "multicall(address[],bytes[],uint256[])",
    "execute(address,bytes,uint256)",
];

impl FakeBacktester {
    pub fn new(kind: BacktesterKind) -> Self {
        Self { kind, ids: Vec::new(), value: U256::ZERO }
    }
}

impl FakeContract for FakeBacktester {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        match lookup(BACKTESTER_ABI, sel)? {
            "value()" => match &self.kind {
                BacktesterKind::Plain => Ok(self.value.abi_encode()),
                BacktesterKind::CurveLp { pool } => {
                    let token = env.call(*pool, selector("token()").to_vec())?;
                    let (token,) = args!(&token, (Address,));
                    let mut data = selector("balanceOf(address)").to_vec();
                    data.extend(env.this.abi_encode());
                    env.call(token, data)
                }
            },
            "count()" => Ok(U256::from(self.ids.len()).abi_encode()),
            "push(uint256)" => {
                let (id,) = args!(args, (U256,));
                self.ids.push(id);
                Ok(vec![])
            }
            "setValue(uint256)" => {
                let (value,) = args!(args, (U256,));
                self.value = value;
                Ok(vec![])
            }
            "multicall(address[],bytes[],uint256[])" => {
                let (targets, datas, values) = args!(args, (Vec<Address>, Vec<Bytes>, Vec<U256>));
                if targets.len() != datas.len() || targets.len() != values.len() {
                    return Err(revert("length mismatch"));
                }
                for ((target, data), value) in targets
                    .iter()
                    .zip(datas.iter())
                    .zip(values.iter())
                {
                    env.call_with_value(*target, data.to_vec(), *value)?;
                }
                Ok(vec![])
            }
            "execute(address,bytes,uint256)" => {
                let (target, data, value) = args!(args, (Address, Bytes, U256));
                let output = env.call_with_value(target, data.to_vec(), value)?;
                Ok(Bytes::from(output).abi_encode())
            }
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurveState {
    pub balances: Vec<U256>,
    pub d: U256,
    pub a_gamma: [U256; 4],
    pub prices: Vec<U256>,
}

#[derive(Debug, Clone)]
pub struct FakeCurvePool {
    pub coins: Vec<Address>,
    pub token: Address,
    pub a: U256,
    pub state: Versioned<CurveState>,
}

const CURVE_POOL_ABI: &[&str] = &[
    "coins(uint256)",
    "token()",
    "A()",
    "balances(uint256)",
    "D()",
    "initial_A_gamma()",
    "future_A_gamma()",
    "initial_A_gamma_time()",
    "future_A_gamma_time()",
    "price_oracle(uint256)",
    "set_D(uint256)",
    "set_A_gamma(uint256[4])",
];

type CurveCtor = (
    Address,
    Address,
    U256,
    U256,
    U256,
    U256,
    U256,
    U256,
    U256,
    U256,
    U256,
    Vec<U256>,
    Vec<Address>,
    Address,
);

impl FakeCurvePool {
    pub fn reference(coins: Vec<Address>, token: Address, history: Vec<(u64, CurveState)>) -> Self {
        Self { coins, token, a: U256::ZERO, state: Versioned::with_history(history) }
    }

    fn from_ctor(args: &[u8]) -> Result<Self, ChainError> {
        let ctor = args!(args, CurveCtor);
        let n = ctor.12.len();
        Ok(Self {
            coins: ctor.12,
            token: ctor.13,
            a: ctor.2,
            state: Versioned::new(CurveState {
                balances: vec![U256::ZERO; n],
                prices: ctor.11,
                ..Default::default()
            }),
        })
    }

    fn n(&self) -> usize {
        self.coins.len()
    }

    fn index(&self, args: &[u8], bound: usize) -> Result<usize, ChainError> {
        let (i,) = args!(args, (U256,));
        usize::try_from(i)
            .ok()
            .filter(|i| *i < bound)
            .ok_or_else(|| revert("index out of range"))
    }
}

impl FakeContract for FakeCurvePool {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        let n = self.n();
        // Fixed size array signatures depend on the number of coins
        let sig = if sel == selector(&format!("set_balances(uint256[{}])", n)) {
            "set_balances"
        } else if sel == selector(&format!("set_packed_prices(uint256[{}])", n - 1)) {
            "set_packed_prices"
        } else if sel == selector(&format!("add_liquidity(uint256[{}],uint256)", n)) {
            "add_liquidity"
        } else {
            lookup(CURVE_POOL_ABI, sel)?
        };
        let state = self.state.at(env.block).clone();
        match sig {
            "coins(uint256)" => {
                let i = self.index(args, n)?;
                Ok(self.coins[i].abi_encode())
            }
            "token()" => Ok(self.token.abi_encode()),
            "A()" => Ok(self.a.abi_encode()),
            "balances(uint256)" => {
                let i = self.index(args, n)?;
                Ok(state.balances[i].abi_encode())
            }
            "D()" => Ok(state.d.abi_encode()),
            "initial_A_gamma()" => Ok(state.a_gamma[0].abi_encode()),
            "future_A_gamma()" => Ok(state.a_gamma[1].abi_encode()),
            "initial_A_gamma_time()" => Ok(state.a_gamma[2].abi_encode()),
            "future_A_gamma_time()" => Ok(state.a_gamma[3].abi_encode()),
            "price_oracle(uint256)" => {
                let k = self.index(args, n - 1)?;
                Ok(state.prices[k].abi_encode())
            }
            "set_balances" => {
                self.state.current.balances = words(args);
                Ok(vec![])
            }
            "set_D(uint256)" => {
                let (d,) = args!(args, (U256,));
                self.state.current.d = d;
                Ok(vec![])
            }
            "set_A_gamma(uint256[4])" => {
                let w = words(args);
                self.state.current.a_gamma = [w[0], w[1], w[2], w[3]];
                Ok(vec![])
            }
            "set_packed_prices" => {
                self.state.current.prices = words(args);
                Ok(vec![])
            }
            "add_liquidity" => {
                let w = words(args);
                let amounts = &w[..n];
                let mut minted = U256::ZERO;
                for (i, amount) in amounts.iter().enumerate() {
                    let mut data = selector("transferFrom(address,address,uint256)").to_vec();
                    data.extend((env.sender, env.this, *amount).abi_encode());
                    env.call(self.coins[i], data)?;
                    self.state.current.balances[i] += *amount;
                    minted += *amount;
                }
                let mut data = selector("mint(address,uint256)").to_vec();
                data.extend((env.sender, minted).abi_encode());
                env.call(self.token, data)?;
                Ok(minted.abi_encode())
            }
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Round {
    pub round_id: U256,
    pub answer: I256,
    pub started_at: U256,
    pub updated_at: U256,
    pub answered_in_round: U256,
}

impl Round {
    fn encode(&self) -> Vec<u8> {
        (self.round_id, self.answer, self.started_at, self.updated_at, self.answered_in_round)
            .abi_encode()
    }
}

#[derive(Debug, Clone)]
pub enum FeedKind {
    Chainlink { rounds: Versioned<Round> },
    /// A plain aggregator without `priceFeedType()`.
    Aggregator { rounds: Versioned<Round> },
    Composite { eth_usd: Address, target: Address, denominator: I256 },
    Other(u8),
    Mock { rounds: HashMap<U256, Round>, latest: U256 },
}

#[derive(Debug, Clone)]
pub struct FakeFeed {
    pub description: String,
    pub decimals: u8,
    pub version: U256,
    pub kind: FeedKind,
    pub calls: usize,
}

const FEED_ABI: &[&str] = &[
    "priceFeedType()",
    "latestRoundData()",
    "description()",
    "decimals()",
    "version()",
    "ethUsdPriceFeed()",
    "targetEthPriceFeed()",
    "answerDenominator()",
    "setRound((uint80,int256,uint256,uint256,uint80))",
    "setLatestRoundId(uint80)",
    "calls(bytes[])",
];

impl FakeFeed {
    pub fn new(description: &str, kind: FeedKind) -> Self {
        Self {
            description: description.to_string(),
            decimals: 8,
            version: U256::from(4),
            kind,
            calls: 0,
        }
    }

    pub fn mock(description: &str, decimals: u8, version: U256) -> Self {
        Self {
            description: description.to_string(),
            decimals,
            version,
            kind: FeedKind::Mock { rounds: HashMap::new(), latest: U256::ZERO },
            calls: 0,
        }
    }

    pub fn latest(&self) -> Option<Round> {
        match &self.kind {
            FeedKind::Mock { rounds, latest } => rounds.get(latest).copied(),
            FeedKind::Chainlink { rounds } | FeedKind::Aggregator { rounds } => {
                Some(rounds.current)
            }
            _ => None,
        }
    }
}

impl FakeContract for FakeFeed {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        match lookup(FEED_ABI, sel)? {
            "priceFeedType()" => match &self.kind {
                FeedKind::Chainlink { .. } => Ok(0u16.abi_encode()),
                FeedKind::Composite { .. } => Ok(8u16.abi_encode()),
                FeedKind::Other(feed_type) => Ok(u16::from(*feed_type).abi_encode()),
                _ => Err(revert("unknown selector")),
            },
            "latestRoundData()" => match &self.kind {
                FeedKind::Chainlink { rounds } | FeedKind::Aggregator { rounds } => {
                    Ok(rounds.at(env.block).encode())
                }
                FeedKind::Mock { rounds, latest } => rounds
                    .get(latest)
                    .map(Round::encode)
                    .ok_or_else(|| revert("No data present")),
                _ => Err(revert("not an aggregator")),
            },
            "description()" => Ok(self.description.clone().abi_encode()),
            "decimals()" => Ok(u16::from(self.decimals).abi_encode()),
            "version()" => Ok(self.version.abi_encode()),
            "ethUsdPriceFeed()" | "targetEthPriceFeed()" | "answerDenominator()" => {
                match &self.kind {
                    FeedKind::Composite { eth_usd, target, denominator } => {
                        Ok(match lookup(FEED_ABI, sel)? {
                            "ethUsdPriceFeed()" => eth_usd.abi_encode(),
                            "targetEthPriceFeed()" => target.abi_encode(),
                            _ => denominator.abi_encode(),
                        })
                    }
                    _ => Err(revert("not a composite feed")),
                }
            }
            "setRound((uint80,int256,uint256,uint256,uint80))" => {
                let (round_id, answer, started_at, updated_at, answered_in_round) =
                    args!(args, (U256, I256, U256, U256, U256));
                match &mut self.kind {
                    FeedKind::Mock { rounds, .. } => {
                        rounds.insert(
                            round_id,
                            Round { round_id, answer, started_at, updated_at, answered_in_round },
                        );
                        Ok(vec![])
                    }
                    _ => Err(revert("not a mock")),
                }
            }
            "setLatestRoundId(uint80)" => {
                let (round_id,) = args!(args, (U256,));
                match &mut self.kind {
                    FeedKind::Mock { latest, .. } => {
                        *latest = round_id;
                        Ok(vec![])
                    }
                    _ => Err(revert("not a mock")),
                }
            }
            "calls(bytes[])" => {
                self.calls += 1;
                let (datas,) = args!(args, (Vec<Bytes>,));
                for data in datas {
                    if data.len() < 4 {
                        return Err(revert("no fallback"));
                    }
                    self.handle(env, [data[0], data[1], data[2], data[3]], &data[4..])?;
                }
                Ok(vec![])
            }
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniswapState {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
    pub fee_growth_global: [U256; 2],
    pub fee_growth_outside: BTreeMap<i32, [U256; 2]>,
}

#[derive(Debug, Clone)]
pub struct FakeUniswapPool {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub initialized: bool,
    pub batches: usize,
    pub state: Versioned<UniswapState>,
}

const UNISWAP_POOL_ABI: &[&str] = &[
    "token0()",
    "token1()",
    "fee()",
    "slot0()",
    "liquidity()",
    "feeGrowthGlobal0X128()",
    "feeGrowthGlobal1X128()",
    "ticks(int24)",
    "initialize(uint160)",
    "setSqrtPriceX96(uint160)",
    "setLiquidity(uint128)",
    "setFeeGrowthGlobalX128(uint256,uint256)",
    "setFeeGrowthOutsideX128(int24,uint256,uint256)",
    "calls(bytes[])",
];

impl FakeUniswapPool {
    pub fn new(token0: Address, token1: Address, fee: u32, state: Versioned<UniswapState>) -> Self {
        Self { token0, token1, fee, initialized: false, batches: 0, state }
    }
}

impl FakeContract for FakeUniswapPool {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        let state = self.state.at(env.block).clone();
        match lookup(UNISWAP_POOL_ABI, sel)? {
            "token0()" => Ok(self.token0.abi_encode()),
            "token1()" => Ok(self.token1.abi_encode()),
            "fee()" => Ok(self.fee.abi_encode()),
            "slot0()" => Ok((state.sqrt_price_x96, state.tick, 0u16, 1u16, 1u16, 0u16, true).abi_encode()),
            "liquidity()" => Ok(state.liquidity.abi_encode()),
            "feeGrowthGlobal0X128()" => Ok(state.fee_growth_global[0].abi_encode()),
            "feeGrowthGlobal1X128()" => Ok(state.fee_growth_global[1].abi_encode()),
            "ticks(int24)" => {
                let (tick,) = args!(args, (i32,));
                let outside = state
                    .fee_growth_outside
                    .get(&tick)
                    .copied()
                    .unwrap_or_default();
                Ok((0u128, 0i128, outside[0], outside[1], 0i64, U256::ZERO, 0u32, true).abi_encode())
            }
            "initialize(uint160)" => {
                if self.initialized {
                    return Err(revert("AI"));
                }
                let (price,) = args!(args, (U256,));
                self.initialized = true;
                self.state.current.sqrt_price_x96 = price;
                Ok(vec![])
            }
            "setSqrtPriceX96(uint160)" => {
                let (price,) = args!(args, (U256,));
                self.state.current.sqrt_price_x96 = price;
                Ok(vec![])
            }
            "setLiquidity(uint128)" => {
                let (liquidity,) = args!(args, (u128,));
                self.state.current.liquidity = liquidity;
                Ok(vec![])
            }
            "setFeeGrowthGlobalX128(uint256,uint256)" => {
                let (fg0, fg1) = args!(args, (U256, U256));
                self.state.current.fee_growth_global = [fg0, fg1];
                Ok(vec![])
            }
            "setFeeGrowthOutsideX128(int24,uint256,uint256)" => {
                let (tick, fg0, fg1) = args!(args, (i32, U256, U256));
                self.state
                    .current
                    .fee_growth_outside
                    .insert(tick, [fg0, fg1]);
                Ok(vec![])
            }
            "calls(bytes[])" => {
                self.batches += 1;
                let (datas,) = args!(args, (Vec<Bytes>,));
                for data in datas {
                    if data.len() < 4 {
                        return Err(revert("no fallback"));
                    }
                    self.handle(env, [data[0], data[1], data[2], data[3]], &data[4..])?;
                }
                Ok(vec![])
            }
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

#[derive(Debug, Clone, Default)]
pub struct FakeUniswapFactory {
    pub pools: HashMap<(Address, Address, u32), Address>,
    pub nonce: u64,
}

const UNISWAP_FACTORY_ABI: &[&str] =
    &["createPool(address,address,uint24)", "getPool(address,address,uint24)"];

impl FakeContract for FakeUniswapFactory {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        let (a, b, fee) = args!(args, (Address, Address, u32));
        let (token0, token1) = if a < b { (a, b) } else { (b, a) };
        match lookup(UNISWAP_FACTORY_ABI, sel)? {
            "createPool(address,address,uint24)" => {
                if self.pools.contains_key(&(token0, token1, fee)) {
                    return Err(revert("pool exists"));
                }
                self.nonce += 1;
                let pool = env.this.create(self.nonce);
                env.chain.install(
                    pool,
                    Box::new(FakeUniswapPool::new(token0, token1, fee, Versioned::default())),
                );
                self.pools
                    .insert((token0, token1, fee), pool);
                Ok(pool.abi_encode())
            }
            "getPool(address,address,uint24)" => Ok(self
                .pools
                .get(&(token0, token1, fee))
                .copied()
                .unwrap_or_default()
                .abi_encode()),
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

/// Position minted through a position manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub owner: Address,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amounts: [U256; 2],
}

#[derive(Debug, Clone)]
pub struct FakePositionManager {
    pub factory: Address,
    pub weth: Address,
    pub positions: BTreeMap<U256, Position>,
    pub next_id: U256,
}

const POSITION_MANAGER_ABI: &[&str] = &[
    "mint((address,address,uint24,int24,int24,uint256,uint256,uint256,uint256,address,uint256))",
    "balanceOf(address)",
    "tokenOfOwnerByIndex(address,uint256)",
];

type MintParams = (Address, Address, u32, i32, i32, U256, U256, U256, U256, Address, U256);

impl FakePositionManager {
    pub fn new(factory: Address, weth: Address) -> Self {
        Self { factory, weth, positions: BTreeMap::new(), next_id: U256::from(1) }
    }

    fn owned(&self, owner: Address) -> Vec<U256> {
        self.positions
            .iter()
            .filter(|(_, p)| p.owner == owner)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl FakeContract for FakePositionManager {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        match lookup(POSITION_MANAGER_ABI, sel)? {
            "mint((address,address,uint24,int24,int24,uint256,uint256,uint256,uint256,address,uint256))" => {
                let (params,) = args!(args, (MintParams,));
                let (token0, token1, fee, tick_lower, tick_upper, amount0, amount1, _, _, recipient, deadline) =
                    params;
                if deadline < U256::from(env.chain.head()?.timestamp) {
                    return Err(revert("Transaction too old"));
                }
                let mut data = selector("getPool(address,address,uint24)").to_vec();
                data.extend((token0, token1, fee).abi_encode());
                let (pool,) = args!(&env.call(self.factory, data)?, (Address,));
                if pool.is_zero() {
                    return Err(revert("pool does not exist"));
                }
                for (token, amount) in [(token0, amount0), (token1, amount1)] {
                    let mut data = selector("transferFrom(address,address,uint256)").to_vec();
                    data.extend((env.sender, pool, amount).abi_encode());
                    env.call(token, data)?;
                }
                let id = self.next_id;
                self.next_id += U256::from(1);
                self.positions.insert(
                    id,
                    Position { owner: recipient, tick_lower, tick_upper, amounts: [amount0, amount1] },
                );
                Ok((id, 1u128, amount0, amount1).abi_encode())
            }
            "balanceOf(address)" => {
                let (owner,) = args!(args, (Address,));
                Ok(U256::from(self.owned(owner).len()).abi_encode())
            }
            "tokenOfOwnerByIndex(address,uint256)" => {
                let (owner, index) = args!(args, (Address, U256));
                usize::try_from(index)
                    .ok()
                    .and_then(|i| self.owned(owner).get(i).copied())
                    .map(|id| id.abi_encode())
                    .ok_or_else(|| revert("owner index out of bounds"))
            }
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

#[derive(Debug, Clone)]
pub struct FakePriceOracle {
    pub acl: Address,
    pub feeds: HashMap<Address, Address>,
}

const PRICE_ORACLE_ABI: &[&str] =
    &["_acl()", "priceFeeds(address)", "addPriceFeed(address,address)"];

impl FakeContract for FakePriceOracle {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        match lookup(PRICE_ORACLE_ABI, sel)? {
            "_acl()" => Ok(self.acl.abi_encode()),
            "priceFeeds(address)" => {
                let (token,) = args!(args, (Address,));
                self.feeds
                    .get(&token)
                    .map(|feed| feed.abi_encode())
                    .ok_or_else(|| revert("PriceFeedDoesntExistException"))
            }
            "addPriceFeed(address,address)" => {
                let owner = env.call(self.acl, selector("owner()").to_vec())?;
                let (owner,) = args!(&owner, (Address,));
                if env.sender != owner {
                    return Err(revert("CallerNotConfiguratorException"));
                }
                let (token, feed) = args!(args, (Address, Address));
                self.feeds.insert(token, feed);
                Ok(vec![])
            }
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

#[derive(Debug, Clone)]
pub struct FakeAcl {
    pub owner: Address,
}

impl FakeContract for FakeAcl {
    fn handle(&mut self, _env: &Env, sel: [u8; 4], _args: &[u8]) -> Result<Vec<u8>, ChainError> {
        match lookup(&["owner()"], sel)? {
            "owner()" => Ok(self.owner.abi_encode()),
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

#[derive(Debug, Clone)]
pub struct FakeCreditManager {
    pub facade: Address,
    pub price_oracle: Address,
    pub collateral_tokens: Vec<Address>,
    pub adapters: HashMap<Address, Address>,
}

const CREDIT_MANAGER_ABI: &[&str] = &[
    "creditFacade()",
    "priceOracle()",
    "collateralTokensCount()",
    "collateralTokens(uint256)",
    "adapterToContract(address)",
];

impl FakeContract for FakeCreditManager {
    fn handle(&mut self, _env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        match lookup(CREDIT_MANAGER_ABI, sel)? {
            "creditFacade()" => Ok(self.facade.abi_encode()),
            "priceOracle()" => Ok(self.price_oracle.abi_encode()),
            "collateralTokensCount()" => Ok(U256::from(self.collateral_tokens.len()).abi_encode()),
            "collateralTokens(uint256)" => {
                let (i,) = args!(args, (U256,));
                usize::try_from(i)
                    .ok()
                    .and_then(|i| self.collateral_tokens.get(i))
                    .map(|token| (*token, 9_000u16).abi_encode())
                    .ok_or_else(|| revert("TokenNotAllowedException"))
            }
            "adapterToContract(address)" => {
                let (adapter,) = args!(args, (Address,));
                Ok(self
                    .adapters
                    .get(&adapter)
                    .copied()
                    .unwrap_or_default()
                    .abi_encode())
            }
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

/// A credit account opened through the facade.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedAccount {
    pub borrowed: U256,
    pub on_behalf_of: Address,
    pub calls: Vec<(Address, Bytes)>,
    pub collateral: U256,
}

#[derive(Debug, Clone, Default)]
pub struct FakeCreditFacade {
    pub opened: Vec<OpenedAccount>,
}

impl FakeContract for FakeCreditFacade {
    fn handle(&mut self, env: &Env, sel: [u8; 4], args: &[u8]) -> Result<Vec<u8>, ChainError> {
        match lookup(&["openCreditAccountMulticall(uint256,address,(address,bytes)[],uint16)"], sel)? {
            "openCreditAccountMulticall(uint256,address,(address,bytes)[],uint16)" => {
                let (borrowed, on_behalf_of, calls, _referral) =
                    args!(args, (U256, Address, Vec<(Address, Bytes)>, u16));
                if env.value.is_zero() {
                    return Err(revert("ZeroCollateral"));
                }
                self.opened.push(OpenedAccount {
                    borrowed,
                    on_behalf_of,
                    calls,
                    collateral: env.value,
                });
                Ok(vec![])
            }
            _ => Err(revert("unknown selector")),
        }
    }

    fake_contract_boilerplate!();
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::contract::encode_input;

    #[test]
    fn test_versioned_reads() {
        let versioned = Versioned::with_history(vec![(10, 1u64), (20, 2u64)]);

        assert_eq!(*versioned.at(Some(15)), 1);
        assert_eq!(*versioned.at(Some(20)), 2);
        assert_eq!(*versioned.at(Some(5)), 2);
        assert_eq!(*versioned.at(None), 2);
    }

    #[test]
    fn test_calls_do_not_persist() {
        let chain = FakeChain::new();
        let token = Address::repeat_byte(1);
        chain.install(token, Box::new(FakeErc20::new("Token", "TKN", 18)));

        chain
            .call(
                &CallRequest {
                    from: Some(*OPERATOR),
                    to: token,
                    data: encode_input("mint(address,uint256)", (*OPERATOR, U256::from(5))).into(),
                    value: U256::ZERO,
                },
                BlockTag::Latest,
            )
            .unwrap();

        chain.inspect(token, |t: &FakeErc20| assert_eq!(t.balance(*OPERATOR), U256::ZERO));
    }

    #[test]
    fn test_send_requires_unlocked_account() {
        let chain = FakeChain::new();
        let stranger = Address::repeat_byte(0x99);

        let result = chain.send(&TxRequest { from: stranger, ..Default::default() });

        assert!(matches!(result, Err(ChainError::Rpc(_))));
    }
}
