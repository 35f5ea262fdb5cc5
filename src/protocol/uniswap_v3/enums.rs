use strum_macros::{Display, EnumString};

use crate::errors::BacktestError;

pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeAmount {
    Lowest = 100,
    Low = 500,
    Medium = 3000,
    High = 10_000,
}

impl FeeAmount {
    pub fn tick_spacing(&self) -> i32 {
        match self {
            FeeAmount::Lowest => 1,
            FeeAmount::Low => 10,
            FeeAmount::Medium => 60,
            FeeAmount::High => 200,
        }
    }

    /// The fee as the pool's `uint24`.
    pub fn as_u24(&self) -> u32 {
        *self as u32
    }
}

impl std::convert::TryFrom<u32> for FeeAmount {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(FeeAmount::Lowest),
            500 => Ok(FeeAmount::Low),
            3000 => Ok(FeeAmount::Medium),
            10_000 => Ok(FeeAmount::High),
            _ => Err(()),
        }
    }
}

/// The LP strategy contracts, which differ in the numéraire they report the position's value in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum UniswapV3Strategy {
    /// Value of the position's liquidity and fees.
    #[strum(serialize = "UniswapV3LPBacktest")]
    Base,
    /// Total value in units of token0.
    #[strum(serialize = "UniswapV3LPTotal0Backtest")]
    Total0,
    /// Total value in units of token1.
    #[strum(serialize = "UniswapV3LPTotal1Backtest")]
    Total1,
}

impl UniswapV3Strategy {
    pub fn artifact(&self) -> &'static str {
        match self {
            UniswapV3Strategy::Base => "UniswapV3LPBacktest",
            UniswapV3Strategy::Total0 => "UniswapV3LPTotal0Backtest",
            UniswapV3Strategy::Total1 => "UniswapV3LPTotal1Backtest",
        }
    }

    pub fn runner_name(&self) -> &'static str {
        match self {
            UniswapV3Strategy::Base => "UniswapV3LPBaseRunner",
            UniswapV3Strategy::Total0 => "UniswapV3LPTotal0Runner",
            UniswapV3Strategy::Total1 => "UniswapV3LPTotal1Runner",
        }
    }
}

/// Checks that `[lower, upper)` is a valid position range for pools of `fee`.
pub fn check_ticks(lower: i32, upper: i32, fee: FeeAmount) -> Result<(), BacktestError> {
    let spacing = fee.tick_spacing();
    if lower >= upper {
        return Err(BacktestError::InvalidConfig(format!(
            "tick_lower {} must be below tick_upper {}",
            lower, upper
        )));
    }
    if lower < MIN_TICK || upper > MAX_TICK {
        return Err(BacktestError::InvalidConfig(format!(
            "ticks [{}, {}] out of bounds [{}, {}]",
            lower, upper, MIN_TICK, MAX_TICK
        )));
    }
    if lower % spacing != 0 || upper % spacing != 0 {
        return Err(BacktestError::InvalidConfig(format!(
            "ticks [{}, {}] are not multiples of the tick spacing {}",
            lower, upper, spacing
        )));
    }
    Ok(())
}
