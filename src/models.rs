use std::path::{Path, PathBuf};

use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::BacktestError;

/// How a runner drives the strategy through history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RunMethod {
    /// Transplants reference state into mocks at every step.
    Backtest,
    /// Re-executes every historical transaction on a fork.
    Replay,
    /// Runs against simulated paths.
    Forwardtest,
}

/// The runners that can be launched by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum RunnerKind {
    CurveV2LPRunner,
    UniswapV3LPBaseRunner,
    UniswapV3LPTotal0Runner,
    UniswapV3LPTotal1Runner,
    GearboxV2STETHRunner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum RunnerStatus {
    #[default]
    Uninitialized,
    Setup,
    Running,
    Complete,
    Failed,
}

/// Iteration bounds of a run. `stop == None` means the chain head at invocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: u64,
    pub stop: Option<u64>,
    pub step: u64,
}

impl BlockRange {
    pub fn new(start: u64, stop: Option<u64>, step: u64) -> Self {
        Self { start, stop, step }
    }

    /// Replays every block, so the step is fixed at 1.
    pub fn replay(start: u64, stop: Option<u64>) -> Self {
        Self { start, stop, step: 1 }
    }

    pub fn resolve(&self, head: u64) -> Result<ResolvedRange, BacktestError> {
        let stop = self.stop.unwrap_or(head);
        if self.step == 0 || self.start > stop {
            return Err(BacktestError::InvalidRange { start: self.start, stop, step: self.step });
        }
        Ok(ResolvedRange { start: self.start, stop, step: self.step })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub stop: u64,
    pub step: u64,
}

impl ResolvedRange {
    /// Blocks processed after the state at `start` was set: `start + 1` up to, excluding, `stop`.
    pub fn blocks(&self) -> impl Iterator<Item = u64> {
        // step is never zero once resolved
        (self.start + 1..self.stop).step_by(self.step.max(1) as usize)
    }
}

/// Output file of a run: `<results_dir>/<Runner>_<method>_<start>_<stop>_<step>.csv`, with a stop
/// of `-1` standing for the chain head.
pub fn output_path(
    results_dir: &Path,
    runner: &str,
    method: RunMethod,
    start: u64,
    stop: Option<u64>,
    step: u64,
) -> PathBuf {
    let stop = stop.map_or_else(|| "-1".to_string(), |s| s.to_string());
    results_dir.join(format!("{}_{}_{}_{}_{}.csv", runner, method, start, stop, step))
}
