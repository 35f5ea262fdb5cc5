use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_primitives::Address;
use anyhow::{bail, Context};
use clap::Parser;
use ethers::providers::Http;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use backtest_sim::{
    account::ExecutionAccount,
    chain::{rpc::RpcChain, ChainContext},
    config::RunnerConfig,
    contract::artifacts::ArtifactStore,
    models::{output_path, BlockRange, RunMethod, RunnerKind},
    protocol::{
        curve_v2::{CurveV2LpAdapter, CurveV2LpParams},
        gearbox_v2::{GearboxV2StethAdapter, GearboxV2StethParams},
        uniswap_v3::{UniswapV3LpAdapter, UniswapV3LpParams, UniswapV3Strategy},
    },
    recorder::CsvRecorder,
    roles::RoleAddresses,
    runner::{ExecutionContext, ProtocolAdapter, Runner},
};

type Chain = RpcChain<Http>;

/// Backtests or replays a strategy contract against historical on-chain state
#[derive(Parser, Debug)]
#[command(name = "backtester")]
struct Cli {
    /// Runner to launch
    #[arg(long)]
    runner: RunnerKind,

    #[arg(long, default_value_t = RunMethod::Backtest)]
    method: RunMethod,

    /// Block the run starts from
    #[arg(long)]
    start: u64,

    /// Block the run stops at, -1 for the chain head
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    stop: i64,

    /// Blocks between two steps of a backtest
    #[arg(long, default_value_t = 1)]
    step: u64,

    /// JSON file with `ref_addrs`, an optional `acc_addr` and the runner parameters
    #[arg(long)]
    params: PathBuf,

    /// JSON config file. Read from the environment if not given
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ParamsFile<P> {
    ref_addrs: RoleAddresses,
    #[serde(default)]
    acc_addr: Option<Address>,
    #[serde(flatten)]
    params: P,
}

fn read_params<P: DeserializeOwned>(path: &Path) -> anyhow::Result<ParamsFile<P>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

/// `-1` stands for the chain head.
fn parse_stop(stop: i64) -> anyhow::Result<Option<u64>> {
    match stop {
        -1 => Ok(None),
        stop => match u64::try_from(stop) {
            Ok(stop) => Ok(Some(stop)),
            Err(_) => bail!("--stop must be a block number or -1 for the chain head, got {}", stop),
        },
    }
}

fn run<A: ProtocolAdapter<Chain>>(
    cli: &Cli,
    config: &RunnerConfig,
    ctx: ExecutionContext<Chain>,
    adapter: A,
) -> anyhow::Result<()> {
    let stop = parse_stop(cli.stop)?;
    let mut runner = Runner::new(ctx, adapter)?;
    let path = output_path(
        &config.results_dir,
        runner.adapter().name(),
        cli.method,
        cli.start,
        stop,
        cli.step,
    );
    let mut recorder = CsvRecorder::new(&path);
    info!(runner = runner.adapter().name(), method = %cli.method, path = %path.display(), "Starting run");

    match cli.method {
        RunMethod::Backtest => {
            runner.backtest(&mut recorder, BlockRange::new(cli.start, stop, cli.step))?
        }
        RunMethod::Replay => {
            if cli.step != 1 {
                bail!("replay visits every block, got step {}", cli.step);
            }
            runner.replay(&mut recorder, cli.start, stop)?
        }
        RunMethod::Forwardtest => {
            runner.forwardtest(&[])?;
        }
    }
    info!(status = %runner.status(), path = %recorder.path().display(), "Run finished");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .compact();
    fmt()
        .event_format(format)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RunnerConfig::from_file(path)?,
        None => RunnerConfig::from_env()?,
    };

    let chain = Arc::new(Chain::connect(
        &config.fork_rpc_url,
        &config.upstream_rpc_url,
        config.poll_interval(),
    )?);
    match chain.fork_provider() {
        Some(provider) => info!(%provider, "Using fork provider"),
        None => bail!("{} is not a local fork (anvil or hardhat)", config.fork_rpc_url),
    }
    let artifacts = ArtifactStore::from_dir(&config.artifacts_dir);

    macro_rules! launch {
        ($params:ty, |$roles:ident, $p:ident| $adapter:expr) => {{
            let file: ParamsFile<$params> = read_params(&cli.params)?;
            let account = ExecutionAccount::resolve(
                chain.as_ref(),
                file.acc_addr.or(config.account),
                config.min_balance,
            )?;
            let ctx = ExecutionContext::new(Arc::clone(&chain), artifacts, account);
            let $roles = &file.ref_addrs;
            let $p = file.params;
            run(&cli, &config, ctx, $adapter)
        }};
    }

    match cli.runner {
        RunnerKind::CurveV2LPRunner => launch!(CurveV2LpParams, |roles, params| {
            CurveV2LpAdapter::new(Arc::clone(&chain), roles, params)?
        }),
        RunnerKind::UniswapV3LPBaseRunner => launch!(UniswapV3LpParams, |roles, params| {
            UniswapV3LpAdapter::new(Arc::clone(&chain), roles, UniswapV3Strategy::Base, params)?
        }),
        RunnerKind::UniswapV3LPTotal0Runner => launch!(UniswapV3LpParams, |roles, params| {
            UniswapV3LpAdapter::new(Arc::clone(&chain), roles, UniswapV3Strategy::Total0, params)?
        }),
        RunnerKind::UniswapV3LPTotal1Runner => launch!(UniswapV3LpParams, |roles, params| {
            UniswapV3LpAdapter::new(Arc::clone(&chain), roles, UniswapV3Strategy::Total1, params)?
        }),
        RunnerKind::GearboxV2STETHRunner => launch!(GearboxV2StethParams, |roles, params| {
            GearboxV2StethAdapter::new(Arc::clone(&chain), roles, params)?
        }),
    }
}
