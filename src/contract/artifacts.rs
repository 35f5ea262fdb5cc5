//! Compiled contract artifacts
//!
//! Mock and strategy contracts are deployed from compiled artifacts named `<Name>.json`. Both
//! common layouts are understood: `{"bytecode": "0x.."}` and `{"bytecode": {"object": "0x.."}}`.
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_primitives::Address;
use alloy_sol_types::SolValue;
use lazy_static::lazy_static;
use mini_moka::sync::Cache;
use serde_json::Value;
use tracing::info;

use super::encode_args;
use crate::{chain::ChainContext, errors::BacktestError};

lazy_static! {
    static ref BYTECODE_CACHE: Cache<Arc<String>, Vec<u8>> = Cache::new(1_000);
}

fn get_contract_bytecode(path: &Path) -> Result<Vec<u8>, BacktestError> {
    let key = Arc::new(path.display().to_string());
    if let Some(bytecode) = BYTECODE_CACHE.get(&key) {
        return Ok(bytecode);
    }

    let content = fs::read_to_string(path)
        .map_err(|e| BacktestError::Artifact(format!("{}: {}", path.display(), e)))?;
    let artifact: Value = serde_json::from_str(&content)
        .map_err(|e| BacktestError::Artifact(format!("{}: {}", path.display(), e)))?;
    let code = parse_bytecode(&artifact)
        .ok_or_else(|| BacktestError::Artifact(format!("{}: no bytecode", path.display())))?;

    BYTECODE_CACHE.insert(key, code.clone());
    Ok(code)
}

fn parse_bytecode(artifact: &Value) -> Option<Vec<u8>> {
    let bytecode = artifact.get("bytecode")?;
    let hex_code = match bytecode {
        Value::String(code) => code.as_str(),
        Value::Object(_) => bytecode.get("object")?.as_str()?,
        _ => return None,
    };
    let code = hex::decode(hex_code.trim_start_matches("0x")).ok()?;
    (!code.is_empty()).then_some(code)
}

#[derive(Debug, Clone)]
enum ArtifactSource {
    Dir(PathBuf),
    Memory(HashMap<String, Vec<u8>>),
}

/// Resolves contract names to creation bytecode and deploys them.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    source: ArtifactSource,
}

impl ArtifactStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self { source: ArtifactSource::Dir(dir.into()) }
    }

    pub fn in_memory(bytecodes: HashMap<String, Vec<u8>>) -> Self {
        Self { source: ArtifactSource::Memory(bytecodes) }
    }

    pub fn bytecode(&self, name: &str) -> Result<Vec<u8>, BacktestError> {
        match &self.source {
            ArtifactSource::Dir(dir) => get_contract_bytecode(&dir.join(format!("{}.json", name))),
            ArtifactSource::Memory(bytecodes) => bytecodes
                .get(name)
                .cloned()
                .ok_or_else(|| BacktestError::Artifact(format!("unknown contract {}", name))),
        }
    }

    /// Deploys contract `name` from `from` with ABI encoded constructor `args`.
    pub fn deploy<C: ChainContext, A: SolValue>(
        &self,
        chain: &C,
        from: Address,
        name: &str,
        args: A,
    ) -> Result<Address, BacktestError> {
        let mut init_code = self.bytecode(name)?;
        init_code.extend(encode_args(args));
        let address = chain.deploy(from, init_code.into())?;
        info!(contract = name, %address, "Deployed contract");
        Ok(address)
    }
}
