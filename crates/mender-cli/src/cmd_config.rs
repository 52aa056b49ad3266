use crate::workspace;
use clap::Subcommand;
use mender_conductor::config::write_atomic;
use mender_conductor::ConductorConfig;
use mender_ledger::lock::WorkspaceLock;
use std::path::Path;

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Set a config value
    Set {
        /// Config key (e.g. action_timeout_sec)
        key: String,
        /// Config value (true/false/number/JSON list/string)
        value: String,
    },
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },
    /// List all config values, defaults included
    List,
}

// ── Dispatch ──

pub fn run(cmd: ConfigCmd, repo_root: &Path) -> anyhow::Result<()> {
    match cmd {
        ConfigCmd::Set { key, value } => set(repo_root, &key, &value),
        ConfigCmd::Get { key } => get(repo_root, &key),
        ConfigCmd::List => list(repo_root),
    }
}

// ── Command Implementations ──

/// Effective config as a JSON map: file values over defaults.
fn effective(path: &Path) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let config = ConductorConfig::load(path)?;
    match serde_json::to_value(&config)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(serde_json::Map::new()),
    }
}

/// Parse a string value into an appropriate JSON value.
fn parse_value(s: &str) -> serde_json::Value {
    match s {
        "true" => serde_json::Value::Bool(true),
        "false" => serde_json::Value::Bool(false),
        "null" => serde_json::Value::Null,
        _ => {
            if let Ok(n) = s.parse::<u64>() {
                serde_json::Value::Number(n.into())
            } else if s.starts_with('[') {
                serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.to_string()))
            } else {
                serde_json::Value::String(s.to_string())
            }
        }
    }
}

/// Apply `key = value` and validate the result as a whole config.
fn apply(
    mut map: serde_json::Map<String, serde_json::Value>,
    key: &str,
    value: &str,
) -> anyhow::Result<ConductorConfig> {
    map.insert(key.to_string(), parse_value(value));
    let json = serde_json::Value::Object(map).to_string();
    let config = ConductorConfig::from_json(&json)
        .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}"))?;
    // Reject patterns that would fail at the next load.
    mender_core::risk::RiskClassifier::new(&config.risk_policy())?;
    Ok(config)
}

/// `mender config set <key> <value>`
pub fn set(repo_root: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let paths = workspace::paths(repo_root)?;
    let _lock = WorkspaceLock::acquire(&paths, &format!("config set {key}"))?;
    let config = apply(effective(&paths.config_json)?, key, value)?;
    let json = serde_json::to_string_pretty(&config)?;
    write_atomic(&paths.config_json, json.as_bytes())?;
    println!("{key} = {value}");
    Ok(())
}

/// `mender config get <key>`
pub fn get(repo_root: &Path, key: &str) -> anyhow::Result<()> {
    let paths = workspace::paths(repo_root)?;
    let config = effective(&paths.config_json)?;
    match config.get(key) {
        Some(val) => println!("{val}"),
        None => println!("(not set)"),
    }
    Ok(())
}

/// `mender config list`
pub fn list(repo_root: &Path) -> anyhow::Result<()> {
    let paths = workspace::paths(repo_root)?;
    for (k, v) in &effective(&paths.config_json)? {
        println!("{k} = {v}");
    }
    Ok(())
}
