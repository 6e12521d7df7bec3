//! Rules-table files and server settings.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::{AllowanceRules, RulesTable, uk_rules};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Error, Debug)]
pub enum RulesError {
    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid rules JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("rules table has no tax years")]
    Empty,
    #[error("latest tax year {0} has no rules entry")]
    MissingLatest(i32),
    #[error("tax year {year}: minimum allowance {minimum} exceeds standard allowance {standard}")]
    MinimumAboveStandard {
        year: i32,
        minimum: u64,
        standard: u64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RulesFile {
    latest: Option<i32>,
    years: BTreeMap<i32, AllowanceRules>,
}

/// Parses `{"latest": 2025, "years": {"2025": {...}}}`. Without `latest`
/// the greatest year is used.
pub fn parse_rules(json: &str) -> Result<RulesTable, RulesError> {
    let file: RulesFile = serde_json::from_str(json)?;
    let Some(greatest) = file.years.keys().next_back().copied() else {
        return Err(RulesError::Empty);
    };

    for (year, rules) in &file.years {
        if rules.minimum_allowance > rules.standard_allowance {
            return Err(RulesError::MinimumAboveStandard {
                year: *year,
                minimum: rules.minimum_allowance,
                standard: rules.standard_allowance,
            });
        }
    }

    let latest = file.latest.unwrap_or(greatest);
    RulesTable::new(file.years, latest).ok_or(RulesError::MissingLatest(latest))
}

pub fn load_rules(path: &Path) -> Result<RulesTable, RulesError> {
    let json = fs::read_to_string(path).map_err(|source| RulesError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let rules = parse_rules(&json)?;
    info!(
        path = %path.display(),
        years = rules.len(),
        latest = rules.latest_year(),
        "loaded allowance rules"
    );
    Ok(rules)
}

/// Rules from `path` when given, otherwise the built-in UK table.
pub fn rules_or_default(path: Option<&Path>) -> Result<RulesTable, RulesError> {
    match path {
        Some(path) => load_rules(path),
        None => {
            debug!("using built-in UK allowance rules");
            Ok(uk_rules().clone())
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub rules: RulesTable,
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr, rules_path: Option<&Path>) -> Result<Self, RulesError> {
        Ok(Self {
            bind_addr,
            rules: rules_or_default(rules_path)?,
        })
    }
}
