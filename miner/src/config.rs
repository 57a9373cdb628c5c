use std::{fs::File, path::PathBuf};

use serde::{Deserialize, Serialize};

use shared::types::{Address, MAX_DIFFICULTY};

use crate::{controller::MinerSettings, errors::ConfigError};

/// Lowest difficulty the operator may ask for.
pub const MIN_DIFFICULTY: u32 = 8;

fn default_difficulty() -> u32 {
    MIN_DIFFICULTY
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".miner")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MinerConfig {
    /// mine for this account instead of the signer
    pub address: Option<Address>,
    #[serde(default)]
    pub salt: String,
    /// `None` is one thread, `Some(0)` every core
    pub threads: Option<usize>,
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            address: None,
            salt: String::new(),
            threads: None,
            difficulty: MIN_DIFFICULTY,
            store_dir: default_store_dir(),
        }
    }
}

pub fn load_config_file(config_file: &str) -> Result<MinerConfig, ConfigError> {
    let file = File::open(config_file).map_err(|source| ConfigError::Io {
        path: config_file.to_string(),
        source,
    })?;
    serde_json::from_reader(file).map_err(|source| ConfigError::Json {
        path: config_file.to_string(),
        source,
    })
}

impl MinerConfig {
    pub fn thread_count(&self, cpus: usize) -> usize {
        match self.threads {
            None => 1,
            Some(0) => cpus,
            Some(n) => n,
        }
    }

    pub fn validate(&self, cpus: usize) -> Result<(), ConfigError> {
        if self.difficulty < MIN_DIFFICULTY {
            return Err(ConfigError::DifficultyTooLow(self.difficulty, MIN_DIFFICULTY));
        }
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh(self.difficulty, MAX_DIFFICULTY));
        }
        if let Some(c) = self.salt.chars().find(|c| !(' '..='}').contains(c)) {
            return Err(ConfigError::InvalidSalt(c));
        }
        let requested = self.thread_count(cpus);
        if requested > cpus {
            return Err(ConfigError::TooManyThreads { requested, available: cpus });
        }
        Ok(())
    }

    /// Validated settings; keys are mined for `signer` unless an address is
    /// configured.
    pub fn settings(&self, signer: Address, cpus: usize) -> Result<MinerSettings, ConfigError> {
        self.validate(cpus)?;
        Ok(MinerSettings {
            address: self.address.unwrap_or(signer),
            salt: self.salt.clone(),
            threads: self.thread_count(cpus),
            difficulty: self.difficulty,
        })
    }
}
