use std::io;

use thiserror::Error;

use shared::{
    errors::{AddressError, LedgerError},
    types::Address,
};

/// Reasons a mining session ends early.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no funds on {0}, deposit some to start mining")]
    NoFunds(Address),
    #[error("out of gas on {0}, deposit some to continue")]
    OutOfGas(Address),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("config file {path}: {source}")]
    Json { path: String, source: serde_json::Error },
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("difficulty {0} too low, minimum is {1}")]
    DifficultyTooLow(u32, u32),
    #[error("difficulty {0} too high, maximum is {1}")]
    DifficultyTooHigh(u32, u32),
    #[error("salt contains {0:?}, only characters 32..=125 are allowed")]
    InvalidSalt(char),
    #[error("{requested} threads requested, only {available} available")]
    TooManyThreads { requested: usize, available: usize },
}
