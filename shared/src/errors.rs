use thiserror::Error;

#[derive(Error, Debug)]
pub enum AddressError {
    #[error("address must be 40 hex chars, got {0}")]
    Length(usize),
    #[error("address is not hex: {0}")]
    NotHex(String),
}

/// Failures surfaced by the ledger client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("connection reset")]
    ConnectionReset,
    #[error("request timed out")]
    Timeout,
    #[error("insufficient funds for gas")]
    InsufficientFunds,
    #[error("contract reverted: {}", .0.as_deref().unwrap_or("no reason"))]
    Reverted(Option<String>),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed ledger state: {0}")]
    Malformed(String),
}

impl LedgerError {
    /// Network hiccups that say nothing about the request itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::ConnectionReset | LedgerError::Timeout)
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid entry name: {0}")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
