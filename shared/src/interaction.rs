//! Ledger-facing types and the client seam the engine talks through.
//!
//! Transport, signing keys and event decoding live behind [`LedgerClient`];
//! the engine only ever sees typed requests, receipts and events.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::{
    errors::LedgerResult,
    types::{Address, KeyValidated, Round, Solution},
};

/// Contract methods the engine submits.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ContractCall {
    PostKey(Solution),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub call: ContractCall,
    pub gas_price: U256,
    /// zero until estimated
    pub gas: U256,
}

impl TxRequest {
    pub fn new(from: Address, call: ContractCall) -> Self {
        Self {
            from,
            call,
            gas_price: U256::zero(),
            gas: U256::zero(),
        }
    }

    /// Upper bound of what the transaction can cost.
    pub fn max_cost(&self) -> U256 {
        self.gas.saturating_mul(self.gas_price)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTx {
    pub request: TxRequest,
    pub raw: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: String,
    pub gas_used: U256,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Account whose key signs submissions.
    fn signer(&self) -> Address;

    /// Current round snapshot (`getCurrentBlock` view call).
    async fn current_round(&self) -> LedgerResult<Round>;

    /// Timestamp of the latest ledger block, seconds since epoch.
    async fn latest_timestamp(&self) -> LedgerResult<u64>;

    async fn balance(&self, address: &Address) -> LedgerResult<U256>;

    async fn gas_price(&self) -> LedgerResult<U256>;

    async fn estimate_gas(&self, tx: &TxRequest) -> LedgerResult<U256>;

    /// Signs with the client's own key.
    async fn sign(&self, tx: &TxRequest) -> LedgerResult<SignedTx>;

    async fn broadcast(&self, tx: SignedTx) -> LedgerResult<Receipt>;

    async fn subscribe_key_validated(&self) -> LedgerResult<BoxStream<'static, KeyValidated>>;
}
