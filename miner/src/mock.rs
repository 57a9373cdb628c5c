//! In-memory ledger for driving the engine in tests.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use futures_util::{
    stream::{self, BoxStream},
    StreamExt,
};
use primitive_types::U256;
use tokio::sync::broadcast::{self, error::RecvError};

use shared::{
    errors::{LedgerError, LedgerResult},
    interaction::{ContractCall, LedgerClient, Receipt, SignedTx, TxRequest},
    types::{Address, KeyValidated, Round, Solution},
};

pub fn round(id: u64, difficulty: u32) -> Round {
    Round {
        id: U256::from(id),
        difficulty,
        winner_count: 0,
        deadline: 0,
        random: U256::from(0x5eed_u64),
    }
}

struct State {
    rounds: VecDeque<LedgerResult<Round>>,
    round_fetches: usize,
    timestamp: u64,
    balance: U256,
    gas_price: U256,
    gas_estimate: U256,
    gas_used: U256,
    outcomes: VecDeque<LedgerResult<Receipt>>,
    broadcasts: Vec<Solution>,
}

pub struct MockLedger {
    signer: Address,
    state: Mutex<State>,
    validated: broadcast::Sender<KeyValidated>,
}

impl Default for MockLedger {
    fn default() -> Self {
        let (validated, _) = broadcast::channel(64);
        Self {
            signer: Address([0xaa; 20]),
            state: Mutex::new(State {
                rounds: VecDeque::new(),
                round_fetches: 0,
                timestamp: 1_700_000_000,
                balance: U256::exp10(18),
                gas_price: U256::from(100),
                gas_estimate: U256::from(100_000),
                gas_used: U256::from(90_000),
                outcomes: VecDeque::new(),
                broadcasts: vec![],
            }),
            validated,
        }
    }
}

impl MockLedger {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a fetch result; the last queued one keeps being returned.
    pub fn push_round(&self, round: LedgerResult<Round>) {
        self.state().rounds.push_back(round);
    }

    pub fn set_round(&self, round: LedgerResult<Round>) {
        let mut state = self.state();
        state.rounds.clear();
        state.rounds.push_back(round);
    }

    pub fn round_fetches(&self) -> usize {
        self.state().round_fetches
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.state().timestamp = timestamp;
    }

    pub fn set_balance(&self, balance: U256) {
        self.state().balance = balance;
    }

    /// Queues a broadcast outcome; without one broadcasts succeed.
    pub fn push_outcome(&self, outcome: LedgerResult<Receipt>) {
        self.state().outcomes.push_back(outcome);
    }

    /// Solutions in the order they were broadcast.
    pub fn broadcasts(&self) -> Vec<Solution> {
        self.state().broadcasts.clone()
    }

    pub fn validate(&self, event: KeyValidated) {
        let _ = self.validated.send(event);
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn signer(&self) -> Address {
        self.signer
    }

    async fn current_round(&self) -> LedgerResult<Round> {
        let mut state = self.state();
        state.round_fetches += 1;
        let next = if state.rounds.len() > 1 {
            state.rounds.pop_front()
        } else {
            state.rounds.front().cloned()
        };
        next.unwrap_or_else(|| Err(LedgerError::Transport("no round scripted".into())))
    }

    async fn latest_timestamp(&self) -> LedgerResult<u64> {
        Ok(self.state().timestamp)
    }

    async fn balance(&self, _address: &Address) -> LedgerResult<U256> {
        Ok(self.state().balance)
    }

    async fn gas_price(&self) -> LedgerResult<U256> {
        Ok(self.state().gas_price)
    }

    async fn estimate_gas(&self, _tx: &TxRequest) -> LedgerResult<U256> {
        Ok(self.state().gas_estimate)
    }

    async fn sign(&self, tx: &TxRequest) -> LedgerResult<SignedTx> {
        Ok(SignedTx {
            request: tx.clone(),
            raw: vec![0x02],
        })
    }

    async fn broadcast(&self, tx: SignedTx) -> LedgerResult<Receipt> {
        let mut state = self.state();
        let ContractCall::PostKey(solution) = tx.request.call;
        state.broadcasts.push(solution);
        let receipt = Receipt {
            tx_hash: format!("0x{:064x}", state.broadcasts.len()),
            gas_used: state.gas_used,
        };
        state.outcomes.pop_front().unwrap_or(Ok(receipt))
    }

    async fn subscribe_key_validated(&self) -> LedgerResult<BoxStream<'static, KeyValidated>> {
        let rx = self.validated.subscribe();
        let events = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }
}
