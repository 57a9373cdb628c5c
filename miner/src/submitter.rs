use std::{sync::Arc, time::Duration};

use futures_util::{future::BoxFuture, FutureExt};
use primitive_types::U256;
use tokio::time::{sleep_until, Instant};
use tracing::*;

use shared::{
    errors::{LedgerError, LedgerResult},
    interaction::{ContractCall, LedgerClient, Receipt, TxRequest},
    types::{Address, Solution},
};

use crate::sink::Sink;

/// Premium over the quoted gas price and the estimated gas, in percent.
pub const GAS_PREMIUM: u64 = 5;
/// Pause after a confirmed submission before the next one.
pub const COOL_DOWN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitEvent {
    Confirmed(Solution),
    /// Not enough balance for gas; the queue has stopped.
    OutOfGas,
    RoundTooEasy(Solution),
    Duplicate(Solution),
    BadKey(Solution),
    /// Lost to a network hiccup, not retried.
    Dropped(Solution),
    /// Unexpected failure; the queue has stopped.
    Fatal(LedgerError),
}

/// What a failed submission means for the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    OutOfGas,
    RoundTooEasy,
    Duplicate,
    BadKey,
    Dropped,
    Fatal,
}

pub fn classify(err: &LedgerError) -> Failure {
    match err {
        LedgerError::InsufficientFunds => Failure::OutOfGas,
        LedgerError::Reverted(Some(reason)) => {
            if reason.contains("DIFFICULTY_LOW") {
                Failure::RoundTooEasy
            } else if reason.contains("DUPLICATE_ENTRY") {
                Failure::Duplicate
            } else if reason.contains("BAD_KEY") {
                Failure::BadKey
            } else {
                Failure::Fatal
            }
        }
        err if err.is_transient() => Failure::Dropped,
        _ => Failure::Fatal,
    }
}

pub fn with_premium(value: U256) -> U256 {
    value * (100 + GAS_PREMIUM) / 100
}

/// Last-in first-out store of solutions waiting for submission.
///
/// The newest solution is always submitted next; older ones wait and may
/// never be sent if discovery keeps outpacing submission.
#[derive(Debug, Default)]
pub struct SolutionStack {
    items: Vec<Solution>,
}

impl SolutionStack {
    pub fn push(&mut self, solution: Solution) {
        self.items.push(solution);
    }

    pub fn pop(&mut self) -> Option<Solution> {
        self.items.pop()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

struct Attempt {
    solution: Solution,
    /// balance read from the ledger during the attempt
    refreshed: Option<U256>,
    outcome: LedgerResult<(Receipt, U256)>,
}

enum Phase {
    Idle,
    InFlight(BoxFuture<'static, Attempt>),
    CoolingDown(Instant),
}

/// Turns solutions into ledger transactions, one at a time.
pub struct SubmissionQueue {
    ledger: Arc<dyn LedgerClient>,
    from: Address,
    balance: U256,
    stack: SolutionStack,
    phase: Phase,
    halted: bool,
    sink: Sink<SubmitEvent>,
}

impl SubmissionQueue {
    pub fn new(ledger: Arc<dyn LedgerClient>, balance: U256, sink: Sink<SubmitEvent>) -> Self {
        Self {
            from: ledger.signer(),
            ledger,
            balance,
            stack: SolutionStack::default(),
            phase: Phase::Idle,
            halted: false,
            sink,
        }
    }

    /// Last known balance of the signing account.
    pub fn balance(&self) -> U256 {
        self.balance
    }

    pub fn pending(&self) -> usize {
        self.stack.len()
    }

    pub fn in_flight(&self) -> bool {
        matches!(self.phase, Phase::InFlight(_))
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Queues a solution. Ignored once the queue is disposed or stopped.
    pub fn post(&mut self, solution: Solution) {
        if self.halted {
            return;
        }
        self.stack.push(solution);
    }

    /// Drops everything queued and turns every later call into a no-op.
    pub fn dispose(&mut self) {
        self.halted = true;
        self.stack.clear();
        self.phase = Phase::Idle;
    }

    /// Submits the next solution or waits out the cool-down. Pending forever
    /// when there is nothing to do. Cancel safe.
    pub async fn tick(&mut self) {
        loop {
            match &mut self.phase {
                Phase::CoolingDown(until) => {
                    sleep_until(*until).await;
                    self.phase = Phase::Idle;
                }
                Phase::Idle => {
                    let next = if self.halted { None } else { self.stack.pop() };
                    let Some(solution) = next else {
                        return std::future::pending().await;
                    };
                    debug!("submitting key {}, {} waiting", solution.key, self.stack.len());
                    let attempt = submit(self.ledger.clone(), self.from, self.balance, solution);
                    self.phase = Phase::InFlight(attempt.boxed());
                }
                Phase::InFlight(attempt) => {
                    let attempt = attempt.await;
                    self.phase = Phase::Idle;
                    self.settle(attempt);
                    return;
                }
            }
        }
    }

    fn settle(&mut self, attempt: Attempt) {
        let Attempt {
            solution,
            refreshed,
            outcome,
        } = attempt;
        if let Some(balance) = refreshed {
            debug!("balance refreshed: {balance}");
            self.balance = balance;
        }
        let err = match outcome {
            Ok((receipt, gas_price)) => {
                let cost = receipt.gas_used.saturating_mul(gas_price);
                self.balance = self.balance.saturating_sub(cost);
                info!("key {} confirmed in {}, balance {}", solution.key, receipt.tx_hash, self.balance);
                self.phase = Phase::CoolingDown(Instant::now() + COOL_DOWN);
                self.sink.emit(SubmitEvent::Confirmed(solution));
                return;
            }
            Err(err) => err,
        };

        match classify(&err) {
            Failure::OutOfGas => {
                error!("out of gas, balance {}", self.balance);
                self.halt();
                self.sink.emit(SubmitEvent::OutOfGas);
            }
            Failure::Fatal => {
                error!("submission of {} failed: {err}", solution.key);
                self.halt();
                self.sink.emit(SubmitEvent::Fatal(err));
            }
            Failure::Dropped => {
                debug!("key {} dropped: {err}", solution.key);
                self.sink.emit(SubmitEvent::Dropped(solution));
            }
            Failure::RoundTooEasy => {
                warn!("key {} below round difficulty", solution.key);
                self.sink.emit(SubmitEvent::RoundTooEasy(solution));
            }
            Failure::Duplicate => {
                warn!("key {} already posted", solution.key);
                self.sink.emit(SubmitEvent::Duplicate(solution));
            }
            Failure::BadKey => {
                warn!("key {} rejected", solution.key);
                self.sink.emit(SubmitEvent::BadKey(solution));
            }
        }
    }

    fn halt(&mut self) {
        self.halted = true;
        self.stack.clear();
    }
}

async fn submit(ledger: Arc<dyn LedgerClient>, from: Address, balance: U256, solution: Solution) -> Attempt {
    let mut refreshed = None;
    let outcome = post_key(ledger.as_ref(), from, balance, &mut refreshed, &solution).await;
    Attempt {
        solution,
        refreshed,
        outcome,
    }
}

async fn post_key(
    ledger: &dyn LedgerClient,
    from: Address,
    balance: U256,
    refreshed: &mut Option<U256>,
    solution: &Solution,
) -> LedgerResult<(Receipt, U256)> {
    let mut tx = TxRequest::new(from, ContractCall::PostKey(solution.clone()));
    tx.gas_price = with_premium(ledger.gas_price().await?);
    tx.gas = with_premium(ledger.estimate_gas(&tx).await?);
    trace!("gas {} at {}", tx.gas, tx.gas_price);
    if tx.max_cost() > balance {
        // deposits made since the last read only show on the ledger
        let current = ledger.balance(&from).await?;
        *refreshed = Some(current);
        if tx.max_cost() > current {
            return Err(LedgerError::InsufficientFunds);
        }
    }
    let signed = ledger.sign(&tx).await?;
    let receipt = ledger.broadcast(signed).await?;
    Ok((receipt, tx.gas_price))
}
