use std::{sync::Arc, time::Duration};

use primitive_types::U256;
use tokio::{
    sync::{
        broadcast,
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    },
    time::interval,
};
use tracing::*;

use searcher::SeedStore;
use shared::{
    interaction::LedgerClient,
    store::KvStore,
    types::{Round, Solution},
    utils::{retry, SyncedClock, RETRY_DELAY, RETRY_TIMES},
};

use crate::{
    block_source::{BlockSource, SourceEvent},
    controller::{ControllerEvent, MinerController, MinerSettings},
    errors::EngineError,
    round_clock::{ClockEvent, RoundClock},
    sink::Sink,
    submitter::{SubmissionQueue, SubmitEvent},
};

const HASH_RATE_EVERY: Duration = Duration::from_secs(10);

/// What the engine reports to whoever runs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Run(U256),
    Stop(U256),
    LoadNextRound(U256),
    MiningStarted(u32),
    SolutionFound(Solution),
    SolutionConfirmed(Solution),
    OutOfGas,
    RoundTooEasy(Solution),
    Duplicate(Solution),
    BadKey(Solution),
    Fatal(String),
}

/// Component output, tagged with the mining session it came from.
#[derive(Debug)]
enum Signal {
    Source(SourceEvent),
    Clock(ClockEvent),
    Miner(u64, ControllerEvent),
    Submit(u64, SubmitEvent),
}

enum Wake {
    Shutdown,
    Signal(Signal),
    Report,
    Busy,
}

/// Wires the round source, clock, search and submissions together on one
/// task.
pub struct Engine {
    ledger: Arc<dyn LedgerClient>,
    settings: MinerSettings,
    seeds: SeedStore,
    events: UnboundedSender<EngineEvent>,
    signal_tx: UnboundedSender<Signal>,
    signal_rx: UnboundedReceiver<Signal>,
    source: BlockSource,
    clock: RoundClock,
    controller: Option<MinerController>,
    queue: Option<SubmissionQueue>,
    balance: U256,
    session: u64,
}

impl Engine {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        settings: MinerSettings,
        store: Arc<dyn KvStore>,
        events: UnboundedSender<EngineEvent>,
    ) -> Self {
        let (signal_tx, signal_rx) = unbounded_channel();
        let source = BlockSource::new(ledger.clone(), Sink::forward(signal_tx.clone(), Signal::Source));
        let clock = RoundClock::new(SyncedClock::new(), Sink::forward(signal_tx.clone(), Signal::Clock));
        Self {
            ledger,
            settings,
            seeds: SeedStore::new(store),
            events,
            signal_tx,
            signal_rx,
            source,
            clock,
            controller: None,
            queue: None,
            balance: U256::zero(),
            session: 0,
        }
    }

    /// Runs until shutdown or a fatal error.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), EngineError> {
        self.startup().await?;

        let mut report = interval(HASH_RATE_EVERY);
        loop {
            let wake = {
                let Self {
                    signal_rx,
                    source,
                    clock,
                    controller,
                    queue,
                    ..
                } = &mut self;
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => Wake::Shutdown,
                    Some(signal) = signal_rx.recv() => Wake::Signal(signal),
                    _ = source.tick() => Wake::Busy,
                    _ = clock.tick() => Wake::Busy,
                    _ = tick_controller(controller) => Wake::Busy,
                    _ = tick_queue(queue) => Wake::Busy,
                    _ = report.tick() => Wake::Report,
                }
            };

            match wake {
                Wake::Shutdown => {
                    info!("shutting down");
                    self.stop_mining();
                    return Ok(());
                }
                Wake::Signal(signal) => {
                    if let Err(err) = self.route(signal).await {
                        self.stop_mining();
                        return Err(err);
                    }
                }
                Wake::Report => self.report_hash_rate(),
                Wake::Busy => {}
            }
        }
    }

    async fn startup(&mut self) -> Result<(), EngineError> {
        let signer = self.ledger.signer();
        let ledger = self.ledger.clone();
        let balance = retry(|| ledger.balance(&signer), RETRY_TIMES, RETRY_DELAY).await?;
        if balance.is_zero() {
            error!("no funds on {signer}");
            return Err(EngineError::NoFunds(signer));
        }
        info!("signer {signer}, balance {balance}");
        self.balance = balance;

        let chain_time = retry(|| ledger.latest_timestamp(), RETRY_TIMES, RETRY_DELAY).await?;
        self.clock.sync(chain_time as i64);

        self.source.request_refresh(U256::zero());
        Ok(())
    }

    async fn route(&mut self, signal: Signal) -> Result<(), EngineError> {
        match signal {
            Signal::Source(SourceEvent::NewRound(round)) => {
                info!("round {}: difficulty {}, deadline {}", round.id, round.difficulty, round.deadline);
                self.clock.set_round(round);
            }
            Signal::Source(SourceEvent::RoundUpdated(round)) => {
                self.clock.update_round(round.clone());
                if let Some(controller) = self.controller.as_mut() {
                    controller.update_round(round);
                }
            }
            Signal::Source(SourceEvent::Error(err)) => {
                self.emit(EngineEvent::Fatal(err.to_string()));
                return Err(err.into());
            }

            Signal::Clock(ClockEvent::Run(round)) => {
                let id = round.id;
                self.start_mining(round).await;
                self.emit(EngineEvent::Run(id));
            }
            Signal::Clock(ClockEvent::Stop(id)) => {
                self.stop_mining();
                self.emit(EngineEvent::Stop(id));
            }
            Signal::Clock(ClockEvent::LoadNextRound(id)) => {
                self.source.request_refresh(id);
                self.emit(EngineEvent::LoadNextRound(id));
            }

            Signal::Miner(session, _) | Signal::Submit(session, _) if session != self.session => {
                trace!("signal from ended session {session}");
            }

            Signal::Miner(_, ControllerEvent::MiningStarted(difficulty)) => {
                self.emit(EngineEvent::MiningStarted(difficulty));
            }
            Signal::Miner(_, ControllerEvent::SolutionFound(solution)) => {
                self.emit(EngineEvent::SolutionFound(solution.clone()));
                if let Some(queue) = self.queue.as_mut() {
                    queue.post(solution);
                }
            }
            Signal::Miner(_, ControllerEvent::ReloadRound) => self.source.request_refresh(U256::zero()),

            Signal::Submit(_, SubmitEvent::Confirmed(solution)) => {
                if let Some(controller) = self.controller.as_mut() {
                    controller.on_key_confirmed(&solution);
                }
                self.emit(EngineEvent::SolutionConfirmed(solution));
            }
            Signal::Submit(_, SubmitEvent::RoundTooEasy(solution)) => {
                self.emit(EngineEvent::RoundTooEasy(solution));
                self.source.request_refresh(U256::zero());
            }
            Signal::Submit(_, SubmitEvent::Duplicate(solution)) => self.emit(EngineEvent::Duplicate(solution)),
            Signal::Submit(_, SubmitEvent::BadKey(solution)) => self.emit(EngineEvent::BadKey(solution)),
            Signal::Submit(_, SubmitEvent::Dropped(solution)) => {
                debug!("key {} dropped on the way", solution.key);
            }
            Signal::Submit(_, SubmitEvent::OutOfGas) => {
                self.emit(EngineEvent::OutOfGas);
                return Err(EngineError::OutOfGas(self.ledger.signer()));
            }
            Signal::Submit(_, SubmitEvent::Fatal(err)) => {
                self.emit(EngineEvent::Fatal(err.to_string()));
                return Err(err.into());
            }
        }
        Ok(())
    }

    async fn start_mining(&mut self, round: Round) {
        self.stop_mining();
        self.session += 1;
        let session = self.session;

        let validated = match self.ledger.subscribe_key_validated().await {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!("no key validation feed: {err}");
                None
            }
        };

        let miner_sink = Sink::forward(self.signal_tx.clone(), move |e| Signal::Miner(session, e));
        self.controller = Some(MinerController::start(
            round,
            self.settings.clone(),
            self.seeds.clone(),
            validated,
            miner_sink,
        ));

        let submit_sink = Sink::forward(self.signal_tx.clone(), move |e| Signal::Submit(session, e));
        self.queue = Some(SubmissionQueue::new(self.ledger.clone(), self.balance, submit_sink));
    }

    fn stop_mining(&mut self) {
        if let Some(mut queue) = self.queue.take() {
            self.balance = queue.balance();
            queue.dispose();
        }
        if self.controller.take().is_some() {
            debug!("search stopped");
        }
    }

    fn report_hash_rate(&mut self) {
        let Some(controller) = self.controller.as_mut() else {
            return;
        };
        match controller.hash_rate() {
            Some(rate) => info!("hash rate {rate} H/s at difficulty {}", controller.difficulty()),
            None => debug!("hash rate: warming up"),
        }
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

async fn tick_controller(controller: &mut Option<MinerController>) {
    match controller {
        Some(controller) => controller.tick().await,
        None => std::future::pending().await,
    }
}

async fn tick_queue(queue: &mut Option<SubmissionQueue>) {
    match queue {
        Some(queue) => queue.tick().await,
        None => std::future::pending().await,
    }
}
