use std::collections::HashSet;

use futures_util::{stream::BoxStream, StreamExt};
use tracing::*;

use searcher::{PoolEvent, ProgressKey, SearchParams, SearchPool, SeedStore};
use shared::types::{Address, KeyValidated, Round, Solution};

use crate::{
    difficulty::{apply_validated_key, DifficultyPolicy},
    sink::Sink,
};

/// Operator choices that shape the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerSettings {
    /// account the keys are mined for
    pub address: Address,
    pub salt: String,
    pub threads: usize,
    /// minimum difficulty to search at
    pub difficulty: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    MiningStarted(u32),
    SolutionFound(Solution),
    /// The round still has no deadline after a validated key.
    ReloadRound,
}

/// Runs the search for one round and keeps its difficulty current.
pub struct MinerController {
    settings: MinerSettings,
    round: Round,
    policy: DifficultyPolicy,
    pool: SearchPool,
    seeds: SeedStore,
    validated: Option<BoxStream<'static, KeyValidated>>,
    /// winning keys already folded into the round, by account
    counted: HashSet<(Address, String)>,
    sink: Sink<ControllerEvent>,
}

impl MinerController {
    pub fn start(
        round: Round,
        settings: MinerSettings,
        seeds: SeedStore,
        validated: Option<BoxStream<'static, KeyValidated>>,
        sink: Sink<ControllerEvent>,
    ) -> Self {
        let mut policy = DifficultyPolicy::new(settings.difficulty);
        let difficulty = policy.recompute(&round);
        let resume = seeds.load(&ProgressKey {
            round_id: round.id,
            address: settings.address,
            difficulty,
            salt: settings.salt.clone(),
        });

        info!("mining round {} at difficulty {difficulty}, {} threads", round.id, settings.threads);
        let pool = SearchPool::start(SearchParams {
            address: settings.address,
            salt: settings.salt.clone(),
            threads: settings.threads,
            resume,
            difficulty,
            random: round.random,
        });

        Self {
            settings,
            round,
            policy,
            pool,
            seeds,
            validated,
            counted: HashSet::new(),
            sink,
        }
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn difficulty(&self) -> u32 {
        self.policy.effective()
    }

    pub fn pool(&self) -> &SearchPool {
        &self.pool
    }

    pub fn hash_rate(&mut self) -> Option<u64> {
        self.pool.hash_rate()
    }

    /// Takes a fresh snapshot of the same round.
    pub fn update_round(&mut self, round: Round) {
        if round.id != self.round.id {
            warn!("controller for round {} got round {}", self.round.id, round.id);
            return;
        }
        self.round = round;
        self.recompute();
    }

    /// Applies the difficulty policy to the current round state.
    pub fn recompute(&mut self) {
        let difficulty = self.policy.recompute(&self.round);
        self.pool.update_difficulty(difficulty);
    }

    pub fn on_key_validated(&mut self, event: KeyValidated) {
        if event.round_id != self.round.id {
            debug!("key validated for round {}, ignored", event.round_id);
            return;
        }
        if !self.counted.insert((event.address, event.key.clone())) {
            trace!("key {} already counted", event.key);
            return;
        }
        debug!("key {} validated for {}", event.key, event.address);
        apply_validated_key(&mut self.round, &event.key);
        self.recompute();
        if !self.round.has_deadline() {
            self.sink.emit(ControllerEvent::ReloadRound);
        }
    }

    /// Counts one of our own confirmed keys as a round winner. The ledger's
    /// validation event for the same key is not counted again.
    pub fn on_key_confirmed(&mut self, solution: &Solution) {
        if !self.counted.insert((solution.address, solution.key.clone())) {
            trace!("key {} already counted", solution.key);
            return;
        }
        apply_validated_key(&mut self.round, &solution.key);
        self.recompute();
    }

    /// Handles the next pool event or validated key. Cancel safe.
    pub async fn tick(&mut self) {
        let Self { pool, validated, .. } = &mut *self;
        let next = tokio::select! {
            biased;
            // the pool is almost always ready, so the feed goes first
            key = next_validated(validated) => Next::Validated(key),
            event = pool.next_event() => Next::Pool(event),
        };
        match next {
            Next::Pool(event) => self.on_pool_event(event),
            Next::Validated(Some(event)) => self.on_key_validated(event),
            Next::Validated(None) => {
                warn!("key validation feed ended");
                self.validated = None;
            }
        }
    }

    fn on_pool_event(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Started { difficulty } => self.sink.emit(ControllerEvent::MiningStarted(difficulty)),
            PoolEvent::SolutionFound(solution) => self.sink.emit(ControllerEvent::SolutionFound(solution)),
            PoolEvent::Throughput(_) => {}
            PoolEvent::Checkpoint { counter, difficulty } => {
                let key = ProgressKey {
                    round_id: self.round.id,
                    address: self.settings.address,
                    difficulty,
                    salt: self.settings.salt.clone(),
                };
                self.seeds.save(&key, counter);
            }
        }
    }
}

enum Next {
    Pool(PoolEvent),
    Validated(Option<KeyValidated>),
}

async fn next_validated(validated: &mut Option<BoxStream<'static, KeyValidated>>) -> Option<KeyValidated> {
    match validated {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
