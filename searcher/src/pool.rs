use std::{collections::VecDeque, time::Instant};

use core_affinity::CoreId;
use primitive_types::U256;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::*;

use shared::types::{Address, Solution};

use crate::{
    hashrate::{HashRateMeter, HashRateSample},
    slice::SliceCursor,
    thread::{spawn_worker, SearchJob, WorkerCommand, WorkerReport},
};

/// Everything needed to start searching one round.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub address: Address,
    pub salt: String,
    pub threads: usize,
    /// slice counter to resume from
    pub resume: U256,
    pub difficulty: u32,
    pub random: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Started { difficulty: u32 },
    SolutionFound(Solution),
    Throughput(HashRateSample),
    /// A full pass of slices has been handed out; `counter` is where to resume.
    Checkpoint { counter: U256, difficulty: u32 },
}

/// Fixed set of search workers for one round.
///
/// Workers are plain OS threads that only talk to the pool through channels:
/// one command channel per slot and one report channel per generation. A new
/// generation starts on every difficulty raise, so reports from torn-down
/// workers never reach the current one.
pub struct SearchPool {
    address: Address,
    salt: String,
    threads: usize,
    random: U256,
    cursor: SliceCursor,
    cores: Vec<CoreId>,
    slots: Vec<Option<UnboundedSender<WorkerCommand>>>,
    report_tx: UnboundedSender<WorkerReport>,
    report_rx: UnboundedReceiver<WorkerReport>,
    pending: VecDeque<PoolEvent>,
    meter: HashRateMeter,
    generation: u64,
    restarts: u64,
}

impl SearchPool {
    pub fn start(params: SearchParams) -> Self {
        let SearchParams {
            address,
            salt,
            threads,
            resume,
            difficulty,
            random,
        } = params;

        let (report_tx, report_rx) = unbounded_channel();
        let mut pool = Self {
            cursor: SliceCursor::new(difficulty, threads, &salt, resume),
            address,
            salt,
            threads,
            random,
            cores: core_affinity::get_core_ids().unwrap_or_default(),
            slots: vec![],
            report_tx,
            report_rx,
            pending: VecDeque::new(),
            meter: HashRateMeter::default(),
            generation: 0,
            restarts: 0,
        };
        pool.fire_up();
        pool
    }

    pub fn difficulty(&self) -> u32 {
        self.cursor.difficulty()
    }

    /// Next slice counter to be handed out.
    pub fn counter(&self) -> U256 {
        self.cursor.counter()
    }

    /// Bumped every time the whole worker set is (re)started.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Crashed workers replaced so far.
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    pub fn active_workers(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Hashes per second over the trailing minute.
    pub fn hash_rate(&mut self) -> Option<u64> {
        self.meter.rate(Instant::now())
    }

    /// Restarts the search at `difficulty` from counter zero. Returns `false`
    /// and changes nothing unless `difficulty` is strictly higher.
    pub fn update_difficulty(&mut self, difficulty: u32) -> bool {
        if difficulty <= self.cursor.difficulty() {
            return false;
        }
        info!("search difficulty {} -> {difficulty}", self.cursor.difficulty());
        self.terminate();
        self.cursor = SliceCursor::new(difficulty, self.threads, &self.salt, U256::zero());
        self.fire_up();
        true
    }

    /// Stops all workers. Events still queued are discarded.
    pub fn terminate(&mut self) {
        // a closed command channel is the stop signal
        self.slots.clear();
        self.pending.clear();
        self.meter.clear();
        let (report_tx, report_rx) = unbounded_channel();
        self.report_tx = report_tx;
        self.report_rx = report_rx;
    }

    /// Waits for the next pool event. Cancel safe.
    pub async fn next_event(&mut self) -> PoolEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            // the pool holds a sender, so the channel never closes
            match self.report_rx.recv().await {
                Some(report) => self.handle_report(report),
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn fire_up(&mut self) {
        self.generation += 1;
        let slots = self.cursor.threads();
        debug!(
            "starting {slots} workers, difficulty {}, counter {}",
            self.cursor.difficulty(),
            self.cursor.counter()
        );
        self.pending.push_back(PoolEvent::Started { difficulty: self.cursor.difficulty() });
        self.slots = (0..slots).map(|_| None).collect();
        for slot in 0..slots {
            self.start_slot(slot);
        }
    }

    fn job(&self) -> SearchJob {
        SearchJob {
            difficulty: self.cursor.difficulty(),
            random: self.random,
            address: self.address,
        }
    }

    fn start_slot(&mut self, slot: usize) {
        let (tx, rx) = unbounded_channel();
        let core = match self.cores.len() {
            0 => None,
            n => Some(self.cores[slot % n]),
        };
        match spawn_worker(slot, core, self.job(), rx, self.report_tx.clone()) {
            Ok(_) => {
                self.slots[slot] = Some(tx);
                self.dispatch(slot);
            }
            Err(err) => {
                error!("worker {slot}: spawn failed: {err}");
                self.slots[slot] = None;
            }
        }
    }

    fn dispatch(&mut self, slot: usize) {
        let (slice, checkpoint) = self.cursor.next_slice();
        if let Some(counter) = checkpoint {
            self.pending.push_back(PoolEvent::Checkpoint {
                counter,
                difficulty: self.cursor.difficulty(),
            });
        }
        let Some(tx) = &self.slots[slot] else {
            return;
        };
        if tx.send(WorkerCommand::Assign(slice)).is_err() {
            debug!("worker {slot}: gone before assignment");
        }
    }

    fn handle_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::Solution { slot, solution } => {
                info!("worker {slot}: key found {}", solution.key);
                self.pending.push_back(PoolEvent::SolutionFound(solution));
            }
            WorkerReport::Throughput { sample, .. } => {
                self.meter.record(sample);
                self.pending.push_back(PoolEvent::Throughput(sample));
            }
            WorkerReport::Exhausted { slot } => {
                if slot < self.slots.len() {
                    self.dispatch(slot);
                }
            }
            WorkerReport::Crashed { slot } => {
                warn!("worker {slot} crashed, restarting");
                if slot < self.slots.len() {
                    self.restarts += 1;
                    self.start_slot(slot);
                }
            }
        }
    }

    #[cfg(test)]
    fn crash_worker(&self, slot: usize) {
        if let Some(Some(tx)) = self.slots.get(slot) {
            let _ = tx.send(WorkerCommand::Panic);
        }
    }
}

impl Drop for SearchPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::hasher::verify_key;

    fn params(difficulty: u32, threads: usize) -> SearchParams {
        SearchParams {
            address: Address([0x5a; 20]),
            salt: "t".into(),
            threads,
            resume: U256::zero(),
            difficulty,
            random: U256::from(987_654_321u64),
        }
    }

    async fn next_solution(pool: &mut SearchPool) -> Solution {
        timeout(Duration::from_secs(30), async {
            loop {
                if let PoolEvent::SolutionFound(solution) = pool.next_event().await {
                    return solution;
                }
            }
        })
        .await
        .expect("a solution within 30s")
    }

    #[tokio::test]
    async fn announces_start_then_finds_verifiable_keys() {
        let p = params(2, 2);
        let mut pool = SearchPool::start(p.clone());
        assert_eq!(pool.next_event().await, PoolEvent::Started { difficulty: 2 });

        let solution = next_solution(&mut pool).await;
        assert_eq!(solution.key.len(), 2);
        assert_eq!(solution.address, p.address);
        assert!(verify_key(p.random, &p.address, &solution.key, &solution.salt));
    }

    #[tokio::test]
    async fn checkpoints_once_per_full_pass() {
        let mut pool = SearchPool::start(params(2, 2));
        let checkpoint = timeout(Duration::from_secs(30), async {
            loop {
                if let PoolEvent::Checkpoint { counter, difficulty } = pool.next_event().await {
                    return (counter, difficulty);
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(checkpoint, (U256::from(2), 2));
    }

    #[tokio::test]
    async fn resumes_from_the_given_counter() {
        let mut p = params(2, 2);
        p.resume = U256::from(10);
        let pool = SearchPool::start(p);
        // both slots were dispatched on start
        assert_eq!(pool.counter(), U256::from(12));
    }

    #[tokio::test]
    async fn lower_or_equal_difficulty_is_ignored() {
        let mut p = params(2, 2);
        p.resume = U256::from(6);
        let mut pool = SearchPool::start(p);
        let counter = pool.counter();

        assert!(!pool.update_difficulty(2));
        assert!(!pool.update_difficulty(1));
        assert_eq!(pool.generation(), 1);
        assert_eq!(pool.difficulty(), 2);
        assert_eq!(pool.counter(), counter);
        assert_eq!(pool.active_workers(), 2);
    }

    #[tokio::test]
    async fn higher_difficulty_restarts_from_zero() {
        let mut p = params(1, 2);
        p.resume = U256::from(6);
        let mut pool = SearchPool::start(p.clone());
        let _ = next_solution(&mut pool).await;

        assert!(pool.update_difficulty(2));
        assert_eq!(pool.generation(), 2);
        assert_eq!(pool.difficulty(), 2);
        // counter restarted at zero, then one slice per slot
        assert_eq!(pool.counter(), U256::from(2));
        assert_eq!(pool.next_event().await, PoolEvent::Started { difficulty: 2 });

        let solution = next_solution(&mut pool).await;
        assert_eq!(solution.key.len(), 2);
        assert!(verify_key(p.random, &p.address, &solution.key, &solution.salt));
    }

    #[tokio::test]
    async fn crashed_worker_is_replaced() {
        let mut pool = SearchPool::start(params(2, 2));
        pool.crash_worker(1);

        timeout(Duration::from_secs(30), async {
            while pool.restarts() == 0 {
                pool.next_event().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(pool.active_workers(), 2);
        assert_eq!(pool.generation(), 1);

        // still searching after the restart
        let _ = next_solution(&mut pool).await;
    }
}
