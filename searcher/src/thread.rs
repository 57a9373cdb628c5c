use std::{
    io,
    panic::{self, AssertUnwindSafe},
    thread::JoinHandle,
    time::Instant,
};

use core_affinity::CoreId;
use primitive_types::U256;
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::*;

use shared::types::{Address, Solution};

use crate::{
    hasher::{key_hash, key_matches, render_key, salted_key},
    hashrate::HashRateSample,
    slice::SearchSlice,
};

/// Hashes between two throughput samples and two termination checks.
pub const REPORT_EVERY: u64 = 2_000;

/// What every worker of one pool generation hashes against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchJob {
    pub difficulty: u32,
    pub random: U256,
    pub address: Address,
}

pub(crate) enum WorkerCommand {
    Assign(SearchSlice),
    #[cfg(test)]
    Panic,
}

#[derive(Debug)]
pub(crate) enum WorkerReport {
    Solution { slot: usize, solution: Solution },
    Throughput { slot: usize, sample: HashRateSample },
    Exhausted { slot: usize },
    Crashed { slot: usize },
}

enum ScanEnd {
    Exhausted,
    Terminated,
}

/// Spawns the worker for `slot`. It lives until its command sender is dropped,
/// its report receiver is gone, or it panics (reported as `Crashed`).
pub(crate) fn spawn_worker(
    slot: usize,
    core: Option<CoreId>,
    job: SearchJob,
    mut commands: UnboundedReceiver<WorkerCommand>,
    reports: UnboundedSender<WorkerReport>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new().name(format!("search-{slot}")).spawn(move || {
        // bound thread to core
        if let Some(core) = core {
            let _ = core_affinity::set_for_current(core);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(slot, &job, &mut commands, &reports)));
        if outcome.is_err() {
            let _ = reports.send(WorkerReport::Crashed { slot });
        }
    })
}

fn work(
    slot: usize,
    job: &SearchJob,
    commands: &mut UnboundedReceiver<WorkerCommand>,
    reports: &UnboundedSender<WorkerReport>,
) {
    loop {
        let slice = match commands.blocking_recv() {
            Some(WorkerCommand::Assign(slice)) => slice,
            #[cfg(test)]
            Some(WorkerCommand::Panic) => panic!("worker {slot} told to crash"),
            None => {
                trace!("worker {slot}: command channel closed");
                return;
            }
        };

        trace!("worker {slot}: slice {:#x}..={:#x} salt {:?}", slice.lo, slice.hi, slice.salt);

        match scan(slot, job, &slice, commands, reports) {
            ScanEnd::Exhausted => {
                if reports.send(WorkerReport::Exhausted { slot }).is_err() {
                    return;
                }
            }
            ScanEnd::Terminated => return,
        }
    }
}

/// Walks `slice` from `hi` down to `lo`.
fn scan(
    slot: usize,
    job: &SearchJob,
    slice: &SearchSlice,
    commands: &mut UnboundedReceiver<WorkerCommand>,
    reports: &UnboundedSender<WorkerReport>,
) -> ScanEnd {
    let mut hashes = 0u64;
    let mut nonce = slice.hi;

    if reports
        .send(WorkerReport::Throughput {
            slot,
            sample: HashRateSample { at: Instant::now(), count: 0 },
        })
        .is_err()
    {
        return ScanEnd::Terminated;
    }

    loop {
        let key = render_key(nonce, job.difficulty);
        let hash = key_hash(job.random, &job.address, &salted_key(&key, &slice.salt));
        if key_matches(&key, &hash) {
            debug!("worker {slot}: key {key} matched");
            let solution = Solution {
                address: job.address,
                key,
                salt: slice.salt.clone(),
            };
            if reports.send(WorkerReport::Solution { slot, solution }).is_err() {
                return ScanEnd::Terminated;
            }
        }

        hashes += 1;
        if hashes % REPORT_EVERY == 0 {
            let sample = HashRateSample { at: Instant::now(), count: REPORT_EVERY };
            if reports.send(WorkerReport::Throughput { slot, sample }).is_err() {
                return ScanEnd::Terminated;
            }
            match commands.try_recv() {
                Err(TryRecvError::Disconnected) => return ScanEnd::Terminated,
                Err(TryRecvError::Empty) => {}
                #[cfg(test)]
                Ok(WorkerCommand::Panic) => panic!("worker {slot} told to crash"),
                Ok(WorkerCommand::Assign(_)) => {
                    warn!("worker {slot}: assignment while busy, ignored");
                }
            }
        }

        if nonce <= slice.lo {
            return ScanEnd::Exhausted;
        }
        nonce -= U256::one();
    }
}
