use primitive_types::U256;
use tracing::*;

use shared::{
    types::{Round, MAX_DIFFICULTY},
    utils::key_length,
};

/// Rounds per epoch.
pub const EPOCH_SIZE: u64 = 2584;

/// `ceil(round_id / EPOCH_SIZE)`.
pub fn epoch_of(round_id: U256) -> U256 {
    let (q, r) = round_id.div_mod(U256::from(EPOCH_SIZE));
    if r.is_zero() {
        q
    } else {
        q + 1
    }
}

/// Winners a round of `epoch` admits before the next key must be longer.
/// Round id zero (epoch zero) counts as the first epoch.
pub fn max_winners(epoch: U256) -> u32 {
    if epoch > U256::from(11u8) {
        return 1;
    }
    match epoch.low_u64() {
        0 | 1 => 7,
        2 | 3 => 6,
        4 | 5 => 5,
        6 | 7 => 4,
        8 | 9 => 3,
        _ => 2,
    }
}

/// Shortest key the ledger still accepts for `round`.
pub fn min_difficulty(round: &Round) -> u32 {
    let full = round.winner_count >= max_winners(epoch_of(round.id));
    round.difficulty + u32::from(full)
}

/// Folds a validated key into the round: a longer key raises the difficulty
/// and restarts the winner count, any other adds a winner.
pub fn apply_validated_key(round: &mut Round, key: &str) {
    let len = key_length(key);
    if len > round.difficulty {
        debug!("round {} difficulty {} -> {len}", round.id, round.difficulty);
        round.difficulty = len;
        round.winner_count = 1;
    } else {
        round.winner_count += 1;
    }
}

/// Effective search difficulty, starting at the operator's request and only
/// ever going up.
#[derive(Debug, Clone, Copy)]
pub struct DifficultyPolicy {
    effective: u32,
}

impl DifficultyPolicy {
    pub fn new(requested: u32) -> Self {
        Self {
            effective: requested.min(MAX_DIFFICULTY),
        }
    }

    pub fn effective(&self) -> u32 {
        self.effective
    }

    pub fn recompute(&mut self, round: &Round) -> u32 {
        let min = min_difficulty(round).min(MAX_DIFFICULTY);
        if min > self.effective {
            info!("difficulty raised to {min} (round {}, {} winners)", round.id, round.winner_count);
            self.effective = min;
        }
        self.effective
    }
}
