use std::sync::Arc;

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::*;

use shared::{store::KvStore, types::Address};

use crate::hasher::PackedKeccak;

const SEED_ENTRY: &str = "seed";

/// Identity of a search whose progress can be resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressKey {
    pub round_id: U256,
    pub address: Address,
    pub difficulty: u32,
    pub salt: String,
}

impl ProgressKey {
    pub fn fingerprint(&self) -> String {
        PackedKeccak::new()
            .uint256(self.round_id)
            .address(&self.address)
            .uint256(U256::from(self.difficulty))
            .string(&self.salt)
            .finalize_hex()
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct SeedRecord {
    keccak: String,
    /// decimal slice counter
    seed: String,
}

/// Resumable slice counter, valid only for the exact search it was saved for.
#[derive(Clone)]
pub struct SeedStore {
    store: Arc<dyn KvStore>,
}

impl SeedStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Saved counter for `key`, or zero when nothing usable is stored.
    pub fn load(&self, key: &ProgressKey) -> U256 {
        let raw = match self.store.get(SEED_ENTRY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return U256::zero(),
            Err(err) => {
                warn!("seed store read failed: {err}");
                return U256::zero();
            }
        };

        let record: SeedRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(err) => {
                warn!("seed record unreadable: {err}");
                return U256::zero();
            }
        };

        if record.keccak != key.fingerprint() {
            debug!("seed record belongs to another search");
            return U256::zero();
        }

        match U256::from_dec_str(&record.seed) {
            Ok(counter) => {
                info!("resuming round {} at counter {counter}", key.round_id);
                counter
            }
            Err(err) => {
                warn!("seed counter unreadable: {err:?}");
                U256::zero()
            }
        }
    }

    /// Persists `counter`; failures are logged, never returned.
    pub fn save(&self, key: &ProgressKey, counter: U256) {
        let record = SeedRecord {
            keccak: key.fingerprint(),
            seed: counter.to_string(),
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(err) => {
                error!("seed record encode failed: {err}");
                return;
            }
        };
        match self.store.set(SEED_ENTRY, &raw) {
            Ok(()) => trace!("saved counter {counter} for round {}", key.round_id),
            Err(err) => warn!("seed store write failed: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use shared::store::MemoryStore;

    use super::*;

    fn key() -> ProgressKey {
        ProgressKey {
            round_id: U256::from(100),
            address: Address([0x01; 20]),
            difficulty: 8,
            salt: "crew".into(),
        }
    }

    fn seeds() -> (Arc<MemoryStore>, SeedStore) {
        let mem = Arc::new(MemoryStore::default());
        (mem.clone(), SeedStore::new(mem))
    }

    #[test]
    fn nothing_stored_means_zero() {
        let (_, seeds) = seeds();
        assert_eq!(seeds.load(&key()), U256::zero());
    }

    #[test]
    fn saved_counter_comes_back_for_the_same_search() {
        let (mem, seeds) = seeds();
        seeds.save(&key(), U256::from(48));
        assert_eq!(seeds.load(&key()), U256::from(48));

        let raw = mem.get(SEED_ENTRY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["seed"], "48");
        assert_eq!(value["keccak"], key().fingerprint());
    }

    #[test]
    fn any_field_change_invalidates_progress() {
        let (_, seeds) = seeds();
        seeds.save(&key(), U256::from(48));

        let mut other = key();
        other.round_id = U256::from(101);
        assert_eq!(seeds.load(&other), U256::zero());

        let mut other = key();
        other.difficulty = 9;
        assert_eq!(seeds.load(&other), U256::zero());

        let mut other = key();
        other.salt = "crew2".into();
        assert_eq!(seeds.load(&other), U256::zero());

        let mut other = key();
        other.address = Address([0x02; 20]);
        assert_eq!(seeds.load(&other), U256::zero());
    }

    #[test]
    fn garbage_in_the_store_means_zero() {
        let (mem, seeds) = seeds();
        mem.set(SEED_ENTRY, "not json").unwrap();
        assert_eq!(seeds.load(&key()), U256::zero());

        let bad_counter = format!(r#"{{"keccak":"{}","seed":"12x"}}"#, key().fingerprint());
        mem.set(SEED_ENTRY, &bad_counter).unwrap();
        assert_eq!(seeds.load(&key()), U256::zero());
    }

    #[test]
    fn counters_wider_than_u64_survive() {
        let (_, seeds) = seeds();
        let big = U256::from(u64::MAX) * U256::from(1000);
        seeds.save(&key(), big);
        assert_eq!(seeds.load(&key()), big);
    }
}
