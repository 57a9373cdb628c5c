use cached::proc_macro::cached;
use primitive_types::U256;

/// Contiguous, inclusive nonce range handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSlice {
    pub lo: U256,
    pub hi: U256,
    pub salt: String,
}

impl SearchSlice {
    pub fn len(&self) -> U256 {
        self.hi - self.lo + 1
    }
}

/// Largest nonce of a `difficulty`-digit key space, `16^difficulty - 1`.
#[cached]
pub fn nonce_space_max(difficulty: u32) -> U256 {
    if difficulty >= 64 {
        U256::MAX
    } else {
        (U256::one() << (4 * difficulty as usize)) - 1
    }
}

/// Walks the resumable slice counter.
///
/// Every `threads` consecutive counter values cover the whole key space once;
/// after the first pass a salt suffix derived from the counter makes the next
/// pass produce fresh hashes.
#[derive(Debug, Clone)]
pub struct SliceCursor {
    difficulty: u32,
    threads: U256,
    base_salt: String,
    counter: U256,
}

impl SliceCursor {
    pub fn new(difficulty: u32, threads: usize, base_salt: &str, counter: U256) -> Self {
        let max = nonce_space_max(difficulty);
        let mut threads = U256::from(threads.max(1));
        if threads > max {
            // never hand out an empty slice
            threads = max + 1;
        }
        Self {
            difficulty,
            threads,
            base_salt: base_salt.to_string(),
            counter,
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn counter(&self) -> U256 {
        self.counter
    }

    pub fn threads(&self) -> usize {
        self.threads.low_u64() as usize
    }

    /// Size of every slice but the last, `floor(16^difficulty / threads)`.
    fn share(&self) -> U256 {
        let max = nonce_space_max(self.difficulty);
        let (q, r) = max.div_mod(self.threads);
        // (max + 1) / threads without overflowing at difficulty 64
        if r + 1 == self.threads {
            q + 1
        } else {
            q
        }
    }

    /// Slice for an explicit counter value, without advancing.
    pub fn slice_at(&self, counter: U256) -> SearchSlice {
        let max = nonce_space_max(self.difficulty);
        let share = self.share();
        let index = counter % self.threads;
        let lo = share * index;
        let hi = if index == self.threads - 1 { max } else { lo + share - 1 };
        let salt = if counter.is_zero() {
            self.base_salt.clone()
        } else {
            let pass = (counter - 1) / self.threads;
            let prefix =
                if self.base_salt.is_empty() { String::new() } else { format!("{}-", self.base_salt) };
            format!("{prefix}{pass:x}")
        };
        SearchSlice { lo, hi, salt }
    }

    /// Hands out the next slice. The second value is the counter to persist
    /// when a full pass of `threads` slices has been assigned.
    pub fn next_slice(&mut self) -> (SearchSlice, Option<U256>) {
        let slice = self.slice_at(self.counter);
        self.counter += U256::one();
        let checkpoint = (self.counter % self.threads).is_zero().then_some(self.counter);
        (slice, checkpoint)
    }
}
